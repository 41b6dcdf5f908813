//! Process-wide atomic counters.
//!
//! Incremented at the call site; [`Metrics::flush`] logs all values as one
//! event, typically at the end of a regression batch.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    simulations: AtomicU64,
    simulations_failed: AtomicU64,
    agent_calls: AtomicU64,
    agent_retries: AtomicU64,
    judgments: AtomicU64,
    judgments_inconclusive: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub simulations: u64,
    pub simulations_failed: u64,
    pub agent_calls: u64,
    pub agent_retries: u64,
    pub judgments: u64,
    pub judgments_inconclusive: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            simulations: AtomicU64::new(0),
            simulations_failed: AtomicU64::new(0),
            agent_calls: AtomicU64::new(0),
            agent_retries: AtomicU64::new(0),
            judgments: AtomicU64::new(0),
            judgments_inconclusive: AtomicU64::new(0),
        }
    }

    pub fn inc_simulations(&self) {
        self.simulations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_simulations_failed(&self) {
        self.simulations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agent_calls(&self) {
        self.agent_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agent_retries(&self) {
        self.agent_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_judgments(&self) {
        self.judgments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_judgments_inconclusive(&self) {
        self.judgments_inconclusive.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            simulations: self.simulations.load(Ordering::Relaxed),
            simulations_failed: self.simulations_failed.load(Ordering::Relaxed),
            agent_calls: self.agent_calls.load(Ordering::Relaxed),
            agent_retries: self.agent_retries.load(Ordering::Relaxed),
            judgments: self.judgments.load(Ordering::Relaxed),
            judgments_inconclusive: self.judgments_inconclusive.load(Ordering::Relaxed),
        }
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            simulations = s.simulations,
            simulations_failed = s.simulations_failed,
            agent_calls = s.agent_calls,
            agent_retries = s.agent_retries,
            judgments = s.judgments,
            judgments_inconclusive = s.judgments_inconclusive,
        );
    }

    pub fn reset(&self) {
        for counter in [
            &self.simulations,
            &self.simulations_failed,
            &self.agent_calls,
            &self.agent_retries,
            &self.judgments,
            &self.judgments_inconclusive,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_and_reset() {
        let m = Metrics::new();
        m.inc_simulations();
        m.inc_agent_calls();
        m.inc_agent_calls();
        m.inc_agent_retries();
        m.inc_judgments_inconclusive();

        let s = m.snapshot();
        assert_eq!(s.simulations, 1);
        assert_eq!(s.agent_calls, 2);
        assert_eq!(s.agent_retries, 1);
        assert_eq!(s.judgments_inconclusive, 1);

        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
