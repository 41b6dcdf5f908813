//! Engine configuration.
//!
//! Defaults come from `Default`; `from_env` applies `TRAINEXUS_*` overrides.
//! The CLI layers its own flags on top.

use serde::{Deserialize, Serialize};

/// Per-run simulation controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Retries for rate-limited / transient agent failures (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Wall-clock limit for a single agent or judge call (milliseconds).
    pub call_timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 200,
            call_timeout_ms: 60_000,
        }
    }
}

impl SimulationConfig {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Batch controls for the regression runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// Simulations per scenario.
    pub repetitions: u32,
    /// Maximum simulations in flight.
    pub concurrency: usize,
    /// Record a baseline for every row with a pass/fail verdict.
    pub record_baseline: bool,
    /// Tester persona overrides. Each scenario runs once per variant and
    /// reports one row per variant; empty keeps the scenario's own tester.
    #[serde(default)]
    pub tester_variants: Vec<TesterVariant>,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            repetitions: 1,
            concurrency: 4,
            record_baseline: false,
            tester_variants: Vec::new(),
        }
    }
}

/// A named replacement for the tester persona's instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesterVariant {
    pub name: String,
    pub instructions: String,
}

impl TesterVariant {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
        }
    }

    /// Learner profiles from strong to clueless.
    pub fn default_matrix() -> Vec<Self> {
        vec![
            Self::new(
                "best_case",
                "Play a well-prepared learner. Answer concisely and back every claim with two or three concrete examples.",
            ),
            Self::new(
                "weak",
                "Play a weak learner. Ramble, stay vague and offer little evidence for what you say.",
            ),
            Self::new(
                "zero_knowledge",
                "Play a learner with no prior knowledge. Sound unsure and give short answers that are thin on substance.",
            ),
        ]
    }

    /// Parse `name=instructions`.
    pub fn parse(input: &str) -> Result<Self, String> {
        match input.split_once('=') {
            Some((name, instructions))
                if !name.trim().is_empty() && !instructions.trim().is_empty() =>
            {
                Ok(Self::new(name.trim(), instructions.trim()))
            }
            _ => Err(format!("invalid tester variant '{input}', expected NAME=INSTRUCTIONS")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub simulation: SimulationConfig,
    pub regression: RegressionConfig,
}

impl EngineConfig {
    /// Defaults with `TRAINEXUS_MAX_RETRIES`, `TRAINEXUS_CALL_TIMEOUT_MS`,
    /// `TRAINEXUS_BACKOFF_BASE_MS`, `TRAINEXUS_REPETITIONS` and
    /// `TRAINEXUS_CONCURRENCY` applied. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = parsed("TRAINEXUS_MAX_RETRIES") {
            config.simulation.max_retries = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = parsed("TRAINEXUS_CALL_TIMEOUT_MS") {
            config.simulation.call_timeout_ms = v.max(1);
        }
        if let Some(v) = parsed("TRAINEXUS_BACKOFF_BASE_MS") {
            config.simulation.backoff_base_ms = v;
        }
        if let Some(v) = parsed("TRAINEXUS_REPETITIONS") {
            config.regression.repetitions = (v.min(u32::MAX as u64) as u32).max(1);
        }
        if let Some(v) = parsed("TRAINEXUS_CONCURRENCY") {
            config.regression.concurrency = (v as usize).max(1);
        }
        config
    }
}

/// OpenAI-compatible chat endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl LlmConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;

    /// Reads `OPENAI_API_KEY`, `TRAINEXUS_LLM_ENDPOINT`, `TRAINEXUS_LLM_MODEL`
    /// and `TRAINEXUS_LLM_TEMPERATURE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            endpoint: lookup("TRAINEXUS_LLM_ENDPOINT")
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            model: lookup("TRAINEXUS_LLM_MODEL").unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            temperature: lookup("TRAINEXUS_LLM_TEMPERATURE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(Self::DEFAULT_TEMPERATURE),
            api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
        }
    }

    /// `true` when an API key is configured.
    pub fn is_online(&self) -> bool {
        self.api_key.is_some()
    }
}
