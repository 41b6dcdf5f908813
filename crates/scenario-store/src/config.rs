//! Connection configuration for the SurrealDB backend.

/// Where and how to connect to SurrealDB.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    /// Remote instance with credentials (e.g. "wss://xxx.surrealdb.cloud")
    Remote {
        endpoint: String,
        username: String,
        password: String,
        namespace: String,
        database: String,
        /// Root user (true) or database user (false)
        is_root: bool,
    },
    /// Any engine URL without authentication ("mem://", "surrealkv://path", "ws://host")
    Url(String),
}

impl StoreConfig {
    pub const DEFAULT_NAMESPACE: &'static str = "trainexus";
    pub const DEFAULT_DATABASE: &'static str = "main";
    /// Local persistence used when nothing is configured.
    pub const DEFAULT_LOCAL_PATH: &'static str = ".trainexus/db";

    /// Volatile in-process database.
    pub fn in_memory() -> Self {
        StoreConfig::Url("mem://".to_string())
    }

    /// Create from environment variables
    ///
    /// Reads, in order:
    /// - SURREALDB_ENDPOINT + SURREALDB_USERNAME + SURREALDB_PASSWORD
    ///   (with optional SURREALDB_NAMESPACE, SURREALDB_DATABASE, SURREALDB_ROOT)
    /// - SURREALDB_URL
    /// - falls back to `surrealkv://.trainexus/db`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same resolution as [`StoreConfig::from_env`] over an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(endpoint), Some(username), Some(password)) = (
            lookup("SURREALDB_ENDPOINT"),
            lookup("SURREALDB_USERNAME"),
            lookup("SURREALDB_PASSWORD"),
        ) {
            return StoreConfig::Remote {
                endpoint,
                username,
                password,
                namespace: lookup("SURREALDB_NAMESPACE")
                    .unwrap_or_else(|| Self::DEFAULT_NAMESPACE.to_string()),
                database: lookup("SURREALDB_DATABASE")
                    .unwrap_or_else(|| Self::DEFAULT_DATABASE.to_string()),
                is_root: lookup("SURREALDB_ROOT")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            };
        }

        if let Some(url) = lookup("SURREALDB_URL") {
            return StoreConfig::Url(url);
        }

        StoreConfig::Url(format!("surrealkv://{}", Self::DEFAULT_LOCAL_PATH))
    }

    /// Endpoint string, safe to log (no credentials).
    pub fn endpoint(&self) -> &str {
        match self {
            StoreConfig::Remote { endpoint, .. } => endpoint,
            StoreConfig::Url(url) => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn remote_config_wins_over_url() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "author"),
            ("SURREALDB_PASSWORD", "secret"),
            ("SURREALDB_ROOT", "TRUE"),
            ("SURREALDB_URL", "mem://"),
        ]));
        match config {
            StoreConfig::Remote {
                endpoint,
                namespace,
                database,
                is_root,
                ..
            } => {
                assert_eq!(endpoint, "wss://db.example");
                assert_eq!(namespace, "trainexus");
                assert_eq!(database, "main");
                assert!(is_root);
            }
            other => panic!("expected remote config, got {:?}", other),
        }
    }

    #[test]
    fn partial_credentials_fall_through_to_url() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_URL", "mem://"),
        ]));
        assert_eq!(config, StoreConfig::Url("mem://".to_string()));
    }

    #[test]
    fn defaults_to_local_surrealkv() {
        let config = StoreConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.endpoint(), "surrealkv://.trainexus/db");
    }
}
