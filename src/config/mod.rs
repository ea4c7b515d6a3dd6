// =============================================================================
// Palisade - Config Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Server configuration, loaded from a TOML file with environment variable
//   overrides (PALISADE_* prefix).
//
// =============================================================================

use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use ruma::OwnedServerName;
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The name this server is reachable as in the federation.
    pub server_name: OwnedServerName,

    /// Per-request timeout for outbound federation calls, in seconds. A
    /// timed-out candidate is treated like an unreachable one.
    #[serde(default = "default_federation_timeout_s")]
    pub federation_timeout_s: u64,

    /// Retry policy for an exhausted authorization failover pass.
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Upper bound on the depth of a space hierarchy walk.
    #[serde(default = "default_hierarchy_max_depth")]
    pub hierarchy_max_depth: u64,

    /// Upper bound on the number of rooms in one hierarchy response page.
    #[serde(default = "default_hierarchy_limit")]
    pub hierarchy_limit: u64,

    /// Capacity of the space summary cache.
    #[serde(default = "default_hierarchy_cache_capacity")]
    pub hierarchy_cache_capacity: usize,

    #[serde(default = "default_log")]
    pub log: String,
}

/// How often a full pass over the candidate server list is attempted before
/// the exhausted-failover failure is surfaced. The default is a single
/// immediate pass; deployments that expect membership state to propagate
/// slowly can configure additional passes with a backoff between them.
#[derive(Clone, Debug, Deserialize)]
pub struct FailoverConfig {
    #[serde(default = "default_failover_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            attempts: default_failover_attempts(),
            backoff_ms: 0,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed("PALISADE_").global())
            .extract()
            .map_err(|e| Error::BadConfig(format!("{e}")))
    }

    pub fn federation_timeout(&self) -> Duration {
        Duration::from_secs(self.federation_timeout_s)
    }

    pub fn failover_backoff(&self) -> Duration {
        Duration::from_millis(self.failover.backoff_ms)
    }
}

fn default_federation_timeout_s() -> u64 {
    30
}

fn default_failover_attempts() -> u32 {
    1
}

fn default_hierarchy_max_depth() -> u64 {
    10
}

fn default_hierarchy_limit() -> u64 {
    100
}

fn default_hierarchy_cache_capacity() -> usize {
    100
}

fn default_log() -> String {
    "warn".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from_toml(raw: &str) -> Config {
        Figment::new()
            .merge(Toml::string(raw))
            .extract()
            .expect("config parses")
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = config_from_toml(r#"server_name = "hs1""#);

        assert_eq!(config.server_name.as_str(), "hs1");
        assert_eq!(config.federation_timeout_s, 30);
        assert_eq!(config.failover.attempts, 1);
        assert_eq!(config.failover.backoff_ms, 0);
        assert_eq!(config.hierarchy_max_depth, 10);
    }

    #[test]
    fn failover_policy_is_tunable() {
        let config = config_from_toml(
            r#"
            server_name = "hs1"

            [failover]
            attempts = 3
            backoff_ms = 250
            "#,
        );

        assert_eq!(config.failover.attempts, 3);
        assert_eq!(config.failover_backoff(), Duration::from_millis(250));
    }
}
