//! Control-plane configuration.
//!
//! A single typed struct assembled once at bootstrap from environment
//! variables and passed by value to component constructors. No module-level
//! mutable state.

use std::path::PathBuf;

/// Outbound HTTP timeouts (engine and auth-service calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect_secs: u64,
    pub read_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 3,
            read_secs: 5,
        }
    }
}

/// Autoscaler thresholds and bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalerConfig {
    /// Saturation at or above which the fleet grows.
    pub scale_up_threshold: f64,
    /// Saturation at or below which the fleet shrinks.
    pub scale_down_threshold: f64,
    pub min_nodes: u32,
    pub max_nodes: u32,
    /// Minimum seconds between non-NONE recommendations.
    pub cooldown_seconds: u64,
    /// Tick cadence of the autoscaler loop.
    pub interval_seconds: u64,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            min_nodes: 1,
            max_nodes: 10,
            cooldown_seconds: 300,
            interval_seconds: 30,
        }
    }
}

/// Top-level control-plane configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlaneConfig {
    /// Base URL of the external auth service. When unset, remote token
    /// validation is disabled and no match tokens are brokered.
    pub auth_service_url: Option<String>,
    /// OAuth2 client credentials for the auth service.
    pub auth_client_id: String,
    pub auth_client_secret: Option<String>,
    /// Bearer token presented to node engines.
    pub control_plane_token: Option<String>,
    /// Directory holding the shared state store.
    pub state_dir: PathBuf,
    /// Node heartbeat TTL; a node whose TTL lapses is UNHEALTHY.
    pub node_ttl_seconds: u64,
    /// A node absent longer than `grace_factor × ttl` past expiry is removed.
    pub node_grace_factor: u32,
    /// Interval nodes are told to heartbeat at.
    pub heartbeat_interval_seconds: u64,
    /// Containers per node that matches are spread across.
    pub max_containers: u32,
    /// Terminal match rows owned by removed nodes are kept this long.
    pub match_retention_seconds: u64,
    /// Secret verifying operator API tokens; unset disables API auth.
    pub api_secret: Option<String>,
    pub autoscaler: AutoscalerConfig,
    pub http: HttpTimeouts,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            auth_service_url: None,
            auth_client_id: "control-plane".to_string(),
            auth_client_secret: None,
            control_plane_token: None,
            state_dir: PathBuf::from("/var/lib/stormstack"),
            node_ttl_seconds: 30,
            node_grace_factor: 3,
            heartbeat_interval_seconds: 10,
            max_containers: 4,
            match_retention_seconds: 300,
            api_secret: None,
            autoscaler: AutoscalerConfig::default(),
            http: HttpTimeouts::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Build the configuration from the process environment, falling back
    /// to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auth_service_url: env_string("AUTH_SERVICE_URL"),
            auth_client_id: env_string("AUTH_CLIENT_ID")
                .unwrap_or(defaults.auth_client_id),
            auth_client_secret: env_string("AUTH_CLIENT_SECRET"),
            control_plane_token: env_string("CONTROL_PLANE_TOKEN"),
            state_dir: env_string("STORM_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            node_ttl_seconds: env_parse("NODE_TTL_SECONDS", defaults.node_ttl_seconds),
            node_grace_factor: env_parse("NODE_GRACE_FACTOR", defaults.node_grace_factor),
            heartbeat_interval_seconds: env_parse(
                "HEARTBEAT_INTERVAL_SECONDS",
                defaults.heartbeat_interval_seconds,
            ),
            max_containers: env_parse("MAX_CONTAINERS", defaults.max_containers).max(1),
            match_retention_seconds: env_parse(
                "MATCH_RETENTION_SECONDS",
                defaults.match_retention_seconds,
            ),
            api_secret: env_string("STORM_API_SECRET"),
            autoscaler: AutoscalerConfig {
                scale_up_threshold: env_parse(
                    "AUTOSCALER_SCALE_UP_THRESHOLD",
                    defaults.autoscaler.scale_up_threshold,
                ),
                scale_down_threshold: env_parse(
                    "AUTOSCALER_SCALE_DOWN_THRESHOLD",
                    defaults.autoscaler.scale_down_threshold,
                ),
                min_nodes: env_parse("AUTOSCALER_MIN_NODES", defaults.autoscaler.min_nodes),
                max_nodes: env_parse("AUTOSCALER_MAX_NODES", defaults.autoscaler.max_nodes),
                cooldown_seconds: env_parse(
                    "AUTOSCALER_COOLDOWN_SECONDS",
                    defaults.autoscaler.cooldown_seconds,
                ),
                interval_seconds: env_parse(
                    "AUTOSCALER_INTERVAL_SECONDS",
                    defaults.autoscaler.interval_seconds,
                ),
            },
            http: HttpTimeouts {
                connect_secs: env_parse("HTTP_CONNECT_TIMEOUT_SECONDS", defaults.http.connect_secs),
                read_secs: env_parse("HTTP_READ_TIMEOUT_SECONDS", defaults.http.read_secs),
            },
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_doc() {
        let cfg = ControlPlaneConfig::default();
        assert_eq!(cfg.node_ttl_seconds, 30);
        assert_eq!(cfg.node_grace_factor, 3);
        assert_eq!(cfg.autoscaler.scale_up_threshold, 0.8);
        assert_eq!(cfg.autoscaler.scale_down_threshold, 0.3);
        assert_eq!(cfg.autoscaler.cooldown_seconds, 300);
        assert_eq!(cfg.http.connect_secs, 3);
        assert_eq!(cfg.http.read_secs, 5);
        assert!(cfg.auth_service_url.is_none());
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        // Unset variables fall back.
        assert_eq!(env_parse("STORM_TEST_UNSET_VARIABLE", 7u64), 7);
    }
}
