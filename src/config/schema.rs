//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::ShutdownSignal;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Shutdown sequencing.
    pub lifecycle: LifecycleConfig,

    /// Liveness/readiness probe server.
    pub probes: ProbeConfig,

    /// Application listener drained on shutdown.
    pub listener: ListenerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Converts a seconds setting into a duration; `<= 0` disables.
/// Values too large for a `Duration` saturate at `Duration::MAX`.
pub(crate) fn positive_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    } else {
        None
    }
}

/// Shutdown sequencing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Wait before draining, absorbing the gap between the orchestrator
    /// deregistering the instance and traffic actually stopping. `<= 0`
    /// disables.
    pub shutdown_delay_secs: f64,

    /// Time after the shutdown request at which the process is forcibly
    /// terminated. `<= 0` disables.
    pub termination_grace_period_secs: f64,

    /// Signal names that trigger shutdown.
    pub shutdown_signals: Vec<String>,

    /// Exit status used by the forced termination.
    pub forced_exit_code: i32,
}

impl LifecycleConfig {
    pub fn shutdown_delay(&self) -> Option<Duration> {
        positive_secs(self.shutdown_delay_secs)
    }

    pub fn termination_grace_period(&self) -> Option<Duration> {
        positive_secs(self.termination_grace_period_secs)
    }

    /// Parsed signal list; unknown names are skipped (validation reports them).
    pub fn signals(&self) -> Vec<ShutdownSignal> {
        self.shutdown_signals
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_delay_secs: 5.0,
            termination_grace_period_secs: 30.0,
            shutdown_signals: ShutdownSignal::DEFAULTS
                .iter()
                .map(|s| s.name().to_string())
                .collect(),
            forced_exit_code: 1,
        }
    }
}

/// Probe server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Serve the probe endpoints at all.
    pub enabled: bool,

    /// Host to bind (all interfaces by default).
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Path of the liveness endpoint.
    pub liveness_path: String,

    /// Path of the readiness endpoint.
    pub readiness_path: String,
}

impl ProbeConfig {
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 4000,
            liveness_path: "/healthz".to_string(),
            readiness_path: "/readyz".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Time given to in-flight exchanges before remaining connections are
    /// force-closed during drain.
    pub drain_grace_period_secs: f64,
}

impl ListenerConfig {
    pub fn drain_grace_period(&self) -> Duration {
        positive_secs(self.drain_grace_period_secs).unwrap_or(Duration::ZERO)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            drain_grace_period_secs: 1.0,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.lifecycle.shutdown_delay(), Some(Duration::from_secs(5)));
        assert_eq!(
            config.lifecycle.termination_grace_period(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.lifecycle.signals(),
            vec![
                ShutdownSignal::Terminate,
                ShutdownSignal::Hangup,
                ShutdownSignal::Interrupt
            ]
        );
        assert_eq!(config.probes.bind_address(), "0.0.0.0:4000");
        assert_eq!(config.probes.liveness_path, "/healthz");
        assert_eq!(config.probes.readiness_path, "/readyz");
        assert_eq!(config.listener.drain_grace_period(), Duration::from_secs(1));
    }

    #[test]
    fn non_positive_durations_disable() {
        let config = LifecycleConfig {
            shutdown_delay_secs: 0.0,
            termination_grace_period_secs: -1.0,
            ..LifecycleConfig::default()
        };
        assert_eq!(config.shutdown_delay(), None);
        assert_eq!(config.termination_grace_period(), None);
    }

    #[test]
    fn oversized_durations_saturate() {
        let lifecycle = LifecycleConfig {
            shutdown_delay_secs: 1e30,
            termination_grace_period_secs: 1e30,
            ..LifecycleConfig::default()
        };
        assert_eq!(lifecycle.shutdown_delay(), Some(Duration::MAX));
        assert_eq!(lifecycle.termination_grace_period(), Some(Duration::MAX));

        let listener = ListenerConfig {
            drain_grace_period_secs: 1e30,
            ..ListenerConfig::default()
        };
        assert_eq!(listener.drain_grace_period(), Duration::MAX);
    }

    #[test]
    fn ipv6_probe_host_is_bracketed() {
        let config = ProbeConfig {
            host: "::1".to_string(),
            ..ProbeConfig::default()
        };
        assert_eq!(config.bind_address(), "[::1]:4000");
    }
}
