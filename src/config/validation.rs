//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and addresses
//! - Reject unknown signal names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::lifecycle::ShutdownSignal;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: '{value}' is not a valid IP address or host name")]
    InvalidHost { field: &'static str, value: String },

    #[error("{field}: path '{value}' must start with '/'")]
    InvalidPath { field: &'static str, value: String },

    #[error("probes: liveness and readiness paths are both '{0}'")]
    DuplicateProbePath(String),

    #[error("{field}: {value} is not a representable number of seconds")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("listener.drain_grace_period_secs: must not be negative (got {0})")]
    NegativeGracePeriod(f64),

    #[error("lifecycle.shutdown_signals: unknown signal '{0}'")]
    UnknownSignal(String),
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let lifecycle = &config.lifecycle;
    for (field, value) in [
        ("lifecycle.shutdown_delay_secs", lifecycle.shutdown_delay_secs),
        (
            "lifecycle.termination_grace_period_secs",
            lifecycle.termination_grace_period_secs,
        ),
        ("listener.drain_grace_period_secs", config.listener.drain_grace_period_secs),
    ] {
        let representable = value <= 0.0 || Duration::try_from_secs_f64(value).is_ok();
        if !value.is_finite() || !representable {
            errors.push(ValidationError::InvalidDuration { field, value });
        }
    }
    for name in &lifecycle.shutdown_signals {
        if name.parse::<ShutdownSignal>().is_err() {
            errors.push(ValidationError::UnknownSignal(name.clone()));
        }
    }

    let probes = &config.probes;
    if probes.enabled {
        check_host(&mut errors, "probes.host", &probes.host);
        check_path(&mut errors, "probes.liveness_path", &probes.liveness_path);
        check_path(&mut errors, "probes.readiness_path", &probes.readiness_path);
        if probes.liveness_path == probes.readiness_path {
            errors.push(ValidationError::DuplicateProbePath(probes.liveness_path.clone()));
        }
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    let grace = config.listener.drain_grace_period_secs;
    if grace < 0.0 {
        errors.push(ValidationError::NegativeGracePeriod(grace));
    }

    let observability = &config.observability;
    if observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// IP literals, or DNS names resolved when the probe server binds.
fn check_host(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    let is_name = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if value.parse::<IpAddr>().is_err() && !is_name {
        errors.push(ValidationError::InvalidHost {
            field,
            value: value.to_string(),
        });
    }
}

fn check_path(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::InvalidPath {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = AppConfig::default();
        config.probes.liveness_path = "health".to_string();
        config.probes.readiness_path = "health".to_string();
        config.listener.bind_address = "not-an-address".to_string();
        config.listener.drain_grace_period_secs = -2.0;
        config.lifecycle.shutdown_signals.push("SIGKILL".to_string());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::UnknownSignal("SIGKILL".to_string())));
        assert!(errors.contains(&ValidationError::DuplicateProbePath("health".to_string())));
        assert!(errors.contains(&ValidationError::NegativeGracePeriod(-2.0)));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::InvalidAddress { field: "listener.bind_address", .. }
        )));
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ValidationError::InvalidPath { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn disabled_probes_are_not_checked() {
        let mut config = AppConfig::default();
        config.probes.enabled = false;
        config.probes.liveness_path = "x".to_string();
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn non_finite_durations_rejected() {
        let mut config = AppConfig::default();
        config.lifecycle.shutdown_delay_secs = f64::NAN;
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidDuration { field: "lifecycle.shutdown_delay_secs", .. }]
        ));
    }

    #[test]
    fn oversized_durations_rejected() {
        let mut config = AppConfig::default();
        config.lifecycle.termination_grace_period_secs = 1e30;
        config.listener.drain_grace_period_secs = 1e30;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidDuration {
                    field: "lifecycle.termination_grace_period_secs",
                    value: 1e30,
                },
                ValidationError::InvalidDuration {
                    field: "listener.drain_grace_period_secs",
                    value: 1e30,
                },
            ]
        );
    }

    #[test]
    fn probe_host_accepts_names_and_ips() {
        for host in ["localhost", "probes.internal", "127.0.0.1", "::1"] {
            let mut config = AppConfig::default();
            config.probes.host = host.to_string();
            assert_eq!(validate_config(&config), Ok(()), "{host}");
        }

        let mut config = AppConfig::default();
        config.probes.host = "bad host".to_string();
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidHost {
                field: "probes.host",
                value: "bad host".to_string(),
            }])
        );
    }
}
