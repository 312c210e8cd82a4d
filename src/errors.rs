//! Typed error hierarchy for the rotator.
//!
//! Two enums cover the two places failures can escape:
//! - `RotationError`: run-level failures that stop a rotation run
//! - `AbortReason`: per-attempt failures, handled locally by the scheduler
//!
//! Everything an attempt can hit on the network side is folded into an
//! `AbortReason` and never leaves the attempt as an `Err`.

use thiserror::Error;

/// Errors that halt a whole run.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Could not determine the baseline public IP before rotation: {0}")]
    BaselineIpUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config directory not found at {path}")]
    ConfigDirMissing { path: std::path::PathBuf },

    #[error("Failed to spawn tunnel process `{command}`: {source}")]
    TunnelSpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a single connection attempt ended without reaching the click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Health source reported the server as unhealthy (persisted as a skip).
    Unhealthy(String),
    /// Health status could not be fetched; not persisted.
    HealthUnknown,
    /// The tunnel process could not be started.
    SpawnFailed(String),
    /// No connected marker within the tick budget (persisted as a skip).
    ConnectionTimeout,
    /// Egress IP unchanged from baseline or unobtainable; not persisted.
    EgressUnverified,
}

impl AbortReason {
    /// Whether this abort wrote a durable skip record for the server.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Unhealthy(_) | Self::ConnectionTimeout)
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unhealthy(reason) => write!(f, "unhealthy: {}", reason),
            Self::HealthUnknown => write!(f, "health status unavailable"),
            Self::SpawnFailed(msg) => write!(f, "tunnel spawn failed: {}", msg),
            Self::ConnectionTimeout => write!(f, "connection timeout"),
            Self::EgressUnverified => write!(f, "egress IP not verified"),
        }
    }
}
