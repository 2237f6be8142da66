// ── Core error types ──
//
// User-facing errors from fanfleet-core. Socket details from
// fanfleet-proto are translated by the `From<fanfleet_proto::Error>` impl;
// decode failures surface as `Protocol`.

use std::net::SocketAddr;

use fanfleet_proto::{DecodeError, MacAddress};
use thiserror::Error;

use crate::model::{SlaveState, Transition};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Network errors ───────────────────────────────────────────────
    #[error("Cannot bind {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("No reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed message: {message}")]
    Protocol { message: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device not found: {mac}")]
    DeviceNotFound { mac: String },

    #[error("Device {mac}: cannot apply {transition} in state {from}")]
    InvalidTransition {
        mac: MacAddress,
        from: SlaveState,
        transition: Transition,
    },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Duty-cycle vector has {got} values, array has {expected} cells")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Duty cycle {value} is outside [0, 1]")]
    DutyCycleOutOfRange { value: f64 },

    #[error("Unknown profile attribute: {name}")]
    UnknownAttribute { name: String },

    #[error("Unknown query: {name}")]
    UnknownQuery { name: String },

    #[error("Command rejected: {message}")]
    Rejected { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Master is already running")]
    AlreadyStarted,

    #[error("Master is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from lower-layer errors ───────────────────────────────

impl From<fanfleet_proto::Error> for CoreError {
    fn from(err: fanfleet_proto::Error) -> Self {
        match err {
            fanfleet_proto::Error::Bind { addr, source } => CoreError::BindFailed {
                addr,
                reason: source.to_string(),
            },
            other => CoreError::Network {
                message: other.to_string(),
            },
        }
    }
}

impl From<DecodeError> for CoreError {
    fn from(err: DecodeError) -> Self {
        CoreError::Protocol {
            message: err.to_string(),
        }
    }
}

impl CoreError {
    /// Returns `true` if the error means a device lookup failed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }
}
