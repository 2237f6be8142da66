//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use fanfleet_config::ConfigError;
use fanfleet_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Network ──────────────────────────────────────────────────────
    #[error("Network failure at {target}: {reason}")]
    #[diagnostic(
        code(fanfleet::connection_failed),
        help(
            "Check that the address is free and reachable.\n\
             Another Master may already be bound to the same ports."
        )
    )]
    Connection { target: String, reason: String },

    #[error("No reply within {millis}ms")]
    #[diagnostic(
        code(fanfleet::timeout),
        help("Check that the Master is running with external control enabled, or raise --timeout-ms.")
    )]
    Timeout { millis: u64 },

    #[error("Malformed reply: {message}")]
    #[diagnostic(code(fanfleet::protocol))]
    Protocol { message: String },

    // ── Devices & commands ───────────────────────────────────────────
    #[error("Device '{mac}' not found")]
    #[diagnostic(
        code(fanfleet::not_found),
        help("Run: fanfleet discover to see the devices on the network")
    )]
    NotFound { mac: String },

    #[error("Command rejected: {message}")]
    #[diagnostic(code(fanfleet::rejected))]
    Rejected { message: String },

    #[error("{message}")]
    #[diagnostic(code(fanfleet::operation))]
    Operation { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fanfleet::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(fanfleet::config),
        help("Create a config with: fanfleet config init")
    )]
    Config(ConfigError),

    #[error("Config file already exists: {path}")]
    #[diagnostic(
        code(fanfleet::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::BindFailed { addr, reason } => Self::Connection {
                target: addr.to_string(),
                reason,
            },
            CoreError::Network { message } => Self::Connection {
                target: "(network)".into(),
                reason: message,
            },
            CoreError::Timeout { timeout_ms } => Self::Timeout { millis: timeout_ms },
            CoreError::Protocol { message } => Self::Protocol { message },
            CoreError::DeviceNotFound { mac } => Self::NotFound { mac },
            CoreError::Rejected { message } => Self::Rejected { message },
            CoreError::DimensionMismatch { .. }
            | CoreError::DutyCycleOutOfRange { .. }
            | CoreError::UnknownAttribute { .. }
            | CoreError::UnknownQuery { .. } => Self::Validation {
                field: "command".into(),
                reason: message,
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::InvalidTransition { .. }
            | CoreError::AlreadyStarted
            | CoreError::ShuttingDown => Self::Operation { message },
        }
    }
}
