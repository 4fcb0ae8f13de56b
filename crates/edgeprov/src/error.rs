//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use edgeprov_api::TrapKind;
use edgeprov_config::ConfigError;
use edgeprov_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

/// Process exit codes.
pub mod exit_code {
    #[allow(dead_code)]
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to device at {host}")]
    #[diagnostic(
        code(edgeprov::connection_failed),
        help(
            "Check that the device is reachable and its API service is enabled.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { host: String, reason: String },

    #[error("Timed out after {timeout_ms}ms talking to {host}")]
    #[diagnostic(
        code(edgeprov::timeout),
        help("Increase the timeout with --timeout or check the device's load.")
    )]
    Timeout { host: String, timeout_ms: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(edgeprov::auth_failed),
        help(
            "Verify the stored credentials.\n\
             Run: edgeprov config set-password <device>"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for {what}")]
    #[diagnostic(
        code(edgeprov::no_credentials),
        help(
            "Set password_env in the device entry, store a password with\n\
             `edgeprov config set-password`, or set password in the config file."
        )
    )]
    NoCredentials { what: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(edgeprov::keyring),
        help("The system keyring is unavailable; use the *_env settings instead.")
    )]
    Keyring { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(edgeprov::not_found),
        help("Run: edgeprov {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{what} already exists")]
    #[diagnostic(code(edgeprov::conflict))]
    Conflict { what: String },

    #[error("Job {id} cannot be retried: {reason}")]
    #[diagnostic(
        code(edgeprov::retry_refused),
        help("Only failed jobs below their attempt ceiling can be put back in the queue.")
    )]
    RetryRefused { id: String, reason: String },

    // ── Device / directory ───────────────────────────────────────────
    #[error("Device rejected {path}: {message}")]
    #[diagnostic(code(edgeprov::device_rejected))]
    DeviceRejected { path: String, message: String },

    #[error("Protocol error: {message}")]
    #[diagnostic(code(edgeprov::protocol))]
    Protocol { message: String },

    #[error("Directory error: {message}")]
    #[diagnostic(
        code(edgeprov::directory),
        help("Check the odoo section of the onboarding profile.")
    )]
    Directory { message: String },

    // ── Onboarding ───────────────────────────────────────────────────
    #[error("Onboarding of {host} failed at {step}: {message}")]
    #[diagnostic(code(edgeprov::onboarding))]
    Onboarding {
        host: String,
        step: String,
        message: String,
    },

    #[error("{failed} candidate(s) could not be onboarded")]
    #[diagnostic(
        code(edgeprov::onboarding_incomplete),
        help("Re-run the scan once the listed devices are fixed; finished steps are not repeated.")
    )]
    OnboardingIncomplete { failed: usize },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(edgeprov::validation))]
    Validation { field: String, reason: String },

    #[error("No handler for job type '{job_type}'")]
    #[diagnostic(code(edgeprov::no_handler), help("Known job types: {known}"))]
    NoHandler { job_type: String, known: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(edgeprov::config),
        help("Run `edgeprov config show` to inspect the resolved configuration.")
    )]
    Config { message: String },

    #[error("File not found: {path}")]
    #[diagnostic(code(edgeprov::file_not_found))]
    FileNotFound { path: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("'{action}' requires confirmation")]
    #[diagnostic(
        code(edgeprov::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(edgeprov::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(edgeprov::json), help("The payload must be a JSON object."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Keyring { .. } => exit_code::PERMISSION,
            Self::NotFound { .. } | Self::FileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::RetryRefused { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NoHandler { .. } | Self::NonInteractiveRequiresYes { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { host, reason } => CliError::ConnectionFailed { host, reason },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::Timeout { host, timeout_ms } => CliError::Timeout { host, timeout_ms },

            CoreError::DeviceRejected {
                path,
                kind: TrapKind::AlreadyExists,
                message,
            } => CliError::Conflict {
                what: format!("{path} ({message})"),
            },

            CoreError::DeviceRejected { path, message, .. } => CliError::DeviceRejected { path, message },

            CoreError::Protocol { message } => CliError::Protocol { message },

            CoreError::Directory { message } => CliError::Directory { message },

            CoreError::NoHandler { job_type } => CliError::NoHandler {
                job_type,
                known: known_job_types(),
            },

            CoreError::JobNotFound { id } => CliError::NotFound {
                resource_type: "job".into(),
                identifier: id,
                list_command: "jobs list".into(),
            },

            CoreError::RequeueRefused { id, reason } => CliError::RetryRefused { id, reason },

            CoreError::Onboarding { host, step, message } => CliError::Onboarding { host, step, message },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Config { message },

            CoreError::Store { message } | CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { what } => CliError::NoCredentials { what },
            ConfigError::NotFound { path } => CliError::FileNotFound {
                path: path.display().to_string(),
            },
            ConfigError::Keyring(message) => CliError::Keyring { message },
            ConfigError::Core(core) => core.into(),
            ConfigError::Io(io) => CliError::Io(io),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

fn known_job_types() -> String {
    use strum::IntoEnumIterator;

    edgeprov_core::JobType::iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
