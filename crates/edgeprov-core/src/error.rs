// ── Core error types ──
//
// Domain errors from edgeprov-core. Callers never see raw protocol words or
// JSON-RPC envelopes; the `From<edgeprov_api::Error>` impl translates them.

use edgeprov_api::TrapKind;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device at {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Timed out after {timeout_ms}ms talking to {host}")]
    Timeout { host: String, timeout_ms: u64 },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device rejected {path}: {message}")]
    DeviceRejected {
        path: String,
        kind: TrapKind,
        message: String,
    },

    #[error("Device protocol error: {message}")]
    Protocol { message: String },

    // ── Directory errors ─────────────────────────────────────────────
    #[error("Directory error: {message}")]
    Directory { message: String },

    // ── Job errors ───────────────────────────────────────────────────
    #[error("No handler registered for job type {job_type}")]
    NoHandler { job_type: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job {id} cannot be re-queued: {reason}")]
    RequeueRefused { id: String, reason: String },

    #[error("Job store error: {message}")]
    Store { message: String },

    // ── Onboarding errors ────────────────────────────────────────────
    #[error("Onboarding of {host} failed at {step}: {message}")]
    Onboarding {
        host: String,
        step: String,
        message: String,
    },

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Configuration problems are never worth retrying.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::NoHandler { .. } | Self::ValidationFailed { .. }
        )
    }

    /// A create that lost a race with an existing entry.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::DeviceRejected {
                kind: TrapKind::AlreadyExists,
                ..
            }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceRejected {
                kind: TrapKind::NotFound,
                ..
            } | Self::JobNotFound { .. }
        )
    }

    /// Connection-level failure: worth reconnecting for.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Protocol { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<edgeprov_api::Error> for CoreError {
    fn from(err: edgeprov_api::Error) -> Self {
        use edgeprov_api::Error as Api;
        match err {
            Api::Connect { host, source } => CoreError::ConnectionFailed {
                host,
                reason: source.to_string(),
            },
            Api::Timeout { host, timeout_ms } => CoreError::Timeout { host, timeout_ms },
            Api::Io(e) => CoreError::Protocol {
                message: format!("I/O error: {e}"),
            },
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Trap {
                path,
                kind,
                message,
                ..
            } => CoreError::DeviceRejected {
                path,
                kind,
                message,
            },
            Api::Fatal(message) => CoreError::Protocol {
                message: format!("device closed the session: {message}"),
            },
            Api::Protocol(message) => CoreError::Protocol { message },
            Api::Transport(e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        host: e.url().map(ToString::to_string).unwrap_or_default(),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Directory {
                        message: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            Api::Directory { message } => CoreError::Directory { message },
            Api::Deserialization { message, body: _ } => CoreError::Directory {
                message: format!("unexpected directory response: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_kind_survives_conversion() {
        let err: CoreError =
            edgeprov_api::Error::trap("/ppp/secret/add", Some(1), "failure: already have such name")
                .into();
        assert!(err.is_already_exists());
        assert!(!err.is_config());
    }

    #[test]
    fn missing_handler_is_config() {
        let err = CoreError::NoHandler {
            job_type: "export_config_snapshot".into(),
        };
        assert!(err.is_config());
    }
}
