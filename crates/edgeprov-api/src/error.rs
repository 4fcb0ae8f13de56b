use thiserror::Error;

/// Classification of a `!trap` reply from the device.
///
/// RouterOS reports every failed mutation the same way (a `!trap` sentence
/// with a free-text `message`), so the client inspects the text exactly
/// once, here, and hands callers a tag instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// Create rejected because an entry with the same key already exists.
    AlreadyExists,
    /// `set`/`remove`/`move` referenced an item that does not exist.
    NotFound,
    /// Anything else (bad argument, permission denied, ...).
    Other,
}

impl TrapKind {
    /// Classify a trap message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("already have")
            || lower.contains("already exists")
            || lower.contains("already added")
        {
            Self::AlreadyExists
        } else if lower.contains("no such item")
            || lower.contains("no such command")
            || lower.contains("not found")
        {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Top-level error type for the `edgeprov-api` crate.
///
/// Covers every failure mode of the device wire protocol and the directory
/// JSON-RPC surface. `edgeprov-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// TCP connect failed (refused, unreachable, ...).
    #[error("cannot connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or reply did not arrive in time.
    #[error("timed out after {timeout_ms}ms talking to {host}")]
    Timeout { host: String, timeout_ms: u64 },

    /// Socket error after the session was established.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected by the device or the directory.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    // ── Device protocol ─────────────────────────────────────────────
    /// The device answered a command with `!trap`.
    #[error("device rejected {path}: {message}")]
    Trap {
        path: String,
        kind: TrapKind,
        category: Option<u32>,
        message: String,
    },

    /// The device sent `!fatal` and closed the session.
    #[error("device closed the session: {0}")]
    Fatal(String),

    /// Malformed sentence, unexpected reply word, or closed stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    // ── Directory (JSON-RPC) ────────────────────────────────────────
    /// HTTP transport error talking to the directory.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup failure for the directory client.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Structured error returned inside a JSON-RPC envelope.
    #[error("directory error: {message}")]
    Directory { message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Build a trap error, classifying the message.
    pub fn trap(path: impl Into<String>, category: Option<u32>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Trap {
            path: path.into(),
            kind: TrapKind::classify(&message),
            category,
            message,
        }
    }

    /// The trap classification, if this is a device trap.
    pub fn trap_kind(&self) -> Option<TrapKind> {
        match self {
            Self::Trap { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if a create failed because the entry already exists.
    pub fn is_already_exists(&self) -> bool {
        self.trap_kind() == Some(TrapKind::AlreadyExists)
    }

    /// Returns `true` if the referenced item does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Trap { kind, .. } => *kind == TrapKind::NotFound,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Fatal(_) => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if credentials were rejected.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}
