use tracing::info;

use crate::command::{Command, Response};

/// Stand-in session that logs every command instead of sending it.
///
/// Reads come back empty, so reconciliation against a dry-run device always
/// takes the "create" path and logs the full intended change set.
#[derive(Debug, Clone)]
pub struct DryRunDevice {
    host: String,
}

impl DryRunDevice {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn execute(&self, cmd: &Command) -> Response {
        info!(host = %self.host, command = %cmd, "dry-run");
        Response::default()
    }
}
