//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::Path;

use edgeprov_core::JobId;
use serde_json::{Map, Value};

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
/// Without a terminal the prompt cannot be shown, so `--yes` is required.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes { action: action.into() });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// Parse a job ID argument.
pub fn parse_job_id(raw: &str) -> Result<JobId, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "id".into(),
        reason: format!("'{raw}' is not a job ID (expected a UUID)"),
    })
}

/// Parse a JSON payload that must be an object.
pub fn parse_payload(raw: &str, field: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: field.into(),
            reason: format!("expected a JSON object, got {}", kind(&other)),
        }),
    }
}

/// Read and parse a JSON object file for `--from-file` flags.
pub fn read_payload_file(path: &Path) -> Result<Map<String, Value>, CliError> {
    if !path.is_file() {
        return Err(CliError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    parse_payload(&contents, "from-file")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payload_must_be_an_object() {
        assert_eq!(parse_payload(r#"{"plan":"50M"}"#, "payload").unwrap()["plan"], "50M");
        let err = parse_payload("[1, 2]", "payload").unwrap_err();
        assert!(matches!(err, CliError::Validation { reason, .. } if reason.contains("an array")));
    }

    #[test]
    fn job_id_must_be_a_uuid() {
        assert!(parse_job_id("not-a-uuid").is_err());
        let id = JobId::new();
        assert_eq!(parse_job_id(&id.to_string()).unwrap(), id);
    }
}
