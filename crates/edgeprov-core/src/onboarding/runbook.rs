// ── Manual configuration runbook ──

use std::fmt;

use edgeprov_api::Command;
use serde::Serialize;

use super::plan::{SectorStep, render_steps};

/// What an operator has to finish by hand after automatic sector
/// configuration gave up on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Runbook {
    pub host: String,
    pub identity: String,
    pub reason: String,
    /// Unmet steps, one line each.
    pub steps: Vec<String>,
    /// Terminal commands covering the unmet steps.
    pub commands: Vec<String>,
}

impl Runbook {
    pub fn new(host: impl Into<String>, identity: impl Into<String>, reason: impl Into<String>, unmet: &[SectorStep]) -> Self {
        Self {
            host: host.into(),
            identity: identity.into(),
            reason: reason.into(),
            steps: unmet.iter().map(ToString::to_string).collect(),
            commands: render_steps(unmet),
        }
    }

    /// Runbook for work outside the sector plan, e.g. the check-in script.
    pub fn manual(
        host: impl Into<String>,
        identity: impl Into<String>,
        reason: impl Into<String>,
        steps: Vec<String>,
        commands: &[Command],
    ) -> Self {
        Self {
            host: host.into(),
            identity: identity.into(),
            reason: reason.into(),
            steps,
            commands: commands.iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Display for Runbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manual configuration required for {} ({})", self.host, self.identity)?;
        writeln!(f, "Reason: {}", self.reason)?;
        writeln!(f, "Unmet steps:")?;
        for step in &self.steps {
            writeln!(f, "  - {step}")?;
        }
        writeln!(f, "Run in the device terminal:")?;
        for cmd in &self.commands {
            writeln!(f, "  {cmd}")?;
        }
        Ok(())
    }
}
