// ── Onboarding results ──

use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;
use strum::{AsRefStr, Display};

use super::runbook::Runbook;
use crate::error::CoreError;

/// Stages of a device onboarding, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OnboardingStep {
    Connect,
    Filter,
    Bootstrap,
    Discovery,
    Firewall,
    SectorConfig,
    LeaseScript,
    CallHome,
    Register,
}

/// Directory records written for an onboarded device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub device_id: i64,
    pub router_id: i64,
}

/// A device that went through every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardedDevice {
    pub ip: Ipv4Addr,
    pub identity: String,
    pub api_port: u16,
    pub mgmt_interface: Option<String>,
    pub registration: Option<Registration>,
}

/// A candidate that was skipped on purpose (e.g. MAC filter mismatch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCandidate {
    pub ip: Ipv4Addr,
    pub reason: String,
}

/// A candidate whose onboarding stopped at `step`.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateFailure {
    pub ip: Ipv4Addr,
    pub step: OnboardingStep,
    pub error: String,
    /// Manual steps still to do, when the sector configuration gave up.
    pub runbook: Option<Runbook>,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed at {}: {}", self.ip, self.step, self.error)
    }
}

/// Per-candidate result of one onboarding attempt.
#[derive(Debug)]
pub enum CandidateOutcome {
    Completed(OnboardedDevice),
    Skipped(SkippedCandidate),
}

/// Error half of a single-device onboarding.
#[derive(Debug)]
pub struct OnboardingFailure {
    pub step: OnboardingStep,
    pub error: CoreError,
    pub runbook: Option<Runbook>,
}

impl OnboardingFailure {
    pub(crate) fn at(step: OnboardingStep, error: CoreError) -> Self {
        Self {
            step,
            error,
            runbook: None,
        }
    }

    pub fn into_candidate(self, ip: Ipv4Addr) -> CandidateFailure {
        CandidateFailure {
            ip,
            step: self.step,
            error: self.error.to_string(),
            runbook: self.runbook,
        }
    }

    /// Flatten into a core error, keeping host and stage.
    pub fn into_error(self, ip: Ipv4Addr) -> CoreError {
        CoreError::Onboarding {
            host: ip.to_string(),
            step: self.step.to_string(),
            message: self.error.to_string(),
        }
    }
}

/// Summary of a subnet scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub subnet: String,
    /// Hosts probed.
    pub scanned: usize,
    /// Hosts with the API port open.
    pub candidates: Vec<Ipv4Addr>,
    pub completed: Vec<OnboardedDevice>,
    pub skipped: Vec<SkippedCandidate>,
    pub failed: Vec<CandidateFailure>,
}

impl ScanReport {
    pub fn new(subnet: impl Into<String>) -> Self {
        Self {
            subnet: subnet.into(),
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_flattens_with_stage_name() {
        let failure = OnboardingFailure::at(
            OnboardingStep::SectorConfig,
            CoreError::config("routeros.config.lan_bridge is required"),
        );
        let err = failure.into_error(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            err.to_string(),
            "Onboarding of 10.0.0.2 failed at sector_config: Configuration error: routeros.config.lan_bridge is required"
        );
    }

    #[test]
    fn step_names_are_snake_case() {
        assert_eq!(OnboardingStep::LeaseScript.as_ref(), "lease_script");
        assert_eq!(OnboardingStep::CallHome.to_string(), "call_home");
    }
}
