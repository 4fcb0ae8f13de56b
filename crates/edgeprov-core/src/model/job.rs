// ── Provisioning job types ──

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// Default retry ceiling for new jobs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ── JobId ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── JobType ─────────────────────────────────────────────────────────

/// Closed set of provisioning job kinds. Handlers are attached at startup
/// by per-area registration functions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    // Subscriber lifecycle
    ActivateSubscription,
    SuspendSubscription,
    ReconnectSubscription,
    TerminateSubscription,
    ChangePlan,
    DisconnectSession,
    ActivatePppoe,
    ActivateDhcp,
    EnsureQueue,
    // Router maintenance
    DeviceHealthcheck,
    ExportConfigSnapshot,
    // Captive portal
    CaptiveUserCreate,
    CaptiveUserDisable,
    WalledGardenApply,
}

// ── JobState ────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

// ── JobTarget ───────────────────────────────────────────────────────

/// What a job acts on. Keys are directory names (device name, sector
/// code, subscription reference), never connection details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

impl JobTarget {
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            device: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn sector(code: impl Into<String>) -> Self {
        Self {
            sector: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn with_subscription(mut self, reference: impl Into<String>) -> Self {
        self.subscription = Some(reference.into());
        self
    }
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(d) = &self.device {
            parts.push(format!("device={d}"));
        }
        if let Some(s) = &self.sector {
            parts.push(format!("sector={s}"));
        }
        if let Some(s) = &self.subscription {
            parts.push(format!("subscription={s}"));
        }
        if parts.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

// ── ProvisioningJob ─────────────────────────────────────────────────

/// One persisted unit of device work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningJob {
    pub id: JobId,
    pub job_type: JobType,
    #[serde(default)]
    pub target: JobTarget,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl ProvisioningJob {
    pub fn new(job_type: JobType, target: JobTarget, payload: Map<String, Value>) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            target,
            state: JobState::Queued,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error_message: None,
            payload,
            requested_at: Utc::now(),
            executed_at: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
