//! Provisioning engine between `edgeprov-api` and the `edgeprov` binary.
//!
//! - **[`Dispatcher`]**: persisted provisioning jobs driven through
//!   `queued → running → success | failed` with a retry ceiling. Handlers
//!   are looked up by [`JobType`] in a [`HandlerRegistry`] assembled from
//!   per-area `register_*` functions.
//!
//! - **[`reconcile`]**: idempotent `ensure_*` primitives. RouterOS has no
//!   upsert, so each one finds, diffs, creates, and falls back to an update
//!   when a create loses to an existing entry.
//!
//! - **[`onboarding`]**: subnet scan, bootstrap, firewall, sector
//!   configuration with one reconnect-and-retry, lease and call-home
//!   scripts, and directory registration, driven by [`Orchestrator`].
//!
//! - **[`mac_onboarding`]**: the DHCP lease webhook's MAC profile upserts
//!   and auto-created drafts.
//!
//! - **[`merge`]**: remote profile layered over the local document.

pub mod connector;
pub mod dispatch;
pub mod error;
pub mod mac_onboarding;
pub mod merge;
pub mod model;
pub mod onboarding;
pub mod reconcile;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use connector::{DeviceConnector, DeviceEntry, SimulatedFleet, StaticDeviceDirectory, TcpConnector};
pub use dispatch::{BatchReport, Dispatcher, HandlerRegistry, JobContext, JobHandler};
pub use error::CoreError;
pub use mac_onboarding::{
    BackOffice, LeaseEvent, LeaseOutcome, MacOnboarding, MacOnboardingSettings, MemoryBackOffice, WebhookError,
};
pub use merge::merge;
pub use model::{
    DEFAULT_MAX_ATTEMPTS, JobId, JobState, JobTarget, JobType, MacAddress, MacProfile, MacState, ProvisioningJob,
};
pub use onboarding::{
    Directory, MemoryDirectory, OdooDirectory, OnboardingConfig, OnboardingSecrets, Orchestrator, Runbook,
    ScanReport, SectorPlan, load_profile,
};
pub use reconcile::EnsureOutcome;
pub use store::{FileJobStore, JobStore, MemoryJobStore};
