pub mod job;
pub mod mac;
pub mod payload;

pub use job::{DEFAULT_MAX_ATTEMPTS, JobId, JobState, JobTarget, JobType, ProvisioningJob};
pub use mac::{MacAddress, MacProfile, MacState};
pub use payload::{
    CaptivePayload, ServiceType, SubscriptionPayload, WalledGardenPayload, non_empty,
    parse_payload,
};
