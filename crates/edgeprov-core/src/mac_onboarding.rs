// ── MAC onboarding ──
//
// DHCP lease events pushed by the lease script. Each event upserts the
// MAC's last-seen profile and, when enabled, creates a draft subscription
// and a disabled captive user for a MAC nobody has claimed yet.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::CoreError;
use crate::model::{JobId, JobTarget, JobType, MacAddress, MacProfile, MacState, non_empty};

const DEFAULT_CAPTIVE_PROFILE: &str = "default";

/// Behaviour switches of the lease webhook.
#[derive(Debug, Clone)]
pub struct MacOnboardingSettings {
    /// Shared secret expected from the lease script. Requests are refused
    /// while unset.
    pub token: Option<SecretString>,
    /// Create a draft subscription for MACs without one.
    pub auto_create: bool,
    /// Plan for auto-created subscriptions; nothing is created without it.
    pub default_plan: Option<String>,
    pub auto_create_captive_user: bool,
    pub captive_profile: String,
    /// Queue `captive_user_create` when a device serves the sector.
    pub auto_provision_captive: bool,
}

impl Default for MacOnboardingSettings {
    fn default() -> Self {
        Self {
            token: None,
            auto_create: false,
            default_plan: None,
            auto_create_captive_user: false,
            captive_profile: DEFAULT_CAPTIVE_PROFILE.into(),
            auto_provision_captive: false,
        }
    }
}

/// Query parameters of one lease event. RouterOS lease variable names are
/// accepted next to the short ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaseEvent {
    pub token: Option<String>,
    pub mac: Option<String>,
    #[serde(rename = "leaseActMAC")]
    pub lease_mac: Option<String>,
    pub ip: Option<String>,
    #[serde(rename = "leaseActIP")]
    pub lease_ip: Option<String>,
    pub bound: Option<String>,
    #[serde(rename = "leaseBound")]
    pub lease_bound: Option<String>,
    pub sector: Option<String>,
    pub hostname: Option<String>,
}

impl LeaseEvent {
    fn pick<'a>(short: Option<&'a String>, lease: Option<&'a String>) -> Option<&'a str> {
        non_empty(short.map(String::as_str)).or_else(|| non_empty(lease.map(String::as_str)))
    }

    pub fn mac(&self) -> Option<&str> {
        Self::pick(self.mac.as_ref(), self.lease_mac.as_ref())
    }

    pub fn ip(&self) -> Option<&str> {
        Self::pick(self.ip.as_ref(), self.lease_ip.as_ref())
    }

    /// `0`, `false` and `no` mean the lease was released; anything else,
    /// including no value at all, means bound.
    pub fn is_bound(&self) -> bool {
        Self::pick(self.bound.as_ref(), self.lease_bound.as_ref())
            .is_none_or(|b| !matches!(b.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
    }
}

/// Why a lease event was refused.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("mac_onboarding_token not configured")]
    Unconfigured,

    #[error("unauthorized")]
    Unauthorized,

    #[error("mac required")]
    MissingMac,

    #[error("sector required for auto-create")]
    SectorRequired,

    #[error(transparent)]
    Backend(#[from] CoreError),
}

impl WebhookError {
    /// HTTP status the webhook answers with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Unconfigured => 403,
            Self::Unauthorized => 401,
            Self::MissingMac | Self::SectorRequired => 400,
            Self::Backend(_) => 500,
        }
    }
}

/// Subscription created in `draft` for a new MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftSubscription {
    pub mac_address: MacAddress,
    pub service_ip: Option<String>,
    pub sector: String,
    pub plan: String,
}

/// Captive portal account created for a new MAC, disabled until
/// provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptiveUser {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub profile: String,
    pub sector: Option<String>,
    pub disabled: bool,
}

impl CaptiveUser {
    /// Username derived from the MAC: `onu_` plus its lowercase hex digits.
    pub fn username_for(mac: &MacAddress) -> String {
        format!("onu_{}", mac.compact_lower())
    }
}

/// Records the webhook reads and writes in the back office.
pub trait BackOffice: Send + Sync {
    /// Whether the back office knows the sector code.
    fn has_sector(&self, code: &str) -> Result<bool, CoreError>;

    fn mac_profile(&self, mac: &MacAddress) -> Result<Option<MacProfile>, CoreError>;

    fn save_mac_profile(&self, profile: &MacProfile) -> Result<(), CoreError>;

    /// Store a draft subscription and return its reference.
    fn create_draft_subscription(&self, draft: &DraftSubscription) -> Result<String, CoreError>;

    fn has_captive_user(&self, username: &str) -> Result<bool, CoreError>;

    fn create_captive_user(&self, user: &CaptiveUser) -> Result<(), CoreError>;
}

/// What one accepted lease event changed.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseOutcome {
    pub profile: MacProfile,
    pub created: bool,
    pub subscription: Option<String>,
    pub captive_user: Option<String>,
    pub job: Option<JobId>,
}

/// Lease webhook service.
pub struct MacOnboarding {
    settings: MacOnboardingSettings,
    back_office: Arc<dyn BackOffice>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl std::fmt::Debug for MacOnboarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacOnboarding")
            .field("settings", &self.settings)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

impl MacOnboarding {
    pub fn new(settings: MacOnboardingSettings, back_office: Arc<dyn BackOffice>) -> Self {
        Self {
            settings,
            back_office,
            dispatcher: None,
        }
    }

    /// Queue captive provisioning jobs through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Check the shared token. The query parameter wins over the header.
    pub fn authorize(&self, event: &LeaseEvent, header_token: Option<&str>) -> Result<(), WebhookError> {
        let Some(expected) = self.settings.token.as_ref().filter(|t| !t.expose_secret().is_empty()) else {
            return Err(WebhookError::Unconfigured);
        };
        let given = non_empty(event.token.as_deref()).or(header_token);
        if given == Some(expected.expose_secret()) {
            Ok(())
        } else {
            Err(WebhookError::Unauthorized)
        }
    }

    /// Authorize and apply one lease event.
    pub fn handle(&self, event: &LeaseEvent, header_token: Option<&str>) -> Result<LeaseOutcome, WebhookError> {
        self.authorize(event, header_token)?;
        let mac = MacAddress::new(event.mac().ok_or(WebhookError::MissingMac)?);

        let sector = match non_empty(event.sector.as_deref()) {
            Some(code) if self.back_office.has_sector(code)? => Some(code.to_owned()),
            Some(code) => {
                warn!(%mac, sector = code, "unknown sector in lease event");
                None
            }
            None => None,
        };
        let state = if event.is_bound() {
            MacState::Online
        } else {
            MacState::Offline
        };

        let existing = self.back_office.mac_profile(&mac)?;
        let created = existing.is_none();
        let mut profile = existing.unwrap_or_else(|| MacProfile {
            mac_address: mac.clone(),
            sector: None,
            state,
            last_seen_ip: None,
            last_seen_at: Utc::now(),
            hostname: None,
            subscription: None,
            plan: None,
        });
        profile.sector.clone_from(&sector);
        profile.state = state;
        profile.last_seen_ip = event.ip().map(str::to_owned);
        profile.last_seen_at = Utc::now();
        profile.hostname = non_empty(event.hostname.as_deref()).map(str::to_owned);
        self.back_office.save_mac_profile(&profile)?;
        info!(%mac, state = ?profile.state, sector = sector.as_deref().unwrap_or("-"), created, "lease event");

        let mut outcome = LeaseOutcome {
            profile,
            created,
            subscription: None,
            captive_user: None,
            job: None,
        };

        if self.settings.auto_create && outcome.profile.subscription.is_none() {
            if let Some(plan) = non_empty(self.settings.default_plan.as_deref()) {
                let sector = outcome.profile.sector.clone().ok_or(WebhookError::SectorRequired)?;
                let reference = self.back_office.create_draft_subscription(&DraftSubscription {
                    mac_address: mac.clone(),
                    service_ip: outcome.profile.last_seen_ip.clone(),
                    sector,
                    plan: plan.to_owned(),
                })?;
                outcome.profile.subscription = Some(reference.clone());
                outcome.profile.plan = Some(plan.to_owned());
                self.back_office.save_mac_profile(&outcome.profile)?;
                info!(%mac, subscription = %reference, plan, "draft subscription created");
                outcome.subscription = Some(reference);
            }
        }

        if self.settings.auto_create_captive_user {
            self.captive_user(&mac, sector.as_deref(), &mut outcome)?;
        }

        Ok(outcome)
    }

    fn captive_user(&self, mac: &MacAddress, sector: Option<&str>, outcome: &mut LeaseOutcome) -> Result<(), CoreError> {
        let username = CaptiveUser::username_for(mac);
        if self.back_office.has_captive_user(&username)? {
            debug!(%mac, username, "captive user already exists");
            return Ok(());
        }
        let user = CaptiveUser {
            username: username.clone(),
            password: Uuid::new_v4().simple().to_string().chars().take(8).collect(),
            profile: non_empty(Some(self.settings.captive_profile.as_str()))
                .unwrap_or(DEFAULT_CAPTIVE_PROFILE)
                .to_owned(),
            sector: sector.map(str::to_owned),
            disabled: true,
        };
        self.back_office.create_captive_user(&user)?;
        info!(%mac, username, "captive user created");
        outcome.captive_user = Some(username);

        if !self.settings.auto_provision_captive {
            return Ok(());
        }
        let (Some(dispatcher), Some(sector)) = (&self.dispatcher, sector) else {
            return Ok(());
        };
        let target = JobTarget::sector(sector);
        if dispatcher.devices().resolve(&target).is_err() {
            debug!(%mac, sector, "no device serves the sector, captive user not provisioned");
            return Ok(());
        }
        let mut payload = Map::new();
        payload.insert("username".into(), json!(user.username));
        payload.insert("password".into(), json!(user.password));
        payload.insert("profile".into(), json!(user.profile));
        payload.insert("comment".into(), json!(sector));
        outcome.job = Some(dispatcher.enqueue(JobType::CaptiveUserCreate, target, payload)?);
        Ok(())
    }
}

// ── In-memory back office ───────────────────────────────────────────

#[derive(Debug, Default)]
struct BackOfficeState {
    profiles: BTreeMap<MacAddress, MacProfile>,
    subscriptions: Vec<(String, DraftSubscription)>,
    captive_users: BTreeMap<String, CaptiveUser>,
}

/// Back office held in memory, for the standalone webhook server and tests.
#[derive(Debug, Default)]
pub struct MemoryBackOffice {
    sectors: BTreeSet<String>,
    state: Mutex<BackOfficeState>,
}

impl MemoryBackOffice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sector(mut self, code: impl Into<String>) -> Self {
        self.sectors.insert(code.into());
        self
    }

    pub fn profiles(&self) -> Vec<MacProfile> {
        self.lock().profiles.values().cloned().collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, DraftSubscription)> {
        self.lock().subscriptions.clone()
    }

    pub fn captive_users(&self) -> Vec<CaptiveUser> {
        self.lock().captive_users.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackOfficeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BackOffice for MemoryBackOffice {
    fn has_sector(&self, code: &str) -> Result<bool, CoreError> {
        Ok(self.sectors.contains(code))
    }

    fn mac_profile(&self, mac: &MacAddress) -> Result<Option<MacProfile>, CoreError> {
        Ok(self.lock().profiles.get(mac).cloned())
    }

    fn save_mac_profile(&self, profile: &MacProfile) -> Result<(), CoreError> {
        self.lock()
            .profiles
            .insert(profile.mac_address.clone(), profile.clone());
        Ok(())
    }

    fn create_draft_subscription(&self, draft: &DraftSubscription) -> Result<String, CoreError> {
        let mut state = self.lock();
        let reference = format!("SUB-{:05}", state.subscriptions.len() + 1);
        state.subscriptions.push((reference.clone(), draft.clone()));
        Ok(reference)
    }

    fn has_captive_user(&self, username: &str) -> Result<bool, CoreError> {
        Ok(self.lock().captive_users.contains_key(username))
    }

    fn create_captive_user(&self, user: &CaptiveUser) -> Result<(), CoreError> {
        self.lock()
            .captive_users
            .insert(user.username.clone(), user.clone());
        Ok(())
    }
}
