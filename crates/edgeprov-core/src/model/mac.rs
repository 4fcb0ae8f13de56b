// ── MAC addresses and access profiles ──

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to uppercase colon-separated form
/// (`AA:BB:CC:DD:EE:FF`), the way RouterOS prints `mac-address`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize colon, dash, dot (Cisco) or bare-hex input. Anything that
    /// is not 12 hex digits is kept as trimmed uppercase text.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let hex: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        if hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            let upper = hex.to_ascii_uppercase();
            let pairs: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
            Self(pairs.join(":"))
        } else {
            Self(trimmed.to_ascii_uppercase())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex digits without separators (`aabbccddeeff`).
    pub fn compact_lower(&self) -> String {
        self.0.replace(':', "").to_ascii_lowercase()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── MacProfile ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacState {
    Online,
    Offline,
}

/// Last-seen record for a MAC address reported by a lease webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacProfile {
    pub mac_address: MacAddress,
    pub sector: Option<String>,
    pub state: MacState,
    pub last_seen_ip: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub hostname: Option<String>,
    pub subscription: Option<String>,
    pub plan: Option<String>,
}
