//! [`Member`] — a candidate uplink tracked by the daemon.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The kind of uplink a [`Member`] represents.
///
/// A small enum plus a per-class adapter table, not an inheritance
/// hierarchy — classification is immutable once assigned; a
/// re-classified interface is retired and re-created rather than mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberClass {
    Starlink,
    Cellular,
    #[serde(rename = "wifi")]
    WiFi,
    Lan,
    Vpn,
    Generic,
}

impl MemberClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberClass::Starlink => "starlink",
            MemberClass::Cellular => "cellular",
            MemberClass::WiFi => "wifi",
            MemberClass::Lan => "lan",
            MemberClass::Vpn => "vpn",
            MemberClass::Generic => "generic",
        }
    }
}

/// Health/eligibility state machine driven by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    Up,
    Degraded,
    Down,
}

impl Default for MemberState {
    fn default() -> Self {
        MemberState::Down
    }
}

/// A managed uplink. See the module invariants: `name` is unique for the
/// lifetime of the process and `class` is immutable once assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub class: MemberClass,
    /// OS interface handle, e.g. `wwan0`.
    pub iface: String,
    /// Tie-breaker weight, higher wins.
    pub weight: i32,
    pub eligible: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub state: MemberState,
    /// Monotonic instant the member most recently became eligible, used to
    /// enforce `min_uptime_s`. `None` while ineligible.
    #[serde(skip)]
    pub eligible_since: Option<std::time::Instant>,
    /// Monotonic instant of the last switch *away from* this member while
    /// active, used to enforce `cooldown_s`.
    #[serde(skip)]
    pub last_switch_at: Option<std::time::Instant>,
    pub class_params: HashMap<String, String>,
}

impl Member {
    pub fn new(name: impl Into<String>, class: MemberClass, iface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class,
            iface: iface.into(),
            weight: 0,
            eligible: false,
            created_at: chrono::Utc::now(),
            state: MemberState::Down,
            eligible_since: None,
            last_switch_at: None,
            class_params: HashMap::new(),
        }
    }
}
