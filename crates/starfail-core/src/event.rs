//! Append-only [`Event`] log, totally ordered by a monotonic sequence number.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Discovered,
    Retired,
    Score,
    Switch,
    Restore,
    KillSwitch,
    ConfigReload,
    ControllerError,
    RpcCall,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub member: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub reason: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event_type: EventType) -> EventBuilder {
        EventBuilder {
            event_type,
            member: None,
            from: None,
            to: None,
            reason: None,
            payload: None,
        }
    }
}

/// Builder so call sites only set the fields relevant to their event type,
/// matching the teacher's `serde_json::json!` ad-hoc construction but kept
/// strongly typed.
pub struct EventBuilder {
    event_type: EventType,
    member: Option<String>,
    from: Option<String>,
    to: Option<String>,
    reason: Option<String>,
    payload: Option<serde_json::Value>,
}

impl EventBuilder {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn member(mut self, m: impl Into<String>) -> Self {
        self.member = Some(m.into());
        self
    }
    pub fn from(mut self, m: impl Into<String>) -> Self {
        self.from = Some(m.into());
        self
    }
    pub fn to(mut self, m: impl Into<String>) -> Self {
        self.to = Some(m.into());
        self
    }
    pub fn reason(mut self, r: impl Into<String>) -> Self {
        self.reason = Some(r.into());
        self
    }
    pub fn payload(mut self, p: serde_json::Value) -> Self {
        self.payload = Some(p);
        self
    }

    pub(crate) fn build(self, seq: u64) -> Event {
        Event {
            seq,
            timestamp: chrono::Utc::now(),
            event_type: self.event_type,
            member: self.member,
            from: self.from,
            to: self.to,
            reason: self.reason,
            payload: self.payload,
        }
    }
}
