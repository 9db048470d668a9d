//! [`Decision`] — a proposed active-member switch emitted by the engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Initial,
    ScoreMargin,
    KillSwitch,
    Predictive,
    Manual,
    Recovery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub from_member: Option<String>,
    pub to_member: String,
    pub reason: DecisionReason,
    pub score_delta: f64,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}
