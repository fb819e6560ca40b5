use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Search filters negotiated upstream by the conversational agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilters {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    /// Maximum unit price in major currency units
    #[serde(default)]
    pub budget: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub filters: SessionFilters,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
