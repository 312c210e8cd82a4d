use serde::{Deserialize, Serialize};

/// A VPN exit point and its last known health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EgressServer {
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub health: Option<String>,
    pub skip: bool,
    pub skip_reason: Option<String>,
    pub last_status_check: Option<String>,
}

impl EgressServer {
    /// `"CC-City"` when both are known, whichever part is known otherwise.
    pub fn location(&self) -> String {
        match (&self.country, &self.city) {
            (Some(country), Some(city)) => format!("{}-{}", country, city),
            (Some(country), None) => country.clone(),
            (None, Some(city)) => city.clone(),
            (None, None) => "-".to_string(),
        }
    }
}

/// One action taken against a target through one server. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClickAttempt {
    pub id: i64,
    pub target_link: String,
    pub server_name: String,
    pub timestamp: String,
    pub success: bool,
}

/// A target link and its stored goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub link: String,
    pub personality_goal: Option<String>,
    pub target_views: Option<i64>,
}

/// Health observation to persist for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    /// Health string as reported by the status source; `None` if the
    /// server was absent from the status data.
    pub health: Option<String>,
    pub skip: bool,
    pub skip_reason: Option<String>,
}

impl HealthRecord {
    pub fn healthy(health: impl Into<String>) -> Self {
        Self {
            health: Some(health.into()),
            skip: false,
            skip_reason: None,
        }
    }

    pub fn unhealthy(health: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            health,
            skip: true,
            skip_reason: Some(reason.into()),
        }
    }
}
