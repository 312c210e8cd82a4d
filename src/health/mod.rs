//! Egress Health Gate.
//!
//! Classifies a server as usable or not from a status snapshot fetched from
//! the VPN provider, and persists the verdict:
//! - `Healthy` stores the health string and clears any skip
//! - `Unhealthy` stores a durable skip with the provider's warning text
//! - `Unknown` (snapshot unavailable) stores nothing
//!
//! The snapshot is fetched at most once per run by the caller and passed in
//! explicitly; the gate itself holds no cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::store::{HealthRecord, StoreHandle};

/// Health value the provider reports for a server accepting connections.
pub const HEALTH_OK: &str = "ok";

/// Skip reason used when the server is missing from the status data.
pub const NOT_FOUND_REASON: &str = "not found in status data";

/// One server entry from the provider's status listing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerStatus {
    pub public_name: String,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// The full status listing as fetched once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub servers: Vec<ServerStatus>,
}

impl StatusSnapshot {
    pub fn new(servers: Vec<ServerStatus>) -> Self {
        Self { servers }
    }

    pub fn find(&self, server_name: &str) -> Option<&ServerStatus> {
        self.servers.iter().find(|s| s.public_name == server_name)
    }
}

/// Source of provider status snapshots.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn fetch_status(&self) -> Result<StatusSnapshot>;
}

/// AirVPN `status` API client.
pub struct AirVpnStatus {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl AirVpnStatus {
    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl HealthSource for AirVpnStatus {
    async fn fetch_status(&self) -> Result<StatusSnapshot> {
        let mut request = self.client.get(&self.url).query(&[("format", "json")]);
        if let Some(ref key) = self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        request
            .send()
            .await
            .context("Failed to send status request")?
            .error_for_status()
            .context("Status API returned error status")?
            .json::<StatusSnapshot>()
            .await
            .context("Failed to parse status response")
    }
}

/// Outcome of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
    Unknown,
}

/// Classify one server against a snapshot without side effects.
pub fn classify(snapshot: &StatusSnapshot, server_name: &str) -> (HealthStatus, HealthRecord) {
    match snapshot.find(server_name) {
        Some(entry) if entry.health.as_deref() == Some(HEALTH_OK) => {
            (HealthStatus::Healthy, HealthRecord::healthy(HEALTH_OK))
        }
        Some(entry) => {
            let reason = entry
                .warning
                .clone()
                .filter(|w| !w.trim().is_empty())
                .or_else(|| entry.health.as_ref().map(|h| format!("health: {}", h)))
                .unwrap_or_else(|| "unhealthy via status data".to_string());
            (
                HealthStatus::Unhealthy(reason.clone()),
                HealthRecord::unhealthy(entry.health.clone(), reason),
            )
        }
        None => (
            HealthStatus::Unhealthy(NOT_FOUND_REASON.to_string()),
            HealthRecord::unhealthy(None, NOT_FOUND_REASON),
        ),
    }
}

/// Persists health verdicts into the progress store.
#[derive(Clone)]
pub struct HealthGate {
    store: StoreHandle,
}

impl HealthGate {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Check `server_name` against `snapshot`.
    ///
    /// `None` means the snapshot could not be fetched: the result is
    /// `Unknown` and nothing is written, so the server stays eligible.
    pub async fn check_health(
        &self,
        server_name: &str,
        snapshot: Option<&StatusSnapshot>,
    ) -> Result<HealthStatus> {
        let Some(snapshot) = snapshot else {
            debug!(server = server_name, "status snapshot unavailable");
            return Ok(HealthStatus::Unknown);
        };

        let (status, record) = classify(snapshot, server_name);
        if let HealthStatus::Unhealthy(ref reason) = status {
            warn!(server = server_name, reason = %reason, "server unhealthy, skipping");
        }

        let name = server_name.to_string();
        self.store
            .call(move |s| s.record_health(&name, &record))
            .await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProgressStore;

    fn entry(name: &str, health: &str, warning: Option<&str>) -> ServerStatus {
        ServerStatus {
            public_name: name.into(),
            health: Some(health.into()),
            warning: warning.map(String::from),
            country_code: None,
            location: None,
        }
    }

    fn gate() -> (HealthGate, StoreHandle) {
        let store = StoreHandle::new(ProgressStore::new_in_memory().unwrap());
        (HealthGate::new(store.clone()), store)
    }

    #[test]
    fn test_snapshot_deserializes_provider_json() {
        let json = r#"{"servers":[
            {"public_name":"Alathfar","country_code":"nl","health":"ok","warning":""},
            {"public_name":"Castor","health":"warning","warning":"High load"}
        ],"routing":[]}"#;
        let snapshot: StatusSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.servers.len(), 2);
        assert_eq!(snapshot.find("Castor").unwrap().warning.as_deref(), Some("High load"));
        assert!(snapshot.find("Nope").is_none());
    }

    #[test]
    fn test_classify_uses_warning_text_as_reason() {
        let snapshot = StatusSnapshot::new(vec![entry("Castor", "error", Some("Maintenance"))]);
        let (status, record) = classify(&snapshot, "Castor");
        assert_eq!(status, HealthStatus::Unhealthy("Maintenance".into()));
        assert_eq!(record.health.as_deref(), Some("error"));
    }

    #[test]
    fn test_classify_blank_warning_falls_back_to_health() {
        let snapshot = StatusSnapshot::new(vec![entry("Castor", "error", Some(""))]);
        let (status, _) = classify(&snapshot, "Castor");
        assert_eq!(status, HealthStatus::Unhealthy("health: error".into()));
    }

    #[tokio::test]
    async fn test_healthy_server_persists_health_and_stays_usable() -> Result<()> {
        let (gate, store) = gate();
        let snapshot = StatusSnapshot::new(vec![entry("Alathfar", "ok", None)]);

        let status = gate.check_health("Alathfar", Some(&snapshot)).await?;
        assert_eq!(status, HealthStatus::Healthy);

        let server = store.call(|s| s.get_server("Alathfar")).await?.unwrap();
        assert_eq!(server.health.as_deref(), Some("ok"));
        assert!(!server.skip);
        Ok(())
    }

    #[tokio::test]
    async fn test_unhealthy_server_gets_durable_skip() -> Result<()> {
        let (gate, store) = gate();
        let snapshot = StatusSnapshot::new(vec![entry("Castor", "warning", Some("High load"))]);

        let status = gate.check_health("Castor", Some(&snapshot)).await?;
        assert_eq!(status, HealthStatus::Unhealthy("High load".into()));

        let server = store.call(|s| s.get_server("Castor")).await?.unwrap();
        assert!(server.skip);
        assert_eq!(server.skip_reason.as_deref(), Some("High load"));
        assert!(!store.call(|s| s.usable_servers()).await?.contains("Castor"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_server_is_unhealthy_not_found() -> Result<()> {
        let (gate, store) = gate();
        let snapshot = StatusSnapshot::new(vec![entry("Alathfar", "ok", None)]);

        let status = gate.check_health("Ghost", Some(&snapshot)).await?;
        assert_eq!(status, HealthStatus::Unhealthy(NOT_FOUND_REASON.into()));
        let server = store.call(|s| s.get_server("Ghost")).await?.unwrap();
        assert_eq!(server.skip_reason.as_deref(), Some(NOT_FOUND_REASON));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_writes_nothing() -> Result<()> {
        let (gate, store) = gate();
        store
            .call(|s| s.upsert_server_location("Alathfar", Some("NL"), None))
            .await?;

        let status = gate.check_health("Alathfar", None).await?;
        assert_eq!(status, HealthStatus::Unknown);

        let server = store.call(|s| s.get_server("Alathfar")).await?.unwrap();
        assert!(!server.skip);
        assert!(server.last_status_check.is_none());
        Ok(())
    }
}
