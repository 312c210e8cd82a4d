//! Public egress IP lookup with a primary source and a silent fallback.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// The current public IP as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressIp {
    pub ip: String,
    /// Whether the primary source confirmed the address is on the VPN network.
    pub on_expected_network: bool,
}

#[async_trait]
pub trait EgressIpSource: Send + Sync {
    async fn current_ip(&self) -> Result<EgressIp>;
}

#[derive(Debug, Deserialize)]
struct AirVpnWhatIsMyIp {
    #[serde(default)]
    airvpn: bool,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpifyResponse {
    ip: String,
}

/// AirVPN `whatismyip` as primary, ipify as fallback.
pub struct HttpEgressIp {
    client: reqwest::Client,
    primary_url: String,
    fallback_url: String,
    api_key: Option<String>,
}

impl HttpEgressIp {
    pub fn new(
        client: reqwest::Client,
        primary_url: impl Into<String>,
        fallback_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            primary_url: primary_url.into(),
            fallback_url: fallback_url.into(),
            api_key,
        }
    }

    async fn primary(&self) -> Result<EgressIp> {
        let mut request = self
            .client
            .get(&self.primary_url)
            .query(&[("format", "json")]);
        if let Some(ref key) = self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        let body = request
            .send()
            .await
            .context("Failed to send primary IP request")?
            .error_for_status()
            .context("Primary IP source returned error status")?
            .json::<AirVpnWhatIsMyIp>()
            .await
            .context("Failed to parse primary IP response")?;
        parse_primary(body)
    }

    async fn fallback(&self) -> Result<EgressIp> {
        let body = self
            .client
            .get(&self.fallback_url)
            .send()
            .await
            .context("Failed to send fallback IP request")?
            .error_for_status()
            .context("Fallback IP source returned error status")?
            .json::<IpifyResponse>()
            .await
            .context("Failed to parse fallback IP response")?;
        Ok(EgressIp {
            ip: body.ip,
            on_expected_network: false,
        })
    }
}

fn parse_primary(body: AirVpnWhatIsMyIp) -> Result<EgressIp> {
    if !body.airvpn {
        bail!("Not connected through the VPN network");
    }
    match body.ip {
        Some(ip) if !ip.is_empty() => Ok(EgressIp {
            ip,
            on_expected_network: true,
        }),
        _ => bail!("Primary IP response carried no address"),
    }
}

#[async_trait]
impl EgressIpSource for HttpEgressIp {
    async fn current_ip(&self) -> Result<EgressIp> {
        match self.primary().await {
            Ok(ip) => Ok(ip),
            Err(e) => {
                debug!(error = %e, "primary IP source failed, using fallback");
                self.fallback().await
            }
        }
    }
}
