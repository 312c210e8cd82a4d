//! Target-side oracles: the displayed view count and the click itself.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

// The counter is rendered as <div class="viewText">...<span>N</span>.
static VIEW_COUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div[^>]*class\s*=\s*"[^"]*\bviewText\b[^"]*"[^>]*>.*?<span[^>]*>\s*([\d,]+)\s*</span>"#)
        .unwrap()
});

/// Extract the displayed view count from a target page.
pub fn parse_view_count(html: &str) -> Option<i64> {
    let caps = VIEW_COUNT_REGEX.captures(html)?;
    caps.get(1)?.as_str().replace(',', "").parse().ok()
}

#[async_trait]
pub trait ViewCountOracle: Send + Sync {
    /// Currently displayed count, or `None` when unavailable.
    async fn live_view_count(&self, link: &str) -> Option<i64>;
}

#[async_trait]
pub trait ClickOracle: Send + Sync {
    /// Register one view. `true` on success.
    async fn click(&self, link: &str) -> bool;
}

/// Both oracles over plain HTTP GETs.
#[derive(Clone)]
pub struct HttpTarget {
    client: reqwest::Client,
}

impl HttpTarget {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_page(&self, link: &str) -> Result<String> {
        self.client
            .get(link)
            .send()
            .await
            .context("Failed to fetch target page")?
            .error_for_status()
            .context("Target page returned error status")?
            .text()
            .await
            .context("Failed to read target page body")
    }
}

#[async_trait]
impl ViewCountOracle for HttpTarget {
    async fn live_view_count(&self, link: &str) -> Option<i64> {
        match self.fetch_page(link).await {
            Ok(html) => {
                let count = parse_view_count(&html);
                if count.is_none() {
                    warn!(link, "view count element not found");
                }
                count
            }
            Err(e) => {
                warn!(link, error = %e, "failed to fetch live view count");
                None
            }
        }
    }
}

#[async_trait]
impl ClickOracle for HttpTarget {
    async fn click(&self, link: &str) -> bool {
        match self.client.get(link).send().await {
            Ok(resp) => {
                debug!(status = %resp.status(), "click response");
                resp.status() == reqwest::StatusCode::OK
            }
            Err(e) => {
                debug!(error = %e, "click request failed");
                false
            }
        }
    }
}
