//! Pool maintenance: `sync`, `servers`, `health`, `reset`.

use anyhow::{Context, Result};
use console::style;

use egress_rotator::config::Config;
use egress_rotator::health::{AirVpnStatus, HealthGate, HealthSource, HealthStatus};
use egress_rotator::pool::sync_pool;
use egress_rotator::ui::icons::{CHECK, CROSS, WARN};

use super::open_store;

pub async fn cmd_sync(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let dir = config.config_dir.clone();
    let report = store.call(move |s| sync_pool(s, &dir)).await?;

    for file in &report.unparsed {
        println!("{}Could not parse config name: {}", WARN, style(file).dim());
    }
    println!(
        "{}Synced {} server(s) from {}",
        CHECK,
        report.synced.len(),
        config.config_dir.display()
    );
    Ok(())
}

pub async fn cmd_servers(config: &Config, skipped_only: bool, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let servers = store.call(move |s| s.list_servers(skipped_only)).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&servers).context("Failed to serialize servers")?
        );
        return Ok(());
    }

    if servers.is_empty() {
        if skipped_only {
            println!("No skipped servers");
        } else {
            println!("No servers known. Run 'egress-rotator sync' first.");
        }
        return Ok(());
    }

    for server in &servers {
        let name = if server.skip {
            style(server.name.as_str()).red()
        } else {
            style(server.name.as_str()).green()
        };
        let mut line = format!(
            "  {:<16} {:<24} health={}",
            name,
            server.location(),
            server.health.as_deref().unwrap_or("-")
        );
        if server.skip {
            line.push_str(&format!(
                "  skipped: {}",
                server.skip_reason.as_deref().unwrap_or("(no reason)")
            ));
        }
        println!("{}", line);
    }
    let skipped = servers.iter().filter(|s| s.skip).count();
    println!();
    println!("{} server(s), {} skipped", servers.len(), skipped);
    Ok(())
}

pub async fn cmd_health(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let source = AirVpnStatus::new(
        config.http_client()?,
        config.status_url.clone(),
        config.api_key.clone(),
    );
    let snapshot = source
        .fetch_status()
        .await
        .context("Failed to fetch server status")?;

    let servers = store.call(|s| s.list_servers(false)).await?;
    if servers.is_empty() {
        println!("No servers known. Run 'egress-rotator sync' first.");
        return Ok(());
    }

    let gate = HealthGate::new(store);
    let mut healthy = 0;
    for server in &servers {
        match gate.check_health(&server.name, Some(&snapshot)).await? {
            HealthStatus::Healthy => {
                healthy += 1;
                println!("{}{}", CHECK, style(&server.name).green());
            }
            HealthStatus::Unhealthy(reason) => {
                println!("{}{}: {}", CROSS, style(&server.name).red(), reason);
            }
            // Only reachable without a snapshot.
            HealthStatus::Unknown => {}
        }
    }
    println!();
    println!(
        "{} healthy, {} skipped",
        healthy,
        servers.len() - healthy
    );
    Ok(())
}

pub async fn cmd_reset(config: &Config, name: Option<&str>, all: bool, yes: bool) -> Result<()> {
    use dialoguer::Confirm;

    let store = open_store(config)?;

    if all {
        if !yes {
            let confirm = Confirm::new()
                .with_prompt("Clear the skip flag on every server?")
                .default(false)
                .interact()
                .unwrap_or(false);
            if !confirm {
                println!("Reset cancelled");
                return Ok(());
            }
        }
        let cleared = store.call(|s| s.clear_all_skips()).await?;
        println!("{}Re-enabled {} server(s)", CHECK, cleared);
        return Ok(());
    }

    let Some(name) = name else {
        anyhow::bail!("Specify a server name or --all");
    };
    let owned = name.to_string();
    if store.call(move |s| s.clear_skip(&owned)).await? {
        println!("{}Re-enabled {}", CHECK, style(name).green());
        Ok(())
    } else {
        anyhow::bail!("Unknown server: {}", name)
    }
}
