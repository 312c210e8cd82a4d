//! Per-link progress: `egress-rotator status <link>`.

use anyhow::Result;
use console::style;

use egress_rotator::config::Config;

use super::open_store;

pub async fn cmd_status(config: &Config, link: &str) -> Result<()> {
    let store = open_store(config)?;
    let owned = link.to_string();
    let (target, views, attempts) = store
        .call(move |s| {
            Ok((
                s.get_target(&owned)?,
                s.view_count_for_link(&owned)?,
                s.click_attempts_for_link(&owned)?,
            ))
        })
        .await?;

    println!("Link: {}", style(link).cyan());
    match target {
        Some(t) => {
            println!(
                "  Personality goal: {}",
                t.personality_goal.as_deref().unwrap_or("(none)")
            );
            match t.target_views {
                Some(goal) => println!("  View goal: {}", goal),
                None => println!("  View goal: (not set)"),
            }
        }
        None => println!("  No goal stored for this link"),
    }
    println!("  Views added by rotation: {}", style(views).green().bold());
    println!(
        "  Attempts recorded: {} ({} failed)",
        attempts.len(),
        attempts.iter().filter(|a| !a.success).count()
    );
    if let Some(last) = attempts.last() {
        println!("  Last attempt: {} via {}", last.timestamp, last.server_name);
    }
    Ok(())
}
