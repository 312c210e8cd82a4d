//! Rotation run: `egress-rotator run`.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use console::style;
use tracing::{info, warn};

use egress_rotator::config::Config;
use egress_rotator::controller::{
    Collaborators, ConnectionController, RunContext, establish_baseline,
};
use egress_rotator::egress::HttpEgressIp;
use egress_rotator::health::AirVpnStatus;
use egress_rotator::oracle::{HttpTarget, ViewCountOracle};
use egress_rotator::personality::{Personality, PersonalityMatch, resolve};
use egress_rotator::pool::enumerate_candidates;
use egress_rotator::report::{RunReport, RunTimer};
use egress_rotator::scheduler::RotationScheduler;
use egress_rotator::store::StoreHandle;
use egress_rotator::ui::RotationUI;
use egress_rotator::ui::icons::{CHECK, CROSS, EYES, GLOBE, SEARCH, TARGET, WARN};

use super::open_store;

pub struct RunArgs {
    pub link: Option<String>,
    pub personality: Option<String>,
    pub views: Option<i64>,
    pub limit: Option<i64>,
    pub dry_run: bool,
    pub bonus: bool,
    pub yes: bool,
}

/// The view goal chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Goal {
    personality: Option<Personality>,
    /// In-game view bonus declared for a personality that has a bonus goal.
    bonus: bool,
    views: i64,
}

pub async fn cmd_run(config: &Config, args: &RunArgs) -> Result<()> {
    let ctx = Arc::new(RunContext::new(
        config.tunnel.recover_command.clone(),
        config.tunnel.terminate_grace,
    ));
    let ui = OnceLock::new();

    // Polled first so the handlers are in place before anything blocks.
    let finished = tokio::select! {
        biased;
        _ = shutdown_signal() => None,
        result = execute(config, args, ctx.clone(), &ui) => Some(result),
    };

    match finished {
        Some(Err(e)) if is_interrupted(&e) => info!("prompt interrupted"),
        Some(result) => return result,
        None => {}
    }
    shut_down(&ctx, ui.get()).await;
    Ok(())
}

/// Interrupt path: tear down whatever is running and recover the network.
async fn shut_down(ctx: &RunContext, ui: Option<&Arc<RotationUI>>) {
    if let Some(ui) = ui {
        ui.finish();
    }
    println!();
    println!("Graceful shutdown initiated...");
    let report = ctx.cancel().await;
    if let Some(server) = report.terminated {
        println!("Disconnected from {}", server);
        if report.recovered {
            println!("{}Network recovered", CHECK);
        } else {
            println!("{}Network recovery did not complete", WARN);
        }
    }
    println!("Exiting.");
}

/// Ctrl-C at a terminal prompt surfaces as an interrupted read.
fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::Interrupted)
}

async fn execute(
    config: &Config,
    args: &RunArgs,
    ctx: Arc<RunContext>,
    ui_slot: &OnceLock<Arc<RotationUI>>,
) -> Result<()> {
    let timer = RunTimer::start();
    let client = config.http_client()?;
    let egress = Arc::new(HttpEgressIp::new(
        client.clone(),
        config.ip_check_url.clone(),
        config.fallback_ip_url.clone(),
        config.api_key.clone(),
    ));

    // Without a baseline there is no way to tell a tunnel apart from no tunnel.
    let baseline = establish_baseline(egress.as_ref()).await?;
    println!("{}Personal IP: {}", GLOBE, style(&baseline).dim());

    let link = match &args.link {
        Some(link) => link.trim().to_string(),
        None => prompt_link()?,
    };

    let target = Arc::new(HttpTarget::new(client.clone()));
    let live = target
        .live_view_count(&link)
        .await
        .context("Could not retrieve view count from page")?;
    println!("{}Live view count on page: {}", SEARCH, style(live).bold());

    let store = open_store(config)?;
    let owned = link.clone();
    let previous = store.call(move |s| s.view_count_for_link(&owned)).await?;
    if previous > 0 {
        println!("    Views previously added by rotation: {}", previous);
    }

    let goal = resolve_goal(&store, &link, args).await?;
    let mut goal_views = goal.views;
    if let Some(limit) = args.limit {
        let capped = live + limit.max(0);
        if capped < goal_views {
            println!(
                "{}Applying --limit: will only attempt to reach {} total views this run",
                WARN, capped
            );
            goal_views = capped;
        }
    }

    if goal_views <= live {
        println!(
            "{}Already has {}/{} views. No additional views needed.",
            CHECK, live, goal_views
        );
        return Ok(());
    }

    let usable = store.call(|s| s.usable_servers()).await?;
    let candidates = enumerate_candidates(&config.config_dir, &usable)?;
    if candidates.is_empty() {
        warn!("no usable server configs found");
        println!(
            "{}No usable servers. Run 'egress-rotator sync' or 'egress-rotator reset --all'.",
            CROSS
        );
    }

    let ui = ui_slot
        .get_or_init(|| Arc::new(RotationUI::new((goal_views - live) as u64, config.verbose)))
        .clone();
    let collaborators = Collaborators {
        health: Arc::new(AirVpnStatus::new(
            client,
            config.status_url.clone(),
            config.api_key.clone(),
        )),
        egress,
        click: target,
    };
    let mut controller = ConnectionController::new(
        config.tunnel.clone(),
        store.clone(),
        collaborators,
        ctx.clone(),
        baseline,
    )
    .dry_run(args.dry_run)
    .with_ui(ui.clone());
    let scheduler = RotationScheduler::new(store.clone())
        .with_ui(ui.clone())
        .with_context(ctx);

    info!(link = %link, goal = goal_views, live, dry_run = args.dry_run, "starting run");
    let outcome = scheduler
        .rotate(&mut controller, &link, goal_views, live, &candidates)
        .await?;
    ui.finish();

    if !outcome.reached_goal() {
        println!();
        println!(
            "{}Reached the end of available servers before hitting the full target.",
            WARN
        );
        println!("    Views added: {} / {}", outcome.added, outcome.remaining);
    }

    RunReport::new(
        link,
        goal.personality,
        goal.bonus,
        goal_views,
        live,
        &outcome,
        timer.elapsed(),
        args.dry_run,
    )
    .print();
    Ok(())
}

fn prompt_link() -> Result<String> {
    use dialoguer::Input;

    let link: String = Input::new()
        .with_prompt("Enter the target link")
        .interact_text()
        .context("Failed to read link")?;
    Ok(link.trim().to_string())
}

/// Pick the goal: explicit flags, then the stored goal, then a prompt.
/// The chosen goal is written back to the store.
async fn resolve_goal(store: &StoreHandle, link: &str, args: &RunArgs) -> Result<Goal> {
    let goal = if let Some(views) = args.views {
        Goal {
            personality: None,
            bonus: false,
            views,
        }
    } else if let Some(ref input) = args.personality {
        goal_for(match_personality(input)?, args.bonus)
    } else {
        let owned = link.to_string();
        match store.call(move |s| s.get_target(&owned)).await? {
            Some(stored) if stored.target_views.is_some() => {
                let personality = stored
                    .personality_goal
                    .as_deref()
                    .and_then(Personality::from_name);
                let views = stored.target_views.unwrap_or_default();
                let stored_goal = Goal {
                    personality,
                    bonus: personality.is_some_and(|p| p.has_bonus_goal() && views == p.view_goal(true)),
                    views,
                };
                println!(
                    "{}This link previously targeted '{}' with a goal of {} views",
                    TARGET,
                    stored.personality_goal.as_deref().unwrap_or("manual"),
                    stored_goal.views
                );
                if args.yes {
                    stored_goal
                } else {
                    prompt_stored_choice(stored_goal, args)?
                }
            }
            _ => prompt_new_goal(args)?,
        }
    };

    if let Some(p) = goal.personality {
        println!(
            "{}Targeting personality '{}' requires {} total views",
            TARGET, p, goal.views
        );
    }
    let (owned, name) = (link.to_string(), goal.personality.map(|p| p.name()));
    store
        .call(move |s| s.upsert_target(&owned, name, goal.views).map(|_| ()))
        .await?;
    Ok(goal)
}

fn goal_for(personality: Personality, bonus: bool) -> Goal {
    Goal {
        personality: Some(personality),
        bonus: bonus && personality.has_bonus_goal(),
        views: personality.view_goal(bonus),
    }
}

fn match_personality(input: &str) -> Result<Personality> {
    match resolve(input) {
        PersonalityMatch::Matched(p) => Ok(p),
        PersonalityMatch::Ambiguous(candidates) => {
            let names: Vec<_> = candidates.iter().map(|p| p.name()).collect();
            anyhow::bail!(
                "Ambiguous personality '{}'. Did you mean one of: {}",
                input,
                names.join(", ")
            )
        }
        PersonalityMatch::NotFound => {
            let names: Vec<_> = Personality::ALL.iter().map(|p| p.name()).collect();
            anyhow::bail!(
                "No matching personality for '{}'. Available: {}",
                input,
                names.join(", ")
            )
        }
    }
}

fn prompt_stored_choice(stored: Goal, args: &RunArgs) -> Result<Goal> {
    use dialoguer::Select;

    let choice = Select::new()
        .with_prompt("Keep this goal?")
        .items(&["Keep", "Change personality", "Enter a view count manually"])
        .default(0)
        .interact()
        .context("Failed to read choice")?;
    match choice {
        0 => Ok(stored),
        1 => prompt_personality(args),
        _ => prompt_manual_views(),
    }
}

fn prompt_new_goal(args: &RunArgs) -> Result<Goal> {
    use dialoguer::Select;

    let choice = Select::new()
        .with_prompt("How should the view goal be set?")
        .items(&["By personality", "Enter a view count manually"])
        .default(0)
        .interact()
        .context("Failed to read choice")?;
    match choice {
        0 => prompt_personality(args),
        _ => prompt_manual_views(),
    }
}

fn prompt_personality(args: &RunArgs) -> Result<Goal> {
    use dialoguer::{Confirm, Input};

    let input: String = Input::new()
        .with_prompt("Target personality")
        .interact_text()
        .context("Failed to read personality")?;
    let personality = match_personality(&input)?;

    let bonus = if personality.has_bonus_goal() && !args.bonus {
        Confirm::new()
            .with_prompt("Are you using Sea Creature Calling or a View Count Amulet?")
            .default(false)
            .interact()
            .context("Failed to read bonus choice")?
    } else {
        args.bonus
    };
    if personality.has_bonus_goal() && !bonus {
        println!(
            "{}Max achievable views may fall short of {}. You'll need to supplement the rest.",
            WARN,
            personality.view_goal(false)
        );
    }
    Ok(goal_for(personality, bonus))
}

fn prompt_manual_views() -> Result<Goal> {
    use dialoguer::Input;

    let views: i64 = Input::new()
        .with_prompt("Total view goal")
        .validate_with(|v: &i64| {
            if *v >= 0 {
                Ok(())
            } else {
                Err("must not be negative")
            }
        })
        .interact_text()
        .context("Failed to read view goal")?;
    println!("{}Goal set to {} views", EYES, views);
    Ok(Goal {
        personality: None,
        bonus: false,
        views,
    })
}

/// Resolve on Ctrl-C or SIGTERM.
///
/// A handler that cannot be installed never fires rather than ending the run.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_interrupted_prompt_is_recognised() {
        let err = anyhow::Error::from(io::Error::new(io::ErrorKind::Interrupted, "read interrupted"))
            .context("Failed to read link");
        assert!(is_interrupted(&err));

        let err = anyhow::Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"))
            .context("Failed to read link");
        assert!(!is_interrupted(&err));
        assert!(!is_interrupted(&anyhow::anyhow!("Unknown server: X")));
    }

    #[test]
    fn test_bonus_only_applies_to_bonus_personalities() {
        assert!(goal_for(Personality::Lovely, true).bonus);
        assert!(!goal_for(Personality::Lovely, false).bonus);
        assert!(!goal_for(Personality::Cute, true).bonus);
    }
}
