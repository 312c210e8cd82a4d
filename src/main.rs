use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use egress_rotator::config::Config;
use egress_rotator::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "egress-rotator")]
#[command(version, about = "Rotate VPN egress servers to register distinct views on a target link")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to every prompt
    #[arg(long, global = true)]
    pub yes: bool,

    /// Path to a TOML config file (defaults to ./rotator.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rotate through healthy servers until the link reaches its view goal
    Run {
        /// Target link (prompted for when omitted)
        #[arg(short, long)]
        link: Option<String>,

        /// Personality to reach, e.g. "cute" or a unique prefix like "mis"
        #[arg(short, long, conflicts_with = "views")]
        personality: Option<String>,

        /// Explicit total view goal
        #[arg(long)]
        views: Option<i64>,

        /// Add at most this many views in this run
        #[arg(long)]
        limit: Option<i64>,

        /// Go through every step except the click itself
        #[arg(long)]
        dry_run: bool,

        /// The in-game view bonus is in use (lowers the Lovely goal)
        #[arg(long)]
        bonus: bool,
    },
    /// Register every server named by a config file in the config directory
    Sync,
    /// List known servers
    Servers {
        /// Only show skipped servers
        #[arg(long)]
        skipped: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-check every known server against the provider status listing
    Health,
    /// Clear the skip flag on one server, or on all of them
    Reset {
        #[arg(required_unless_present = "all")]
        name: Option<String>,

        #[arg(long, conflicts_with = "name")]
        all: bool,
    },
    /// Show the stored goal and progress for a link
    Status { link: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), cli.verbose)?;
    let _log_guard = logging::init(cli.verbose, config.log_dir.as_deref());

    match &cli.command {
        Commands::Run {
            link,
            personality,
            views,
            limit,
            dry_run,
            bonus,
        } => {
            let args = cmd::RunArgs {
                link: link.clone(),
                personality: personality.clone(),
                views: *views,
                limit: *limit,
                dry_run: *dry_run,
                bonus: *bonus,
                yes: cli.yes,
            };
            cmd::cmd_run(&config, &args).await?;
        }
        Commands::Sync => cmd::cmd_sync(&config).await?,
        Commands::Servers { skipped, json } => {
            cmd::cmd_servers(&config, *skipped, *json).await?
        }
        Commands::Health => cmd::cmd_health(&config).await?,
        Commands::Reset { name, all } => {
            cmd::cmd_reset(&config, name.as_deref(), *all, cli.yes).await?
        }
        Commands::Status { link } => cmd::cmd_status(&config, link).await?,
    }

    Ok(())
}
