//! Run Reporter: end-of-run summary.

use std::time::{Duration, Instant};

use console::style;

use crate::personality::Personality;
use crate::scheduler::RotationOutcome;
use crate::ui::icons::{CHART, CLOCK, EYES, LINK, TARGET, TREND, WARN};

/// Tracks run time from construction.
pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub link: String,
    pub personality: Option<Personality>,
    /// Whether the in-game view bonus was declared when the goal was chosen.
    pub bonus: bool,
    pub goal: i64,
    /// Live count read from the page before rotating.
    pub start_views: i64,
    pub added: i64,
    pub shortfall: i64,
    pub elapsed: Duration,
    pub dry_run: bool,
}

impl RunReport {
    pub fn new(
        link: impl Into<String>,
        personality: Option<Personality>,
        bonus: bool,
        goal: i64,
        start_views: i64,
        outcome: &RotationOutcome,
        elapsed: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            link: link.into(),
            personality,
            bonus,
            goal,
            start_views,
            added: outcome.added,
            shortfall: outcome.shortfall(),
            elapsed,
            dry_run,
        }
    }

    pub fn final_views(&self) -> i64 {
        self.start_views + self.added
    }

    /// Summary lines without styling.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("{}Link: {}", LINK, self.link)];
        if let Some(p) = self.personality {
            lines.push(format!("{}Personality targeted: {}", TARGET, p));
            if p.has_bonus_goal() {
                let used = if self.bonus { "Yes" } else { "No" };
                lines.push(format!("    In-game view count bonus used: {}", used));
            }
        }
        lines.push(format!("{}Views added this run: {}", TREND, self.added));
        lines.push(format!(
            "{}Final view count: {}/{}",
            EYES,
            self.final_views(),
            self.goal
        ));
        lines.push(format!("{}Runtime: {}", CLOCK, format_runtime(self.elapsed)));
        if self.shortfall > 0 {
            lines.push(format!(
                "{}Ran out of servers {} views short of the goal",
                WARN, self.shortfall
            ));
        }
        if self.dry_run {
            lines.push(format!("{}Dry run: no views were actually submitted", WARN));
        }
        lines
    }

    pub fn print(&self) {
        println!();
        println!("{}{}", CHART, style("Summary").bold());
        for line in self.lines() {
            println!("{}", line);
        }
    }
}

/// `3m 07s` style runtime.
pub fn format_runtime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {:02}s", secs / 60, secs % 60)
}
