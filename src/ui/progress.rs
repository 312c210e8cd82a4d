use crate::ui::icons::{CHECK, CROSS, EYES, GLOBE, PLUG, ROTATE, SEARCH, STOP, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Terminal UI for a rotation run, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Views bar: successful views against the run's remaining goal
/// - Connect bar: spinner shown while waiting for a tunnel, one frame per tick
///
/// Per-attempt lines are printed above the bars through `MultiProgress`.
pub struct RotationUI {
    multi: MultiProgress,
    views_bar: ProgressBar,
    connect_bar: ProgressBar,
    verbose: bool,
}

impl RotationUI {
    /// Create the UI for a run that needs `remaining` more views.
    pub fn new(remaining: u64, verbose: bool) -> Self {
        Self::with_target(remaining, verbose, ProgressDrawTarget::stderr())
    }

    /// A UI that renders nothing. Used by tests and non-interactive callers.
    pub fn hidden() -> Self {
        Self::with_target(0, false, ProgressDrawTarget::hidden())
    }

    fn with_target(remaining: u64, verbose: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let views_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let views_bar = multi.add(ProgressBar::new(remaining));
        views_bar.set_style(views_style);
        views_bar.set_prefix(" Views");

        let connect_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner:.magenta} {msg}")
            .expect("progress bar template is a valid static string")
            .tick_chars("|/-\\ ");
        let connect_bar = multi.add(ProgressBar::new_spinner());
        connect_bar.set_style(connect_style);
        connect_bar.set_prefix("Tunnel");

        Self {
            multi,
            views_bar,
            connect_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() {
            return;
        }
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn show_candidate(&self, server: &str, config_file: &str) {
        self.print_line(format!(
            "{}Checking config: {} → Server: {}",
            SEARCH,
            style(config_file).dim(),
            style(server).cyan()
        ));
    }

    pub fn start_connect(&self, server: &str) {
        self.connect_bar
            .set_message(format!("{}Connecting to {}...", ROTATE, style(server).cyan()));
    }

    /// Advance the connect spinner by one frame.
    pub fn connect_tick(&self, tick: u32, budget: u32) {
        self.connect_bar.set_message(format!(
            "Connecting... {}",
            style(format!("{}/{}", tick, budget)).dim()
        ));
        self.connect_bar.tick();
    }

    pub fn connected(&self, server: &str) {
        self.connect_bar.set_message("");
        self.print_line(format!("{}Connected to {}", CHECK, style(server).green()));
    }

    pub fn timed_out(&self, server: &str) {
        self.connect_bar.set_message("");
        self.print_line(format!(
            "{}Connection timed out for {}",
            STOP,
            style(server).red()
        ));
    }

    pub fn unhealthy(&self, server: &str, reason: &str) {
        self.print_line(format!("{}{} skipped: {}", WARN, style(server).yellow(), reason));
    }

    pub fn egress_ip(&self, ip: &str) {
        self.print_line(format!("{}VPN IP: {}", GLOBE, style(ip).cyan()));
    }

    pub fn egress_unverified(&self, server: &str) {
        self.print_line(format!(
            "{}Egress IP unchanged or unavailable via {}, moving on",
            WARN,
            style(server).yellow()
        ));
    }

    pub fn dry_run_click(&self, server: &str) {
        self.print_line(format!(
            "{}[Dry Run] Skipping click via {}",
            SEARCH,
            style(server).cyan()
        ));
    }

    pub fn click_failed(&self, server: &str) {
        self.print_line(format!("{}View failed via {}", CROSS, style(server).red()));
    }

    pub fn view_added(&self, total: i64, goal: i64) {
        self.views_bar.inc(1);
        self.print_line(format!(
            "{}Views: {}/{}",
            EYES,
            style(total).green().bold(),
            goal
        ));
    }

    pub fn disconnecting(&self) {
        if self.verbose {
            self.print_line(format!("{}Disconnecting VPN...", PLUG));
        }
    }

    /// Clear both bars at the end of a run.
    pub fn finish(&self) {
        self.connect_bar.finish_and_clear();
        self.views_bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_ui_accepts_all_calls() {
        let ui = RotationUI::hidden();
        ui.show_candidate("Alathfar", "AirVPN_NL-Amsterdam_Alathfar_UDP-443-Entry1.ovpn");
        ui.start_connect("Alathfar");
        ui.connect_tick(1, 40);
        ui.connected("Alathfar");
        ui.egress_ip("198.51.100.4");
        ui.view_added(3, 5);
        ui.finish();
    }

    #[test]
    fn test_view_added_advances_bar() {
        let ui = RotationUI::with_target(3, false, ProgressDrawTarget::hidden());
        ui.view_added(1, 3);
        ui.view_added(2, 3);
        assert_eq!(ui.views_bar.position(), 2);
    }
}
