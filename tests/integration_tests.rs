//! Integration tests for the egress-rotator CLI
//!
//! These drive the binary against a scratch database and config directory.
//! Nothing here touches the network or launches a tunnel.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const NL: &str = "AirVPN_NL-Amsterdam_Alathfar_UDP-443-Entry1.ovpn";
const SE: &str = "AirVPN_SE-Stockholm_Castor_UDP-443-Entry3.ovpn";

/// Helper to create a rotator Command isolated in `dir`
fn rotator(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("egress-rotator");
    cmd.current_dir(dir.path())
        .env("DB_PATH", dir.path().join("rotation.db"))
        .env("CONFIG_DIR", dir.path().join("configs"))
        .env_remove("RUST_LOG")
        .env_remove("LOG_DIR");
    cmd
}

/// Helper to create a workspace with a populated config directory
fn create_workspace(files: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let configs = dir.path().join("configs");
    fs::create_dir(&configs).unwrap();
    for name in files {
        fs::write(configs.join(name), "client\n").unwrap();
    }
    dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("egress-rotator")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("sync"))
            .stdout(predicate::str::contains("reset"));
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("egress-rotator")
            .arg("--version")
            .assert()
            .success();
    }

    #[test]
    fn test_reset_requires_name_or_all() {
        let dir = create_workspace(&[]);
        rotator(&dir).arg("reset").assert().failure();
    }

    #[test]
    fn test_personality_conflicts_with_views() {
        let dir = create_workspace(&[]);
        rotator(&dir)
            .args(["run", "--personality", "cute", "--views", "10"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot be used with"));
    }
}

// =============================================================================
// Pool Tests
// =============================================================================

mod pool {
    use super::*;

    #[test]
    fn test_sync_registers_servers() {
        let dir = create_workspace(&[NL, SE, "readme.ovpn"]);

        rotator(&dir)
            .arg("sync")
            .assert()
            .success()
            .stdout(predicate::str::contains("Synced 2 server(s)"))
            .stdout(predicate::str::contains("readme.ovpn"));

        rotator(&dir)
            .arg("servers")
            .assert()
            .success()
            .stdout(predicate::str::contains("Alathfar"))
            .stdout(predicate::str::contains("NL-Amsterdam"))
            .stdout(predicate::str::contains("2 server(s), 0 skipped"));
    }

    #[test]
    fn test_servers_json_output() {
        let dir = create_workspace(&[NL]);
        rotator(&dir).arg("sync").assert().success();

        let output = rotator(&dir)
            .args(["servers", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let servers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(servers[0]["name"], "Alathfar");
        assert_eq!(servers[0]["skip"], false);
    }

    #[test]
    fn test_sync_missing_config_dir_fails() {
        let dir = TempDir::new().unwrap();
        rotator(&dir)
            .arg("sync")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Config directory not found"));
    }

    #[test]
    fn test_empty_pool_has_no_skipped_servers() {
        let dir = create_workspace(&[]);
        rotator(&dir)
            .args(["servers", "--skipped"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No skipped servers"));
    }

    #[test]
    fn test_reset_known_and_unknown_server() {
        let dir = create_workspace(&[NL]);
        rotator(&dir).arg("sync").assert().success();

        rotator(&dir)
            .args(["reset", "Alathfar"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Re-enabled Alathfar"));

        rotator(&dir)
            .args(["reset", "Ghost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown server: Ghost"));
    }

    #[test]
    fn test_reset_all_with_yes_skips_prompt() {
        let dir = create_workspace(&[NL, SE]);
        rotator(&dir).arg("sync").assert().success();

        rotator(&dir)
            .args(["reset", "--all", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Re-enabled 0 server(s)"));
    }
}

// =============================================================================
// Config and Status Tests
// =============================================================================

mod config_and_status {
    use super::*;

    #[test]
    fn test_status_for_unknown_link() {
        let dir = create_workspace(&[]);
        rotator(&dir)
            .args(["status", "https://dragon.dvc.land/view/us?id=abc123"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No goal stored"))
            .stdout(predicate::str::contains("Views added by rotation: 0"));
    }

    #[test]
    fn test_invalid_config_file_is_rejected() {
        let dir = create_workspace(&[]);
        fs::write(
            dir.path().join("rotator.toml"),
            "[tunnel]\nconnect_ticks = 0\n",
        )
        .unwrap();

        rotator(&dir)
            .arg("servers")
            .assert()
            .failure()
            .stderr(predicate::str::contains("connect_ticks"));
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = create_workspace(&[NL]);
        let custom = dir.path().join("custom.toml");
        fs::write(&custom, "[pool]\nconfig_dir = \"elsewhere\"\n").unwrap();

        // CONFIG_DIR from the environment still wins over the file.
        rotator(&dir)
            .args(["--config", custom.to_str().unwrap(), "sync"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Synced 1 server(s)"));
    }
}

// =============================================================================
// Interrupt Tests
// =============================================================================

#[cfg(unix)]
mod interrupt {
    use super::*;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use std::net::TcpListener;
    use std::process::{Command as StdCommand, Stdio};
    use std::time::Duration;

    #[test]
    fn test_interrupt_before_rotation_exits_cleanly() {
        let dir = create_workspace(&[NL]);
        // Accepts connections but never answers, so the baseline IP lookup hangs.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/ip", listener.local_addr().unwrap());
        fs::write(
            dir.path().join("rotator.toml"),
            format!(
                "[airvpn]\nip_check_url = \"{url}\"\nfallback_ip_url = \"{url}\"\n\n[http]\ntimeout_secs = 60\n"
            ),
        )
        .unwrap();

        let child = StdCommand::new(env!("CARGO_BIN_EXE_egress-rotator"))
            .args(["run", "https://dragon.dvc.land/view/us?id=abc123", "--views", "5"])
            .current_dir(dir.path())
            .env("DB_PATH", dir.path().join("rotation.db"))
            .env("CONFIG_DIR", dir.path().join("configs"))
            .env_remove("RUST_LOG")
            .env_remove("LOG_DIR")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        std::thread::sleep(Duration::from_secs(1));
        kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

        let output = child.wait_with_output().unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(output.status.code(), Some(0), "stdout: {stdout}");
        assert!(stdout.contains("Graceful shutdown initiated"));
        assert!(stdout.contains("Exiting."));
        drop(listener);
    }
}
