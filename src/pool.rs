//! Egress pool: tunnel config files on disk and the servers they name.
//!
//! Config files follow the provider's generator naming,
//! `AirVPN_<CC>-<City>_<Server>_UDP-<port>-Entry<n>.ovpn`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::errors::RotationError;
use crate::store::ProgressStore;

pub const CONFIG_EXTENSION: &str = "ovpn";

static CONFIG_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^AirVPN_([A-Z]{2})-([A-Za-z0-9\-]+)_([A-Za-z0-9]+)_UDP-\d+-Entry\d+\.ovpn$")
        .unwrap()
});

/// Location and server parsed from a config file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigName {
    pub country: String,
    pub city: String,
    pub server: String,
}

pub fn parse_config_name(file_name: &str) -> Option<ConfigName> {
    let caps = CONFIG_NAME_REGEX.captures(file_name)?;
    Some(ConfigName {
        country: caps[1].to_string(),
        city: caps[2].to_string(),
        server: caps[3].to_string(),
    })
}

/// Server name for a config file; the part before the first `.` when the
/// name does not follow the generator pattern.
pub fn extract_server_name(file_name: &str) -> String {
    match parse_config_name(file_name) {
        Some(parsed) => parsed.server,
        None => file_name.split('.').next().unwrap_or(file_name).to_string(),
    }
}

/// One tunnel config to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub server_name: String,
    pub config_path: PathBuf,
}

impl Candidate {
    pub fn new(server_name: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            server_name: server_name.into(),
            config_path: config_path.into(),
        }
    }
}

/// File names of all tunnel configs in `dir`, sorted lexically.
pub fn list_config_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(RotationError::ConfigDirMissing {
            path: dir.to_path_buf(),
        }
        .into());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read config directory {}", dir.display()))?
    {
        let entry = entry.context("Failed to read config directory entry")?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Candidates for a run: configs whose server is in `usable`, lexical order.
pub fn enumerate_candidates(dir: &Path, usable: &HashSet<String>) -> Result<Vec<Candidate>> {
    Ok(list_config_files(dir)?
        .into_iter()
        .filter_map(|file| {
            let server = extract_server_name(&file);
            usable
                .contains(&server)
                .then(|| Candidate::new(server, dir.join(&file)))
        })
        .collect())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub unparsed: Vec<String>,
}

/// Register every server named by a config in `dir`.
pub fn sync_pool(store: &ProgressStore, dir: &Path) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for file in list_config_files(dir)? {
        match parse_config_name(&file) {
            Some(parsed) => {
                store.upsert_server_location(
                    &parsed.server,
                    Some(&parsed.country),
                    Some(&parsed.city),
                )?;
                info!(server = %parsed.server, country = %parsed.country, city = %parsed.city, "synced server");
                report.synced.push(parsed.server);
            }
            None => {
                warn!(file = %file, "could not parse config name");
                report.unparsed.push(file);
            }
        }
    }
    Ok(report)
}
