//! Configuration file management for sbs-feed.
//!
//! Reads/writes `~/.sbs-feed/config.yaml` with the feed address, message log
//! settings, HTTP listen address, and snapshot staleness window.

use std::path::PathBuf;
use std::time::Duration;

use crate::tracker::DEFAULT_STALENESS;
use crate::types::SbsError;

/// Full configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub database: DatabaseConfig,
    pub dashboard: DashboardConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    /// IANA zone the receiver writes its timestamps in.
    pub timezone: String,
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub persist: bool,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub staleness_secs: u64,
}

impl SnapshotConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                host: "127.0.0.1".into(),
                port: 30003,
                timezone: "UTC".into(),
                reconnect_secs: 5,
            },
            database: DatabaseConfig {
                path: "data/sbs.db".into(),
                persist: true,
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            snapshot: SnapshotConfig {
                staleness_secs: DEFAULT_STALENESS.as_secs(),
            },
        }
    }
}

/// Get the config directory path (`~/.sbs-feed/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".sbs-feed")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.sbs-feed/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

/// Load config from an explicit path, defaulting on any read problem.
pub fn load_config_from(path: &std::path::Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(_) => Config::default(),
    }
}

/// Save config to `~/.sbs-feed/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, SbsError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save config to an explicit path, creating parent directories.
pub fn save_config_to(config: &Config, path: &std::path::Path) -> Result<(), SbsError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SbsError::Config(e.to_string()))?;
    }
    let text = serialize_config(config);
    std::fs::write(path, text).map_err(|e| SbsError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys and bad values keep
/// their defaults.
fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("feed", "host") => set_string(&mut config.feed.host, val),
            ("feed", "port") => set_parsed(&mut config.feed.port, val),
            ("feed", "timezone") => set_string(&mut config.feed.timezone, val),
            ("feed", "reconnect_secs") => set_parsed(&mut config.feed.reconnect_secs, val),
            ("database", "path") => set_string(&mut config.database.path, val),
            ("database", "persist") => set_parsed(&mut config.database.persist, val),
            ("dashboard", "host") => set_string(&mut config.dashboard.host, val),
            ("dashboard", "port") => set_parsed(&mut config.dashboard.port, val),
            ("snapshot", "staleness_secs") => set_parsed(&mut config.snapshot.staleness_secs, val),
            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn set_string(target: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *target = v;
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, val: &str) {
    if let Ok(v) = val.parse::<T>() {
        *target = v;
    }
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let lines = [
        "# sbs-feed configuration".to_string(),
        String::new(),
        "feed:".into(),
        format!("  host: \"{}\"", config.feed.host),
        format!("  port: {}", config.feed.port),
        format!("  timezone: \"{}\"", config.feed.timezone),
        format!("  reconnect_secs: {}", config.feed.reconnect_secs),
        String::new(),
        "database:".into(),
        format!("  path: \"{}\"", config.database.path),
        format!("  persist: {}", config.database.persist),
        String::new(),
        "dashboard:".into(),
        format!("  host: \"{}\"", config.dashboard.host),
        format!("  port: {}", config.dashboard.port),
        String::new(),
        "snapshot:".into(),
        format!("  staleness_secs: {}", config.snapshot.staleness_secs),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
