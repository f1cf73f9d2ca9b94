//! # Music Assistant Configuration Module
//!
//! Configuration management for the stream server, including:
//! - Loading configuration from a YAML file
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Typed getters/setters for server and per-player values
//! - Thread-safe singleton access
//!
//! ## Usage
//!
//! ```no_run
//! use maconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_bind_port();
//! let codec = config.get_output_codec("living-room");
//! ```
//!
//! Server values live under `server.*`, per-player values under
//! `players.<player_id>.<key>`. Every value can be overridden through the
//! environment: `MAMUSIC_CONFIG__SERVER__BIND_PORT=9000` maps to
//! `server.bind_port`.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use mautils::{guess_local_ip, select_free_port};
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("mamusic.yaml");

const ENV_CONFIG_DIR: &str = "MAMUSIC_CONFIG";
const ENV_PREFIX: &str = "MAMUSIC_CONFIG__";

/// Port range scanned when no explicit `bind_port` is configured.
const STREAM_PORT_RANGE: (u16, u16) = (8096, 9200);

const DEFAULT_BIND_IP: &str = "0.0.0.0";
const DEFAULT_OUTPUT_CODEC: &str = "flac";
const DEFAULT_OUTPUT_CHANNELS: &str = "stereo";
const DEFAULT_CROSSFADE_DURATION: u64 = 8;

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load Music Assistant configuration"));
}

/// Returns the global configuration singleton.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Configuration manager backed by a YAML value tree.
#[derive(Debug)]
pub struct Config {
    /// Path of the backing `config.yaml`, `None` for in-memory configs.
    path: Option<String>,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order:
    /// the provided directory, the `MAMUSIC_CONFIG` environment variable,
    /// `.mamusic` in the current directory, `.mamusic` in the home
    /// directory.
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".mamusic").exists() {
            return ".mamusic".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".mamusic");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".mamusic".to_string()
    }

    /// Creates the directory if needed and checks read/write permissions.
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(anyhow!("config path is not a directory"));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Loads the configuration from the given directory (empty string for
    /// the default search order), merging the embedded defaults with the
    /// external `config.yaml` and applying env-var overrides.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&config_dir))?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            let external_value: Value = serde_yaml::from_slice(&data)?;
            merge_yaml(&mut config_value, &external_value);
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
        }

        Self::apply_env_overrides(&mut config_value);

        let config = Self {
            path: Some(path),
            data: Mutex::new(config_value),
        };
        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML string, merged over
    /// the embedded defaults. Nothing is persisted; intended for tests and
    /// embedded setups.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external_value: Value = serde_yaml::from_str(yaml)?;
        merge_yaml(&mut config_value, &external_value);
        Ok(Self {
            path: None,
            data: Mutex::new(config_value),
        })
    }

    /// Applies `MAMUSIC_CONFIG__SECTION__KEY=value` overrides onto the tree.
    fn apply_env_overrides(config: &mut Value) {
        for (key, raw) in env::vars() {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path: Vec<String> = suffix.split("__").map(|s| s.to_lowercase()).collect();
            if path.iter().any(|s| s.is_empty()) {
                continue;
            }
            let segments: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
            debug!(path = %segments.join("."), "Applying env override");
            set_in_tree(config, &segments, parse_scalar(&raw));
        }
    }

    /// Persists the current tree to the backing file, if any.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            debug!("In-memory config, skipping save");
            return Ok(());
        };
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Reads the value at `path`, `Value::Null` when absent.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        let mut current = &*data;
        for segment in path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Ok(Value::Null),
            }
        }
        Ok(current.clone())
    }

    /// Writes `value` at `path`, creating intermediate mappings, and saves.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            return Err(anyhow!("empty config path"));
        }
        {
            let mut data = self.data.lock().unwrap();
            set_in_tree(&mut data, path, value);
        }
        self.save()
    }

    // ------------------------------------------------------------------
    // Server entries
    // ------------------------------------------------------------------

    /// Interface the stream server binds on (default `0.0.0.0`).
    pub fn get_bind_ip(&self) -> String {
        match self.get_value(&["server", "bind_ip"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_BIND_IP.to_string(),
        }
    }

    pub fn set_bind_ip(&self, ip: String) -> Result<()> {
        self.set_value(&["server", "bind_ip"], Value::String(ip))
    }

    /// TCP port of the stream server.
    ///
    /// When unset (or 0), a free port is picked from [8096, 9200) and
    /// written back so that every later call (and the published URLs)
    /// agree on the same port.
    pub fn get_bind_port(&self) -> u16 {
        if let Ok(Value::Number(n)) = self.get_value(&["server", "bind_port"]) {
            if let Some(port) = n.as_u64() {
                if port > 0 && port <= u16::MAX as u64 {
                    return port as u16;
                }
            }
        }
        let port = select_free_port(STREAM_PORT_RANGE.0, STREAM_PORT_RANGE.1)
            .unwrap_or(STREAM_PORT_RANGE.0);
        if let Err(err) = self.set_bind_port(port) {
            debug!("Could not persist auto-selected port: {err}");
        }
        port
    }

    pub fn set_bind_port(&self, port: u16) -> Result<()> {
        self.set_value(&["server", "bind_port"], Value::Number(Number::from(port)))
    }

    /// IP address communicated to players (default: autodetected).
    pub fn get_publish_ip(&self) -> String {
        match self.get_value(&["server", "publish_ip"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => guess_local_ip(),
        }
    }

    pub fn set_publish_ip(&self, ip: String) -> Result<()> {
        self.set_value(&["server", "publish_ip"], Value::String(ip))
    }

    /// Base URL under which stream URLs are published.
    pub fn get_base_url(&self) -> String {
        format!("http://{}:{}", self.get_publish_ip(), self.get_bind_port())
    }

    // ------------------------------------------------------------------
    // Per-player entries
    // ------------------------------------------------------------------

    /// Reads a raw per-player value, `Value::Null` when absent.
    pub fn get_player_value(&self, player_id: &str, key: &str) -> Result<Value> {
        self.get_value(&["players", player_id, key])
    }

    pub fn set_player_value(&self, player_id: &str, key: &str, value: Value) -> Result<()> {
        self.set_value(&["players", player_id, key], value)
    }

    /// Output codec for a player (default `flac`).
    pub fn get_output_codec(&self, player_id: &str) -> String {
        match self.get_player_value(player_id, "output_codec") {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_OUTPUT_CODEC.to_string(),
        }
    }

    /// Output channel mode for a player: `stereo`, `left`, `right` or
    /// `mono` (default `stereo`).
    pub fn get_output_channels(&self, player_id: &str) -> String {
        match self.get_player_value(player_id, "output_channels") {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_OUTPUT_CHANNELS.to_string(),
        }
    }

    /// 3-band EQ gains in dB (default 0.0 = bypass).
    pub fn get_eq_bass(&self, player_id: &str) -> f64 {
        self.get_player_f64(player_id, "eq_bass")
    }

    pub fn get_eq_mid(&self, player_id: &str) -> f64 {
        self.get_player_f64(player_id, "eq_mid")
    }

    pub fn get_eq_treble(&self, player_id: &str) -> f64 {
        self.get_player_f64(player_id, "eq_treble")
    }

    /// Crossfade duration in seconds for a queue/player (default 8).
    pub fn get_crossfade_duration(&self, player_id: &str) -> u64 {
        match self.get_player_value(player_id, "crossfade_duration") {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_CROSSFADE_DURATION),
            _ => DEFAULT_CROSSFADE_DURATION,
        }
    }

    fn get_player_f64(&self, player_id: &str, key: &str) -> f64 {
        match self.get_player_value(player_id, key) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

/// Deep-merges `other` into `base`; mappings merge recursively, everything
/// else is replaced.
fn merge_yaml(base: &mut Value, other: &Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_yaml(base_value, other_value),
                    None => {
                        base_map.insert(key.clone(), other_value.clone());
                    }
                }
            }
        }
        (base, other) => *base = other.clone(),
    }
}

/// Writes `value` at `path` in the tree, creating intermediate mappings.
fn set_in_tree(tree: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *tree = value;
        return;
    };

    if !matches!(tree, Value::Mapping(_)) {
        *tree = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = tree else {
        unreachable!()
    };

    let key = Value::String(head.to_string());
    if rest.is_empty() {
        map.insert(key, value);
        return;
    }

    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    set_in_tree(entry, rest, value);
}

/// Parses an env-var override into the closest YAML scalar.
fn parse_scalar(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(Number::from(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Number(Number::from(f));
    }
    Value::String(raw.to_string())
}
