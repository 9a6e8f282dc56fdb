//! Configuration loading and management
//!
//! Values come from the command line (each flag also readable from the
//! environment), then an optional JSON file, then built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::keyboard::{keysyms, KeyCode, Keysym, TapKey};

/// Default tap timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Accepted tap timeout range in milliseconds
pub const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=10_000;

/// Command line arguments
#[derive(Debug, Clone, Parser)]
#[command(
    name = "space2super",
    version,
    about = "Space acts as Super when held with another key and as Space when tapped"
)]
pub struct Args {
    /// Key code of the overloaded key before it was remapped.
    #[arg(env = "SPACE2SUPER_TARGET_KEYCODE")]
    pub target_keycode: KeyCode,

    /// Longest press, in milliseconds, that still types the character.
    #[arg(long, env = "SPACE2SUPER_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Key code injected for a tap. Defaults to the code bound to --tap-keysym.
    #[arg(long, env = "SPACE2SUPER_TAP_KEYCODE")]
    pub tap_keycode: Option<KeyCode>,

    /// Keysym whose key code is injected for a tap (hex or decimal).
    #[arg(long, env = "SPACE2SUPER_TAP_KEYSYM", default_value_t = keysyms::SPACE, value_parser = parse_keysym)]
    pub tap_keysym: Keysym,

    /// X display to connect to.
    #[arg(long, env = "DISPLAY")]
    pub display: Option<String>,

    /// JSON config file.
    #[arg(long, env = "SPACE2SUPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not type the character when Super is pressed while the key is held.
    #[arg(long)]
    pub no_eager_super: bool,

    /// Log every event.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Optional settings read from the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub timeout_ms: Option<u64>,
    pub eager_super: Option<bool>,
}

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("timeout of {0} ms is outside 1..=10000 ms")]
    InvalidTimeout(u64),
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Code of the overloaded key before remapping
    pub target_keycode: KeyCode,

    /// Key injected for a tap
    pub tap: TapKey,

    /// Longest hold that still counts as a tap
    pub timeout_ms: u64,

    /// Fire the tap as soon as Super is pressed during a hold
    pub eager_super: bool,

    /// X display name, `None` for `$DISPLAY`
    pub display: Option<String>,
}

impl Config {
    /// Load configuration from arguments, the config file and defaults
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => read_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(args, file)
    }

    /// Merge arguments over file settings over defaults
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let timeout_ms = args
            .timeout_ms
            .or(file.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        if !TIMEOUT_RANGE_MS.contains(&timeout_ms) {
            return Err(ConfigError::InvalidTimeout(timeout_ms));
        }

        let tap = match args.tap_keycode {
            Some(code) => TapKey::Keycode(code),
            None => TapKey::Keysym(args.tap_keysym),
        };

        let eager_super = !args.no_eager_super && file.eager_super.unwrap_or(true);

        Ok(Self {
            target_keycode: args.target_keycode,
            tap,
            timeout_ms,
            eager_super,
            display: args.display,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `$XDG_CONFIG_HOME/space2super/config.json`, falling back to `~/.config`
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("space2super").join("config.json"))
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_keysym(value: &str) -> Result<Keysym, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => Keysym::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid keysym `{value}`: {e}"))
}
