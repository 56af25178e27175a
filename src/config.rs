//! Engine configuration, loadable from `~/.patter/config.yaml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Engine tuning knobs. Every field has a default so a partial config
/// file (or none at all) still yields a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tempo in beats per minute.
    #[serde(default = "default_bpm")]
    pub bpm: u16,
    /// Scheduler tick interval in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Debounce window before a new sound resolves, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Seed for the choice automata; fixed seed means reproducible runs.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Directory of `{name}.wav` sample files.
    #[serde(default)]
    pub sample_dir: Option<PathBuf>,
}

fn default_bpm() -> u16 {
    120
}

fn default_tick_ms() -> u64 {
    25
}

fn default_debounce_ms() -> u64 {
    400
}

fn default_seed() -> u64 {
    42
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: default_bpm(),
            tick_ms: default_tick_ms(),
            debounce_ms: default_debounce_ms(),
            seed: default_seed(),
            sample_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from the user's config file, falling back to defaults when the
    /// file is absent. A present-but-malformed file is an error; silently
    /// ignoring it would hide typos.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".patter").join("config.yaml"))
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {e}", path.display()),
            ConfigError::Parse(path, e) => write!(f, "cannot parse {}: {e}", path.display()),
        }
    }
}

impl std::error::Error for ConfigError {}
