//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$SPAMPREP_CONFIG` (environment variable)
//! 2. `~/.config/spamprep/config.toml` (Linux/macOS)
//!    `%APPDATA%\spamprep\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::anonymize::rules::SensitiveClass;
use crate::error::{PrepError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub normalize: NormalizeConfig,
    pub anonymize: AnonymizeConfig,
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
}

/// Decoding settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Charset assumed for parts that declare none (default: UTF-8).
    pub default_charset: Option<String>,
}

/// What to anonymize and how to recognize it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizeConfig {
    /// Candidate classes to look for. Literal entries are always active.
    pub classes: Vec<SensitiveClass>,
    /// Addresses at these domains (and their subdomains) are anonymized.
    pub domains: Vec<String>,
    /// Exact strings to anonymize wherever they occur.
    pub literals: Vec<String>,
    /// Header fields to anonymize; `"*"` means every field.
    pub headers: Vec<String>,
    /// Anonymize every email address, not only recipients and listed domains.
    pub match_all_addresses: bool,
    /// Extra blocklist file: one entry per line, `#` starts a comment.
    pub blocklist_file: Option<PathBuf>,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Worker threads for corpus processing (0 = one per CPU).
    pub threads: usize,
    /// Messages larger than this many bytes are skipped (default: 64 MB).
    pub max_message_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
        }
    }
}

/// Header fields anonymized when the configuration does not list any.
pub const DEFAULT_ANONYMIZED_HEADERS: &[&str] = &[
    "From",
    "To",
    "Cc",
    "Sender",
    "Subject",
    "Thread-Topic",
    "Delivered-To",
    "X-Original-To",
];

impl Default for AnonymizeConfig {
    fn default() -> Self {
        Self {
            classes: vec![SensitiveClass::Email, SensitiveClass::Name],
            domains: Vec::new(),
            literals: Vec::new(),
            headers: DEFAULT_ANONYMIZED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            match_all_addresses: false,
            blocklist_file: None,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match load_config_from(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Load configuration from an explicit path; errors are returned, not masked.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PrepError::FileNotFound(path.to_path_buf())
        } else {
            PrepError::io(path, e)
        }
    })?;
    let cfg = toml::from_str::<Config>(&contents)
        .map_err(|e| PrepError::Config(format!("{}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<PathBuf> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(path)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("SPAMPREP_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("spamprep").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spamprep")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("spamprep.log")
}
