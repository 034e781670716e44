//! Configuration management for fixloop
//!
//! Stores settings in ~/.config/fixloop/config.json

use crate::llm::ModelSettings;
use crate::sandbox::SandboxSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const INTERPRETER_ENV: &str = "FIXLOOP_INTERPRETER";

const DEFAULT_MAX_RETRIES: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation budget per repair session
    pub max_retries: u32,
    pub model: ModelSettings,
    pub sandbox: SandboxSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            model: ModelSettings::default(),
            sandbox: SandboxSettings::default(),
        }
    }
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fixloop").join("config.json"))
    }

    /// Load config from disk (or defaults), then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load config from `path`. A missing file yields defaults; a corrupt one
    /// is moved aside so the user's edits are not lost.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Config file was corrupted. A backup was saved and defaults were loaded."
                );
                Self::default()
            }
        }
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(interpreter) = lookup(INTERPRETER_ENV) {
            if !interpreter.trim().is_empty() {
                self.sandbox.interpreter = interpreter.trim().to_string();
            }
        }
    }

    /// The OpenRouter API key, from the environment only.
    pub fn api_key() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
