//! Detector settings file (JSON) plus environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;
use vmdetect_core::DetectorConfig;

pub const CONFIG_ENV: &str = "VMDETECT_CONFIG";
pub const OPENAI_KEY_ENV: &str = "VMDETECT_OPENAI_API_KEY";
pub const WHISPER_COMMAND_ENV: &str = "VMDETECT_WHISPER_COMMAND";
pub const MODEL_PATH_ENV: &str = "VMDETECT_MODEL_PATH";

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("vmdetect")
        .join("settings.json")
}

/// `--settings`, then `$VMDETECT_CONFIG`, then the per-user default.
pub fn resolve_settings_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(default_settings_path)
}

/// Missing file → defaults. A file that exists but does not parse is an error.
pub fn load_settings(path: &Path) -> anyhow::Result<DetectorConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<DetectorConfig>(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file; using defaults");
            DetectorConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("cannot read settings {}", path.display()))
        }
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.normalize();
    Ok(config)
}

pub fn save_settings(path: &Path, config: &DetectorConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
}

/// Secrets and machine-specific paths may come from the environment instead
/// of the settings file. Non-empty variables win.
pub fn apply_env_overrides<F>(config: &mut DetectorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(key) = get(OPENAI_KEY_ENV) {
        config.transcription.openai_api_key = Some(key);
    }
    if let Some(cmd) = get(WHISPER_COMMAND_ENV) {
        config.transcription.whisper_command = Some(PathBuf::from(cmd));
    }
    if let Some(model) = get(MODEL_PATH_ENV) {
        config.ai_model_path = Some(PathBuf::from(model));
    }
}
