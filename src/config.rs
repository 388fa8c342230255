//! Configuration types.
//!
//! `OrchestratorConfig` is the engine's own knob set, read from the process
//! environment with documented defaults. `AssistantSettings` is the external,
//! read-only per-assistant configuration (configured executable path and
//! auxiliary settings) loaded from `~/.taskforge/assistants.json`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::executor::ExecutorVariant;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of concurrency slots (simultaneously running attempts).
    pub max_slots: usize,
    /// Root directory for attempt worktrees.
    pub worktree_root: PathBuf,
    /// Directory for per-attempt captured log files.
    pub log_dir: PathBuf,
    /// Hard timeout for an assistant process.
    pub process_timeout: Duration,
    /// Worktree acquisition retries before a task is failed.
    pub acquire_retries: u32,
    /// Age past which an orphaned worktree is reclaimed by the sweep.
    pub orphan_max_age: Duration,
    /// Interval between periodic orphan sweeps.
    pub sweep_interval: Duration,
    /// Disable worktree/orphan cleanup entirely (post-mortem debugging).
    pub cleanup_disabled: bool,
    /// Keep the worktree on success while the task sits in review.
    pub retain_on_review: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskforge");
        Self {
            max_slots: 2,
            worktree_root: base.join("worktrees"),
            log_dir: base.join("logs"),
            process_timeout: Duration::from_secs(30 * 60),
            acquire_retries: 2,
            orphan_max_age: Duration::from_secs(6 * 3600),
            sweep_interval: Duration::from_secs(600),
            cleanup_disabled: false,
            retain_on_review: false,
        }
    }
}

impl OrchestratorConfig {
    /// Build the configuration from the process environment.
    ///
    /// Absent variables fall back to the defaults above; present-but-invalid
    /// values are a hard error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("TASKFORGE_MAX_SLOTS")? {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TASKFORGE_MAX_SLOTS".to_string(),
                    message: "slot count must be at least 1".to_string(),
                });
            }
            config.max_slots = v;
        }
        if let Ok(v) = std::env::var("TASKFORGE_WORKTREE_ROOT") {
            config.worktree_root = PathBuf::from(shellexpand::tilde(&v).into_owned());
        }
        if let Ok(v) = std::env::var("TASKFORGE_LOG_DIR") {
            config.log_dir = PathBuf::from(shellexpand::tilde(&v).into_owned());
        }
        if let Some(v) = env_parse::<u64>("TASKFORGE_PROCESS_TIMEOUT_SECS")? {
            config.process_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("TASKFORGE_ACQUIRE_RETRIES")? {
            config.acquire_retries = v;
        }
        if let Some(v) = env_parse::<u64>("TASKFORGE_ORPHAN_MAX_AGE_SECS")? {
            config.orphan_max_age = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("TASKFORGE_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(v);
        }
        config.cleanup_disabled = env_flag("TASKFORGE_DISABLE_CLEANUP");
        config.retain_on_review = env_flag("TASKFORGE_RETAIN_ON_REVIEW");

        Ok(config)
    }
}

/// Parse an environment variable, distinguishing absent from invalid.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
    }
}

/// Boolean flag: set to anything other than `0`/`false` means on.
fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.as_str(), "" | "0" | "false"))
        .unwrap_or(false)
}

/// Per-assistant external configuration entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantEntry {
    /// Explicit executable path or command; used unconditionally when set.
    pub configured_path: Option<String>,
    /// Override for the remote/bootstrap launcher invocation.
    pub remote_launcher: Option<String>,
    /// Extra arguments appended to every invocation of this assistant.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Read-only assistant configuration, keyed by variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default)]
    entries: HashMap<ExecutorVariant, AssistantEntry>,
}

impl AssistantSettings {
    /// Load settings from a JSON file. A missing file yields empty settings;
    /// a malformed file is an error.
    pub async fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Load from the default location (`~/.taskforge/assistants.json`).
    pub async fn load_default() -> Result<Self, ConfigError> {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskforge/assistants.json");
        Self::load(&path).await
    }

    /// Entry for a variant, if configured.
    pub fn get(&self, variant: ExecutorVariant) -> Option<&AssistantEntry> {
        self.entries.get(&variant)
    }

    /// Configured executable path for a variant.
    pub fn configured_path(&self, variant: ExecutorVariant) -> Option<&str> {
        self.get(variant).and_then(|e| e.configured_path.as_deref())
    }

    /// Remote launcher override for a variant.
    pub fn remote_launcher(&self, variant: ExecutorVariant) -> Option<&str> {
        self.get(variant).and_then(|e| e.remote_launcher.as_deref())
    }

    /// Extra arguments for a variant.
    pub fn extra_args(&self, variant: ExecutorVariant) -> &[String] {
        self.get(variant).map(|e| e.extra_args.as_slice()).unwrap_or(&[])
    }

    /// Insert or replace an entry. Intended for wiring and tests; the file
    /// on disk is never written by this crate.
    pub fn set(&mut self, variant: ExecutorVariant, entry: AssistantEntry) {
        self.entries.insert(variant, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_slots, 2);
        assert!(!config.cleanup_disabled);
        assert!(config.worktree_root.ends_with("worktrees"));
    }

    #[tokio::test]
    async fn missing_settings_file_is_empty() {
        let settings = AssistantSettings::load(std::path::Path::new("/nonexistent/assistants.json"))
            .await
            .unwrap();
        assert!(settings.configured_path(ExecutorVariant::Claude).is_none());
    }

    #[tokio::test]
    async fn settings_roundtrip_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistants.json");
        tokio::fs::write(
            &path,
            r#"{"entries":{"claude":{"configured_path":"/opt/tool/bin","extra_args":["--verbose"]}}}"#,
        )
        .await
        .unwrap();

        let settings = AssistantSettings::load(&path).await.unwrap();
        assert_eq!(
            settings.configured_path(ExecutorVariant::Claude),
            Some("/opt/tool/bin")
        );
        assert_eq!(settings.extra_args(ExecutorVariant::Claude), ["--verbose"]);
        assert!(settings.configured_path(ExecutorVariant::Gemini).is_none());
    }

    #[tokio::test]
    async fn malformed_settings_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistants.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = AssistantSettings::load(&path).await;
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
