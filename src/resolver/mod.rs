//! Command resolution — which concrete command invokes an assistant.
//!
//! Resolution walks a priority chain: the operator-configured path, then
//! local detection (search path plus well-known install locations), then a
//! remote launcher that needs no local install. Successful resolutions and
//! local probe results (positive *and* negative) are cached for the session
//! in an explicit `SessionCache`, never a global; a cached command is only
//! re-resolved after it fails at runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::AssistantSettings;
use crate::error::ResolveError;
use crate::executor::ExecutorVariant;
use crate::shell::get_shell_command;

/// Well-known install directories probed during local detection.
const WELL_KNOWN_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/opt/homebrew/bin",
    "~/.local/bin",
];

/// Which tier a command was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionTier {
    /// Explicit path from the assistant configuration.
    Configured,
    /// Locally detected installation.
    Local,
    /// Launcher invocation that requires no local install.
    RemoteFallback,
}

impl ResolutionTier {
    /// Priority order, highest first.
    pub const CHAIN: [ResolutionTier; 3] = [
        ResolutionTier::Configured,
        ResolutionTier::Local,
        ResolutionTier::RemoteFallback,
    ];
}

impl std::fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configured => "configured",
            Self::Local => "local",
            Self::RemoteFallback => "remote-fallback",
        };
        write!(f, "{s}")
    }
}

/// A runnable command for one assistant variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub variant: ExecutorVariant,
    /// Executable path or launcher invocation (shell fragment).
    pub program: String,
    pub tier: ResolutionTier,
}

/// Session-scoped resolution cache.
///
/// Initialized empty, discarded at session end. Read-mostly; writes happen
/// on first resolution per variant and on runtime fallback.
#[derive(Debug, Default)]
pub struct SessionCache {
    resolved: RwLock<HashMap<ExecutorVariant, ResolvedCommand>>,
    local_probe: RwLock<HashMap<ExecutorVariant, Option<String>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached resolution for a variant, if any.
    pub async fn resolved(&self, variant: ExecutorVariant) -> Option<ResolvedCommand> {
        self.resolved.read().await.get(&variant).cloned()
    }

    /// Drop the cached resolution after a runtime failure so the next
    /// `resolve` walks the chain again.
    pub async fn invalidate(&self, variant: ExecutorVariant) {
        self.resolved.write().await.remove(&variant);
    }

    async fn store(&self, command: ResolvedCommand) {
        self.resolved.write().await.insert(command.variant, command);
    }

    async fn probe_result(&self, variant: ExecutorVariant) -> Option<Option<String>> {
        self.local_probe.read().await.get(&variant).cloned()
    }

    async fn store_probe(&self, variant: ExecutorVariant, result: Option<String>) {
        self.local_probe.write().await.insert(variant, result);
    }
}

/// Seam for filesystem/PATH probing, so tests can observe and fake it.
#[async_trait]
pub trait BinaryProber: Send + Sync {
    /// Locate a binary on the system search path.
    async fn which(&self, binary: &str) -> Option<String>;

    /// Check whether a candidate path exists.
    async fn exists(&self, path: &Path) -> bool;
}

/// Production prober: `command -v` through the shell, plus direct stat.
#[derive(Debug, Default)]
pub struct SystemProber;

#[async_trait]
impl BinaryProber for SystemProber {
    async fn which(&self, binary: &str) -> Option<String> {
        let (shell_cmd, shell_arg) = get_shell_command();
        let lookup = if cfg!(target_os = "windows") {
            format!("where {binary}")
        } else {
            format!("command -v {binary}")
        };

        let output = tokio::process::Command::new(shell_cmd)
            .arg(shell_arg)
            .arg(&lookup)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let path = String::from_utf8_lossy(&output.stdout);
        let path = path.lines().next().unwrap_or("").trim();
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Resolves assistant variants to runnable commands.
pub struct CommandResolver {
    settings: AssistantSettings,
    prober: Arc<dyn BinaryProber>,
}

impl CommandResolver {
    pub fn new(settings: AssistantSettings) -> Self {
        Self {
            settings,
            prober: Arc::new(SystemProber),
        }
    }

    /// Use a custom prober (tests).
    pub fn with_prober(settings: AssistantSettings, prober: Arc<dyn BinaryProber>) -> Self {
        Self { settings, prober }
    }

    /// Resolve a variant to a command, first tier to succeed wins.
    ///
    /// With `exclude` set (runtime fallback), the cache is bypassed and the
    /// failed tier is skipped; the new resolution replaces the cached one.
    pub async fn resolve(
        &self,
        variant: ExecutorVariant,
        cache: &SessionCache,
        exclude: Option<ResolutionTier>,
    ) -> Result<ResolvedCommand, ResolveError> {
        if exclude.is_none()
            && let Some(cached) = cache.resolved(variant).await
        {
            return Ok(cached);
        }

        for tier in ResolutionTier::CHAIN {
            if Some(tier) == exclude {
                continue;
            }
            if let Some(program) = self.try_tier(variant, tier, cache).await {
                let command = ResolvedCommand {
                    variant,
                    program,
                    tier,
                };
                tracing::debug!(variant = %variant, tier = %tier, program = %command.program, "resolved assistant command");
                cache.store(command.clone()).await;
                return Ok(command);
            }
        }

        Err(ResolveError::ResolutionExhausted {
            variant: variant.to_string(),
        })
    }

    async fn try_tier(
        &self,
        variant: ExecutorVariant,
        tier: ResolutionTier,
        cache: &SessionCache,
    ) -> Option<String> {
        match tier {
            ResolutionTier::Configured => self
                .settings
                .configured_path(variant)
                .map(str::to_string),
            ResolutionTier::Local => {
                if let Some(cached) = cache.probe_result(variant).await {
                    return cached;
                }
                let found = self.probe_local(variant).await;
                cache.store_probe(variant, found.clone()).await;
                found
            }
            ResolutionTier::RemoteFallback => Some(
                self.settings
                    .remote_launcher(variant)
                    .map(str::to_string)
                    .unwrap_or_else(|| variant.default_launcher().to_string()),
            ),
        }
    }

    /// Probe the search path, then the well-known install locations.
    async fn probe_local(&self, variant: ExecutorVariant) -> Option<String> {
        let binary = variant.binary_name();

        if let Some(path) = self.prober.which(binary).await {
            tracing::info!(variant = %variant, path = %path, "detected local assistant binary");
            return Some(path);
        }

        for dir in WELL_KNOWN_DIRS {
            let candidate =
                PathBuf::from(shellexpand::tilde(dir).into_owned()).join(binary);
            if self.prober.exists(&candidate).await {
                tracing::info!(variant = %variant, path = %candidate.display(), "found assistant at well-known location");
                return Some(candidate.display().to_string());
            }
        }

        None
    }
}
