//! Worktree lifecycle — one isolated, disposable working copy per attempt.
//!
//! - `git` — the `VcsBackend` seam and the `git` CLI implementation
//!
//! Every acquired worktree carries a JSON marker file so that a crashed
//! process leaves enough on disk for the orphan sweep to reconcile the
//! filesystem against the task store on the next startup.

pub mod git;

pub use git::{GitCli, VcsBackend};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::WorktreeError;
use crate::events::{EventBus, OrchestratorEvent};
use crate::store::TaskStore;
use crate::task::{AttemptOutcome, ProjectRef};

/// Marker file written inside every worktree this engine creates.
pub const MARKER_FILE: &str = ".taskforge-worktree.json";

/// An isolated working copy bound to one attempt.
///
/// `attempt_id` of `None` means the worktree is orphaned: its owner crashed
/// or failed to release it, and the sweep may reclaim it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub path: PathBuf,
    pub project_id: Uuid,
    /// The repository this worktree was split from; needed for removal.
    pub repo_path: PathBuf,
    pub base_ref: String,
    pub branch: String,
    pub attempt_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// What `release` did with the worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseDisposition {
    /// Worktree and branch removed.
    Removed { patch: Option<PathBuf> },
    /// Worktree kept on disk (cleanup disabled, review retention, or
    /// timed-out run preserved for inspection).
    Retained { patch: Option<PathBuf> },
    /// Removal failed; the worktree is now orphaned and sweep-eligible.
    Orphaned,
}

/// Result of one orphan sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub retained: usize,
}

/// Creates and destroys per-attempt worktrees.
pub struct WorktreeManager {
    root: PathBuf,
    artifact_dir: PathBuf,
    vcs: Arc<dyn VcsBackend>,
    cleanup_disabled: bool,
    retain_on_review: bool,
    events: EventBus,
}

impl WorktreeManager {
    pub fn new(config: &OrchestratorConfig, vcs: Arc<dyn VcsBackend>, events: EventBus) -> Self {
        Self {
            root: config.worktree_root.clone(),
            artifact_dir: config.worktree_root.join("artifacts"),
            vcs,
            cleanup_disabled: config.cleanup_disabled,
            retain_on_review: config.retain_on_review,
            events,
        }
    }

    /// Create a worktree for an attempt.
    ///
    /// Path and branch are derived from the attempt id, so concurrently live
    /// attempts can never collide. Acquisition either fully completes
    /// (worktree plus marker) or rolls back.
    pub async fn acquire(
        &self,
        project: &ProjectRef,
        attempt_id: Uuid,
    ) -> Result<Worktree, WorktreeError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.root.join(format!("wt-{attempt_id}"));
        let branch = format!("taskforge/{attempt_id}");

        if tokio::fs::try_exists(&path).await? {
            return Err(WorktreeError::AcquisitionFailed {
                attempt_id,
                reason: format!("path {} already exists", path.display()),
            });
        }

        self.vcs
            .add_worktree(&project.repo_path, &path, &branch, &project.base_ref)
            .await
            .map_err(|e| WorktreeError::AcquisitionFailed {
                attempt_id,
                reason: e.to_string(),
            })?;

        let worktree = Worktree {
            path: path.clone(),
            project_id: project.id,
            repo_path: project.repo_path.clone(),
            base_ref: project.base_ref.clone(),
            branch: branch.clone(),
            attempt_id: Some(attempt_id),
            created_at: Utc::now(),
        };

        if let Err(e) = self.write_marker(&worktree).await {
            // Roll back the half-created worktree; a failure here must not
            // leave anything live behind.
            tracing::warn!(path = %path.display(), error = %e, "marker write failed, rolling back worktree");
            let _ = self.vcs.remove_worktree(&project.repo_path, &path).await;
            let _ = self.vcs.delete_branch(&project.repo_path, &branch).await;
            return Err(WorktreeError::AcquisitionFailed {
                attempt_id,
                reason: format!("could not write marker: {e}"),
            });
        }

        tracing::info!(
            attempt_id = %attempt_id,
            path = %worktree.path.display(),
            branch = %worktree.branch,
            "worktree acquired"
        );
        Ok(worktree)
    }

    /// Release a worktree after its attempt settled.
    ///
    /// On reviewable outcomes the diff against base is captured as a patch
    /// artifact first. Removal is skipped when cleanup is disabled, when the
    /// review-retention policy applies, or when the run timed out (kept for
    /// inspection). A removal failure orphans the worktree instead of
    /// failing the attempt.
    pub async fn release(&self, worktree: Worktree, outcome: AttemptOutcome) -> ReleaseDisposition {
        let patch = if outcome.is_reviewable() {
            self.capture_patch(&worktree).await
        } else {
            None
        };

        let retain_reason = if self.cleanup_disabled {
            Some("cleanup disabled")
        } else if outcome == AttemptOutcome::TimedOut {
            Some("timed out, kept for inspection")
        } else if self.retain_on_review && outcome.is_reviewable() {
            Some("retained for review")
        } else {
            None
        };

        if let Some(reason) = retain_reason {
            tracing::info!(path = %worktree.path.display(), reason, "worktree retained");
            return ReleaseDisposition::Retained { patch };
        }

        match self.remove(&worktree).await {
            Ok(()) => {
                tracing::info!(path = %worktree.path.display(), "worktree released");
                ReleaseDisposition::Removed { patch }
            }
            Err(e) => {
                tracing::error!(path = %worktree.path.display(), error = %e, "worktree release failed, marking orphaned");
                // Disown the marker so the sweep treats it as orphaned even
                // if the attempt record is lost.
                let mut orphaned = worktree.clone();
                orphaned.attempt_id = None;
                let _ = self.write_marker(&orphaned).await;
                self.events.emit(OrchestratorEvent::WorktreeOrphaned {
                    attempt_id: worktree.attempt_id,
                    path: worktree.path.clone(),
                });
                ReleaseDisposition::Orphaned
            }
        }
    }

    /// Reconcile the worktree root against the task store, deleting any
    /// worktree whose owning attempt is missing or terminal and older than
    /// `max_age`. Idempotent; a no-op when cleanup is disabled.
    pub async fn sweep_orphans(
        &self,
        max_age: Duration,
        store: &dyn TaskStore,
    ) -> Result<SweepReport, WorktreeError> {
        let mut report = SweepReport::default();

        if self.cleanup_disabled {
            tracing::debug!("orphan sweep skipped: cleanup disabled");
            return Ok(report);
        }

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let marker_path = entry.path().join(MARKER_FILE);
            let Ok(content) = tokio::fs::read_to_string(&marker_path).await else {
                // Not one of ours (e.g. the artifacts directory).
                continue;
            };
            report.scanned += 1;

            let worktree: Worktree = match serde_json::from_str(&content) {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!(path = %marker_path.display(), error = %e, "corrupt worktree marker, leaving in place");
                    report.retained += 1;
                    continue;
                }
            };

            let live = match worktree.attempt_id {
                None => false,
                Some(attempt_id) => match store.attempt_is_live(attempt_id).await {
                    Ok(live) => live,
                    Err(e) => {
                        tracing::warn!(attempt_id = %attempt_id, error = %e, "store lookup failed during sweep, retaining worktree");
                        true
                    }
                },
            };

            let age = Utc::now().signed_duration_since(worktree.created_at);
            let old_enough = age.to_std().map(|a| a >= max_age).unwrap_or(false);

            if live || !old_enough {
                report.retained += 1;
                continue;
            }

            if let Err(e) = self.remove(&worktree).await {
                // The owning repo may be gone; fall back to a plain delete.
                tracing::warn!(path = %worktree.path.display(), error = %e, "vcs removal failed during sweep, deleting directory");
                tokio::fs::remove_dir_all(&worktree.path).await?;
            }
            tracing::info!(path = %worktree.path.display(), "orphaned worktree reclaimed");
            self.events.emit(OrchestratorEvent::OrphanRemoved {
                path: worktree.path.clone(),
            });
            report.removed += 1;
        }

        Ok(report)
    }

    async fn remove(&self, worktree: &Worktree) -> Result<(), WorktreeError> {
        self.vcs
            .remove_worktree(&worktree.repo_path, &worktree.path)
            .await?;
        self.vcs
            .delete_branch(&worktree.repo_path, &worktree.branch)
            .await?;
        Ok(())
    }

    /// Capture the diff-vs-base as a patch artifact for the review surface.
    async fn capture_patch(&self, worktree: &Worktree) -> Option<PathBuf> {
        let diff = match self
            .vcs
            .diff_against(&worktree.path, &worktree.base_ref)
            .await
        {
            Ok(diff) => diff,
            Err(e) => {
                tracing::warn!(path = %worktree.path.display(), error = %e, "diff capture failed");
                return None;
            }
        };

        let attempt_id = worktree.attempt_id?;
        let patch_path = self.artifact_dir.join(format!("{attempt_id}.patch"));
        if let Err(e) = tokio::fs::create_dir_all(&self.artifact_dir).await {
            tracing::warn!(error = %e, "could not create artifact directory");
            return None;
        }
        if let Err(e) = tokio::fs::write(&patch_path, &diff).await {
            tracing::warn!(path = %patch_path.display(), error = %e, "could not write patch artifact");
            return None;
        }

        self.events.emit(OrchestratorEvent::DiffCaptured {
            attempt_id,
            patch_path: patch_path.clone(),
        });
        Some(patch_path)
    }

    async fn write_marker(&self, worktree: &Worktree) -> Result<(), WorktreeError> {
        let content = serde_json::to_string_pretty(worktree)
            .map_err(|e| WorktreeError::MarkerCorrupt {
                path: worktree.path.join(MARKER_FILE),
                reason: e.to_string(),
            })?;
        tokio::fs::write(worktree.path.join(MARKER_FILE), content).await?;
        Ok(())
    }
}
