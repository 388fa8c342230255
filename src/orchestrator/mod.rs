//! Task orchestrator — admission, concurrency slots, and the attempt
//! pipeline.
//!
//! Tasks are admitted in FIFO order; each admission takes one slot from a
//! fixed-size semaphore and drives a single attempt through:
//! acquire worktree → build invocation → resolve command → supervise
//! process → classify outcome → release worktree → advance task state.
//! Launcher-level failures trigger exactly one resolver fallback; worktree
//! acquisition failures send the task back to the queue within a bounded
//! retry budget. Cancellation kills the process group and keeps the slot
//! reserved until the process confirms exit.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{AssistantSettings, OrchestratorConfig};
use crate::error::{ProcessError, ResolveError, Result, TaskError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::executor::{self, ExecutorVariant, Invocation};
use crate::process::{ProcessRunner, ProcessSpec};
use crate::resolver::{CommandResolver, ResolutionTier, SessionCache};
use crate::store::TaskStore;
use crate::task::{Attempt, AttemptOutcome, Task, TaskState};
use crate::worktree::{Worktree, WorktreeManager};

/// Lines of process output kept in memory for outcome classification.
const TAIL_LINES: usize = 50;

/// One queued admission. `feedback` is set for follow-up (re-iteration)
/// attempts.
#[derive(Debug, Clone)]
struct WorkItem {
    task_id: Uuid,
    feedback: Option<String>,
    acquire_attempts: u32,
}

/// Control handle for a running attempt.
struct AttemptControl {
    attempt_id: Uuid,
    cancel_tx: watch::Sender<bool>,
    cancel_requested: bool,
}

/// The engine's scheduler and state machine.
pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    settings: AssistantSettings,
    store: Arc<dyn TaskStore>,
    resolver: Arc<CommandResolver>,
    cache: Arc<SessionCache>,
    worktrees: Arc<WorktreeManager>,
    runner: ProcessRunner,
    events: EventBus,
    slots: Arc<Semaphore>,
    queue_tx: mpsc::UnboundedSender<WorkItem>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkItem>>>,
    active: Arc<RwLock<HashMap<Uuid, AttemptControl>>>,
    attempt_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        settings: AssistantSettings,
        store: Arc<dyn TaskStore>,
        resolver: Arc<CommandResolver>,
        worktrees: Arc<WorktreeManager>,
        events: EventBus,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            slots: Arc::new(Semaphore::new(config.max_slots)),
            config,
            settings,
            store,
            resolver,
            cache: Arc::new(SessionCache::new()),
            worktrees,
            runner: ProcessRunner::new(),
            events,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            active: Arc::new(RwLock::new(HashMap::new())),
            attempt_handles: Mutex::new(Vec::new()),
        }
    }

    /// The session-scoped command cache (one per orchestrator lifetime).
    pub fn session_cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start the admission loop. Call once; subsequent calls are no-ops.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut queue_rx) = this.queue_rx.lock().await.take() else {
                tracing::warn!("orchestrator admission loop already running");
                return;
            };
            // FIFO admission: the next item is only popped once a slot has
            // been secured for the previous one.
            while let Some(item) = queue_rx.recv().await {
                let permit = match Arc::clone(&this.slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let runner = Arc::clone(&this);
                let handle = tokio::spawn(async move { runner.run_attempt(item, permit).await });
                let mut handles = this.attempt_handles.lock().await;
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
        })
    }

    /// Register a new task and queue it for admission.
    pub async fn submit(&self, task: Task) -> Result<Uuid> {
        let task_id = task.id;
        self.store.insert_task(task).await?;
        let _ = self.queue_tx.send(WorkItem {
            task_id,
            feedback: None,
            acquire_attempts: 0,
        });
        tracing::info!(task_id = %task_id, "task submitted");
        Ok(task_id)
    }

    /// Queue a follow-up attempt for a task sitting in review.
    pub async fn iterate(&self, task_id: Uuid, feedback: impl Into<String>) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        if task.state != TaskState::InReview {
            return Err(TaskError::InvalidTransition {
                id: task_id,
                from: task.state.to_string(),
                to: TaskState::InProgress.to_string(),
            }
            .into());
        }
        let _ = self.queue_tx.send(WorkItem {
            task_id,
            feedback: Some(feedback.into()),
            acquire_attempts: 0,
        });
        tracing::info!(task_id = %task_id, "follow-up queued");
        Ok(())
    }

    /// Accept a reviewed task.
    pub async fn approve(&self, task_id: Uuid) -> Result<()> {
        let mut task = self.store.get_task(task_id).await?;
        self.set_task_state(&mut task, TaskState::Done).await
    }

    /// Cancel a task.
    ///
    /// A running attempt gets a process-group kill and drains its slot until
    /// the process confirms exit; at most one cancellation may be
    /// outstanding per attempt. A queued or reviewed task is cancelled
    /// directly.
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        {
            let mut active = self.active.write().await;
            if let Some(control) = active.get_mut(&task_id) {
                if control.cancel_requested {
                    return Err(TaskError::CancellationPending { id: task_id }.into());
                }
                control.cancel_requested = true;
                let _ = control.cancel_tx.send(true);
                tracing::info!(task_id = %task_id, attempt_id = %control.attempt_id, "cancellation requested");
                return Ok(());
            }
        }

        let mut task = self.store.get_task(task_id).await?;
        self.set_task_state(&mut task, TaskState::Cancelled).await
    }

    /// Cancel everything in flight and wait up to `grace` for attempts to
    /// drain.
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut active = self.active.write().await;
            for control in active.values_mut() {
                control.cancel_requested = true;
                let _ = control.cancel_tx.send(true);
            }
        }

        let handles: Vec<_> = {
            let mut handles = self.attempt_handles.lock().await;
            handles.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }
        tracing::info!(attempts = handles.len(), "waiting for attempts to drain");
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!("shutdown grace period elapsed with attempts still draining");
        }
    }

    async fn run_attempt(self: Arc<Self>, item: WorkItem, permit: OwnedSemaphorePermit) {
        let task_id = item.task_id;
        if let Err(e) = self.attempt_pipeline(item).await {
            tracing::error!(task_id = %task_id, error = %e, "attempt pipeline failed");
            // Best-effort: an attempt that died mid-pipeline leaves the task
            // failed rather than wedged in InProgress.
            let _ = self.store.set_task_state(task_id, TaskState::Failed).await;
        }
        // Slot is released here, after the process (if any) confirmed exit.
        drop(permit);
    }

    async fn attempt_pipeline(&self, item: WorkItem) -> Result<()> {
        let mut task = self.store.get_task(item.task_id).await?;

        let eligible = match (&item.feedback, task.state) {
            (None, TaskState::Todo) => true,
            // A follow-up admits from review, or from Todo after an
            // acquisition-failure requeue.
            (Some(_), TaskState::InReview | TaskState::Todo) => true,
            _ => false,
        };
        if !eligible {
            tracing::debug!(task_id = %task.id, state = %task.state, "skipping admission, task no longer eligible");
            return Ok(());
        }

        let session_id = match &item.feedback {
            Some(_) => self.latest_session_id(&task).await,
            None => None,
        };

        self.set_task_state(&mut task, TaskState::InProgress).await?;

        let mut attempt = Attempt::new(task.id);
        self.store.create_attempt(attempt.clone()).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.write().await.insert(
            task.id,
            AttemptControl {
                attempt_id: attempt.id,
                cancel_tx,
                cancel_requested: false,
            },
        );

        self.events.emit(OrchestratorEvent::AttemptStarted {
            task_id: task.id,
            attempt_id: attempt.id,
            variant: task.variant.to_string(),
        });
        tracing::info!(task_id = %task.id, attempt_id = %attempt.id, variant = %task.variant, "attempt started");

        let result = self
            .execute_attempt(&mut task, &mut attempt, item, session_id, cancel_rx)
            .await;

        // Deregister this attempt's control. Guarded by attempt id: a
        // requeued successor that already registered must be left alone.
        {
            let mut active = self.active.write().await;
            if active.get(&task.id).map(|c| c.attempt_id) == Some(attempt.id) {
                active.remove(&task.id);
            }
        }
        result
    }

    async fn execute_attempt(
        &self,
        task: &mut Task,
        attempt: &mut Attempt,
        item: WorkItem,
        session_id: Option<String>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let worktree = match self.worktrees.acquire(&task.project, attempt.id).await {
            Ok(worktree) => worktree,
            Err(e) => {
                tracing::warn!(task_id = %task.id, attempt = item.acquire_attempts + 1, error = %e, "worktree acquisition failed");
                attempt.finish(AttemptOutcome::Failed);
                self.store.update_attempt(attempt.clone()).await?;
                if item.acquire_attempts < self.config.acquire_retries {
                    self.set_task_state(task, TaskState::Todo).await?;
                    let _ = self.queue_tx.send(WorkItem {
                        acquire_attempts: item.acquire_attempts + 1,
                        ..item
                    });
                } else {
                    self.set_task_state(task, TaskState::Failed).await?;
                }
                return Ok(());
            }
        };
        attempt.worktree_path = Some(worktree.path.clone());
        attempt.branch = Some(worktree.branch.clone());
        self.store.update_attempt(attempt.clone()).await?;

        let invocation = match &item.feedback {
            Some(feedback) => executor::build_followup_invocation(
                task.variant,
                task,
                session_id.as_deref(),
                feedback,
                &self.settings,
            ),
            None => executor::build_invocation(task.variant, task, &self.settings),
        };

        let outcome = self
            .resolve_and_run(task, attempt, &invocation, &worktree, cancel_rx)
            .await?;

        attempt.finish(outcome);
        self.store.update_attempt(attempt.clone()).await?;

        let disposition = self.worktrees.release(worktree, outcome).await;
        tracing::debug!(attempt_id = %attempt.id, ?disposition, "worktree disposition");

        let target = if outcome.is_reviewable() {
            TaskState::InReview
        } else if outcome == AttemptOutcome::Cancelled {
            TaskState::Cancelled
        } else {
            TaskState::Failed
        };
        self.set_task_state(task, target).await?;

        let duration_ms = attempt
            .ended_at
            .map(|end| end.signed_duration_since(attempt.started_at).num_milliseconds())
            .unwrap_or(0)
            .max(0) as u64;
        self.events.emit(OrchestratorEvent::AttemptFinished {
            task_id: task.id,
            attempt_id: attempt.id,
            outcome: outcome.to_string(),
            exit_code: attempt.exit_code,
            duration_ms,
        });
        tracing::info!(
            task_id = %task.id,
            attempt_id = %attempt.id,
            outcome = %outcome,
            fallbacks = attempt.fallbacks,
            "attempt finished"
        );
        Ok(())
    }

    /// Resolve the command and supervise the process, with at most one
    /// tier fallback on a launcher-level failure.
    async fn resolve_and_run(
        &self,
        task: &Task,
        attempt: &mut Attempt,
        invocation: &Invocation,
        worktree: &Worktree,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<AttemptOutcome> {
        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(ProcessError::Io)?;
        let log_path = self.config.log_dir.join(format!("{}.log", attempt.id));
        let mut capture = OutputCapture::new(&log_path, task.variant)?;
        attempt.log_path = Some(log_path);

        let mut exclude: Option<ResolutionTier> = None;
        let mut pending_fallback_from: Option<ResolutionTier> = None;
        let mut fallback_used = false;

        let outcome = loop {
            let resolved = match self.resolver.resolve(task.variant, &self.cache, exclude).await {
                Ok(resolved) => resolved,
                Err(ResolveError::ResolutionExhausted { .. }) => {
                    break self.exhausted(task, attempt);
                }
            };
            if let Some(from) = pending_fallback_from.take() {
                self.events.emit(OrchestratorEvent::TierFallback {
                    attempt_id: attempt.id,
                    variant: task.variant.to_string(),
                    failed_tier: from.to_string(),
                    next_tier: resolved.tier.to_string(),
                });
            }

            let assembled = invocation.assemble(&resolved);
            attempt.command = Some(assembled.command.clone());
            attempt.tier = Some(resolved.tier);
            self.store.update_attempt(attempt.clone()).await?;

            let spec = ProcessSpec {
                command: assembled.command,
                cwd: worktree.path.clone(),
                env: assembled.env,
                stdin: assembled.stdin,
                timeout: self.config.process_timeout,
            };

            match self
                .runner
                .run(spec, cancel_rx.clone(), |line| capture.push(line))
                .await
            {
                Err(ProcessError::SpawnFailed { command, source }) if !fallback_used => {
                    tracing::warn!(
                        attempt_id = %attempt.id,
                        tier = %resolved.tier,
                        command = %command,
                        error = %source,
                        "spawn failed, falling back to next tier"
                    );
                    self.cache.invalidate(task.variant).await;
                    attempt.fallbacks += 1;
                    fallback_used = true;
                    pending_fallback_from = Some(resolved.tier);
                    exclude = Some(resolved.tier);
                }
                Err(ProcessError::SpawnFailed { .. }) => break self.exhausted(task, attempt),
                Err(e) => return Err(e.into()),
                Ok(result)
                    if result.is_launcher_failure()
                        && !result.cancelled
                        && !result.timed_out =>
                {
                    if fallback_used {
                        break self.exhausted(task, attempt);
                    }
                    tracing::warn!(
                        attempt_id = %attempt.id,
                        tier = %resolved.tier,
                        exit_code = ?result.exit_code,
                        "launcher-level failure, falling back to next tier"
                    );
                    self.cache.invalidate(task.variant).await;
                    attempt.fallbacks += 1;
                    fallback_used = true;
                    pending_fallback_from = Some(resolved.tier);
                    exclude = Some(resolved.tier);
                }
                Ok(result) => {
                    attempt.exit_code = result.exit_code;
                    attempt.session_id = capture.session_id.clone();
                    break executor::interpret_outcome(task.variant, &result, &capture.tail());
                }
            }
        };

        capture.flush();
        Ok(outcome)
    }

    fn exhausted(&self, task: &Task, attempt: &Attempt) -> AttemptOutcome {
        tracing::error!(attempt_id = %attempt.id, variant = %task.variant, "all resolution tiers exhausted");
        self.events.emit(OrchestratorEvent::ResolutionExhausted {
            attempt_id: attempt.id,
            variant: task.variant.to_string(),
        });
        AttemptOutcome::Failed
    }

    /// Session id from the most recent attempt that recorded one.
    async fn latest_session_id(&self, task: &Task) -> Option<String> {
        for id in task.attempt_ids.iter().rev() {
            if let Ok(prev) = self.store.get_attempt(*id).await
                && let Some(session) = prev.session_id
            {
                return Some(session);
            }
        }
        None
    }

    async fn set_task_state(&self, task: &mut Task, target: TaskState) -> Result<()> {
        let from = task.state;
        task.transition_to(target)?;
        self.store.set_task_state(task.id, target).await?;
        self.events.emit(OrchestratorEvent::TaskStateChanged {
            task_id: task.id,
            from: from.to_string(),
            to: target.to_string(),
        });
        tracing::info!(task_id = %task.id, from = %from, to = %target, "task state changed");
        Ok(())
    }
}

/// Captures process output: appends every line to the attempt log file,
/// keeps a bounded tail for outcome classification, and harvests the
/// assistant session id.
struct OutputCapture {
    writer: std::io::BufWriter<std::fs::File>,
    tail: VecDeque<String>,
    session_id: Option<String>,
    variant: ExecutorVariant,
}

impl OutputCapture {
    fn new(path: &Path, variant: ExecutorVariant) -> std::result::Result<Self, ProcessError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(ProcessError::Io)?;
        Ok(Self {
            writer: std::io::BufWriter::new(file),
            tail: VecDeque::with_capacity(TAIL_LINES),
            session_id: None,
            variant,
        })
    }

    fn push(&mut self, line: &str) {
        let _ = writeln!(self.writer, "{line}");
        if self.session_id.is_none() {
            self.session_id = executor::extract_session_id(self.variant, line);
        }
        if self.tail.len() == TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    fn tail(&self) -> String {
        let lines: Vec<&str> = self.tail.iter().map(String::as_str).collect();
        lines.join("\n")
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}
