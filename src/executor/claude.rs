//! Claude Code invocation and output conventions.
//!
//! Unattended mode runs `-p` with permissions skipped; plan mode runs with
//! `--permission-mode=plan` under a watch-kill wrapper, because the CLI
//! blocks waiting for the `exit_plan_mode` grant it will never get in an
//! unattended run. Output is `--output-format=stream-json`, one JSON object
//! per line, which carries the session id and a terminal `result` record.

use crate::config::AssistantSettings;
use crate::executor::{ExecutorVariant, Invocation, PromptDelivery, followup_prompt, task_prompt};
use crate::process::ProcessResult;
use crate::task::{AttemptOutcome, Task};

/// Marker printed when plan mode has produced its plan and wants the
/// (never-granted) permission to leave plan mode.
const PLAN_STOP_INDICATOR: &str =
    "Claude requested permissions to use exit_plan_mode, but you haven't granted it yet";

fn variant_for(plan_mode: bool) -> ExecutorVariant {
    if plan_mode {
        ExecutorVariant::ClaudePlan
    } else {
        ExecutorVariant::Claude
    }
}

fn mode_args(plan_mode: bool, resume: Option<&str>) -> Vec<String> {
    let mut args = vec!["-p".to_string()];
    if let Some(session_id) = resume {
        args.push(format!("--resume={session_id}"));
    }
    if plan_mode {
        args.push("--permission-mode=plan".to_string());
    } else {
        args.push("--dangerously-skip-permissions".to_string());
    }
    args.push("--verbose".to_string());
    args.push("--output-format=stream-json".to_string());
    args
}

pub(super) fn build(task: &Task, plan_mode: bool, settings: &AssistantSettings) -> Invocation {
    let variant = variant_for(plan_mode);
    let mut args = mode_args(plan_mode, None);
    args.extend(settings.extra_args(variant).iter().cloned());

    Invocation {
        variant,
        args,
        prompt: task_prompt(task),
        delivery: PromptDelivery::Stdin,
        env: vec![("NODE_NO_WARNINGS".to_string(), "1".to_string())],
        stop_indicator: plan_mode.then(|| PLAN_STOP_INDICATOR.to_string()),
    }
}

pub(super) fn build_followup(
    task: &Task,
    session_id: Option<&str>,
    feedback: &str,
    plan_mode: bool,
    settings: &AssistantSettings,
) -> Invocation {
    let variant = variant_for(plan_mode);
    let mut args = mode_args(plan_mode, session_id);
    args.extend(settings.extra_args(variant).iter().cloned());

    // A resumed session already carries the task context; a fresh run needs
    // the full prompt with the feedback folded in.
    let prompt = if session_id.is_some() {
        feedback.to_string()
    } else {
        followup_prompt(task, feedback)
    };

    Invocation {
        variant,
        args,
        prompt,
        delivery: PromptDelivery::Stdin,
        env: vec![("NODE_NO_WARNINGS".to_string(), "1".to_string())],
        stop_indicator: plan_mode.then(|| PLAN_STOP_INDICATOR.to_string()),
    }
}

pub(super) fn interpret(
    result: &ProcessResult,
    log_tail: &str,
    plan_mode: bool,
) -> AttemptOutcome {
    match result.exit_code {
        Some(0) => {
            if stream_reports_error(log_tail) {
                AttemptOutcome::Failed
            } else if plan_mode {
                // A finished plan run produced a plan, not applied changes.
                AttemptOutcome::NeedsReview
            } else {
                AttemptOutcome::Succeeded
            }
        }
        _ => AttemptOutcome::Failed,
    }
}

/// The stream's terminal `result` record can flag an error even on exit 0.
fn stream_reports_error(log_tail: &str) -> bool {
    log_tail.lines().rev().any(|line| {
        serde_json::from_str::<serde_json::Value>(line.trim())
            .ok()
            .filter(|json| json.get("type").and_then(|t| t.as_str()) == Some("result"))
            .and_then(|json| json.get("is_error").and_then(|e| e.as_bool()))
            .unwrap_or(false)
    })
}

/// Session id from any stream-JSON line that carries one.
pub(super) fn session_id(line: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line.trim())
        .ok()?
        .get("session_id")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn exited(code: i32) -> ProcessResult {
        ProcessResult {
            exit_code: Some(code),
            duration: Duration::from_secs(1),
            timed_out: false,
            cancelled: false,
        }
    }

    #[test]
    fn clean_exit_succeeds() {
        assert_eq!(interpret(&exited(0), "", false), AttemptOutcome::Succeeded);
    }

    #[test]
    fn clean_exit_in_plan_mode_needs_review() {
        assert_eq!(interpret(&exited(0), "", true), AttemptOutcome::NeedsReview);
    }

    #[test]
    fn nonzero_exit_fails() {
        assert_eq!(interpret(&exited(1), "", false), AttemptOutcome::Failed);
    }

    #[test]
    fn stream_error_record_fails_despite_exit_zero() {
        let tail = r#"{"type":"assistant","message":{}}
{"type":"result","subtype":"error_during_execution","is_error":true}"#;
        assert_eq!(interpret(&exited(0), tail, false), AttemptOutcome::Failed);
    }

    #[test]
    fn successful_result_record_is_not_an_error() {
        let tail = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":6059}"#;
        assert_eq!(interpret(&exited(0), tail, false), AttemptOutcome::Succeeded);
    }

    #[test]
    fn session_id_parsed_from_init_line() {
        let line = r#"{"type":"system","subtype":"init","cwd":"/tmp","session_id":"e988eeea-3712-46a1-82d4-84fbfaa69114","model":"claude-sonnet-4"}"#;
        assert_eq!(
            session_id(line),
            Some("e988eeea-3712-46a1-82d4-84fbfaa69114".to_string())
        );
    }

    #[test]
    fn session_id_ignores_non_json_noise() {
        assert_eq!(session_id("npm WARN deprecated something"), None);
        assert_eq!(session_id(""), None);
    }

    #[test]
    fn resume_flag_ordering() {
        let args = mode_args(false, Some("sess-9"));
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "--resume=sess-9");
    }
}
