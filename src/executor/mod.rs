//! Assistant executors — capability dispatch over the supported variants.
//!
//! Each variant encodes how the task text reaches the assistant (stdin,
//! argument, or a generated script), which execution mode is used, and how
//! the process's exit and output are classified into an `AttemptOutcome`.
//! The set is closed: adding an assistant means adding an enum variant and
//! its arms here; nothing else in the engine inspects variant identity.

mod amp;
mod claude;
mod gemini;

use serde::{Deserialize, Serialize};

use crate::config::AssistantSettings;
use crate::process::ProcessResult;
use crate::resolver::ResolvedCommand;
use crate::shell;
use crate::task::{AttemptOutcome, Task};

/// The supported assistant variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorVariant {
    /// Claude Code, unattended.
    Claude,
    /// Claude Code in plan/preview mode.
    ClaudePlan,
    /// Amp.
    Amp,
    /// Gemini CLI.
    Gemini,
}

impl ExecutorVariant {
    pub const ALL: [ExecutorVariant; 4] = [
        ExecutorVariant::Claude,
        ExecutorVariant::ClaudePlan,
        ExecutorVariant::Amp,
        ExecutorVariant::Gemini,
    ];

    /// Binary name probed during local detection.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Claude | Self::ClaudePlan => "claude",
            Self::Amp => "amp",
            Self::Gemini => "gemini",
        }
    }

    /// Launcher invocation used by the remote-fallback tier.
    pub fn default_launcher(&self) -> &'static str {
        match self {
            Self::Claude | Self::ClaudePlan => "npx -y @anthropic-ai/claude-code@latest",
            Self::Amp => "npx -y @sourcegraph/amp@latest",
            Self::Gemini => "npx -y @google/gemini-cli@latest",
        }
    }
}

impl std::fmt::Display for ExecutorVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Claude => "claude",
            Self::ClaudePlan => "claude-plan",
            Self::Amp => "amp",
            Self::Gemini => "gemini",
        };
        write!(f, "{s}")
    }
}

/// How the prompt reaches the assistant process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    /// Written to the process's stdin, then stdin is closed.
    Stdin,
    /// Appended to the command line as a quoted argument.
    Argument,
}

/// A variant's invocation, before command resolution.
///
/// The resolver supplies the base program; `assemble` combines the two into
/// the final shell command plus stdin payload.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub variant: ExecutorVariant,
    /// Mode flags appended after the base program.
    pub args: Vec<String>,
    pub prompt: String,
    pub delivery: PromptDelivery,
    /// Extra environment entries for the process.
    pub env: Vec<(String, String)>,
    /// When set, the command is wrapped in a watch-kill script that exits
    /// cleanly once this marker appears in the output stream.
    pub stop_indicator: Option<String>,
}

/// Final runnable form of an invocation.
#[derive(Debug, Clone)]
pub struct AssembledCommand {
    /// Full shell command string.
    pub command: String,
    /// Stdin payload, for stdin delivery.
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Combine with a resolved base program into a runnable command.
    pub fn assemble(&self, base: &ResolvedCommand) -> AssembledCommand {
        let mut command = base.program.clone();
        for arg in &self.args {
            command.push(' ');
            command.push_str(arg);
        }

        let stdin = match self.delivery {
            PromptDelivery::Stdin => Some(self.prompt.clone()),
            PromptDelivery::Argument => {
                command.push(' ');
                command.push_str(&shell::quote(&self.prompt));
                None
            }
        };

        if let Some(indicator) = &self.stop_indicator {
            let script = watchkill_script(&command, indicator);
            command = format!("bash -c {}", shell::quote(&script));
        }

        AssembledCommand {
            command,
            stdin,
            env: self.env.clone(),
        }
    }
}

/// Build the invocation for a fresh attempt at a task.
pub fn build_invocation(
    variant: ExecutorVariant,
    task: &Task,
    settings: &AssistantSettings,
) -> Invocation {
    match variant {
        ExecutorVariant::Claude => claude::build(task, false, settings),
        ExecutorVariant::ClaudePlan => claude::build(task, true, settings),
        ExecutorVariant::Amp => amp::build(task, settings),
        ExecutorVariant::Gemini => gemini::build(task, settings),
    }
}

/// Build the invocation for a follow-up attempt (re-iteration from review).
///
/// Variants that support session resumption continue the prior session;
/// the rest start fresh with the feedback folded into the prompt.
pub fn build_followup_invocation(
    variant: ExecutorVariant,
    task: &Task,
    session_id: Option<&str>,
    feedback: &str,
    settings: &AssistantSettings,
) -> Invocation {
    match variant {
        ExecutorVariant::Claude => claude::build_followup(task, session_id, feedback, false, settings),
        ExecutorVariant::ClaudePlan => {
            claude::build_followup(task, session_id, feedback, true, settings)
        }
        ExecutorVariant::Amp => amp::build_followup(task, feedback, settings),
        ExecutorVariant::Gemini => gemini::build_followup(task, feedback, settings),
    }
}

/// Classify a finished process into an attempt outcome.
///
/// `log_tail` is the last captured output lines, used for variants whose
/// stream reports errors despite a zero exit.
pub fn interpret_outcome(
    variant: ExecutorVariant,
    result: &ProcessResult,
    log_tail: &str,
) -> AttemptOutcome {
    if result.cancelled {
        return AttemptOutcome::Cancelled;
    }
    if result.timed_out {
        return AttemptOutcome::TimedOut;
    }
    match variant {
        ExecutorVariant::Claude => claude::interpret(result, log_tail, false),
        ExecutorVariant::ClaudePlan => claude::interpret(result, log_tail, true),
        ExecutorVariant::Amp => amp::interpret(result),
        ExecutorVariant::Gemini => gemini::interpret(result),
    }
}

/// Harvest the assistant session id from one output line, if the variant
/// exposes one.
pub fn extract_session_id(variant: ExecutorVariant, line: &str) -> Option<String> {
    match variant {
        ExecutorVariant::Claude | ExecutorVariant::ClaudePlan => claude::session_id(line),
        ExecutorVariant::Amp | ExecutorVariant::Gemini => None,
    }
}

/// The prompt shared by all variants.
fn task_prompt(task: &Task) -> String {
    match &task.description {
        Some(description) => format!(
            "project_id: {}\n\nTask title: {}\nTask description: {}",
            task.project.id, task.title, description
        ),
        None => format!(
            "project_id: {}\n\nTask title: {}",
            task.project.id, task.title
        ),
    }
}

/// Fold review feedback into a fresh prompt for variants without sessions.
fn followup_prompt(task: &Task, feedback: &str) -> String {
    format!(
        "{}\n\nReview feedback on the previous attempt:\n{}",
        task_prompt(task),
        feedback
    )
}

/// Wrap a command so the stream is cut off once `word` appears.
///
/// Runs under `bash` for `PIPESTATUS` and process substitution; stdin is
/// passed through so stdin-delivered prompts still reach the assistant.
fn watchkill_script(command: &str, word: &str) -> String {
    format!(
        r#"set -euo pipefail

word="{word}"

exit_code=0
while IFS= read -r line; do
    printf '%s\n' "$line"
    if [[ $line == *"$word"* ]]; then
        exit 0
    fi
done < <({command} <&0 2>&1)

exit_code=${{PIPESTATUS[0]}}
exit "$exit_code"
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolutionTier;
    use crate::task::ProjectRef;

    fn test_task(variant: ExecutorVariant) -> Task {
        Task::new(
            "Add dark mode",
            Some("Respect the OS preference".to_string()),
            variant,
            ProjectRef::new("/tmp/repo", "main"),
        )
    }

    fn base(variant: ExecutorVariant, program: &str) -> ResolvedCommand {
        ResolvedCommand {
            variant,
            program: program.to_string(),
            tier: ResolutionTier::Local,
        }
    }

    #[test]
    fn variant_identities_are_closed_and_distinct() {
        let names: Vec<String> = ExecutorVariant::ALL.iter().map(|v| v.to_string()).collect();
        assert_eq!(names, ["claude", "claude-plan", "amp", "gemini"]);
        let json = serde_json::to_string(&ExecutorVariant::ClaudePlan).unwrap();
        assert_eq!(json, "\"claude-plan\"");
    }

    #[test]
    fn claude_delivers_prompt_on_stdin() {
        let task = test_task(ExecutorVariant::Claude);
        let invocation =
            build_invocation(ExecutorVariant::Claude, &task, &AssistantSettings::default());
        let assembled = invocation.assemble(&base(ExecutorVariant::Claude, "claude"));

        assert!(assembled.command.starts_with("claude -p"));
        assert!(assembled.command.contains("--dangerously-skip-permissions"));
        assert!(assembled.command.contains("--output-format=stream-json"));
        let stdin = assembled.stdin.unwrap();
        assert!(stdin.contains("Add dark mode"));
        assert!(stdin.contains("Respect the OS preference"));
    }

    #[test]
    fn claude_plan_wraps_in_watchkill_script() {
        let task = test_task(ExecutorVariant::ClaudePlan);
        let invocation = build_invocation(
            ExecutorVariant::ClaudePlan,
            &task,
            &AssistantSettings::default(),
        );
        let assembled = invocation.assemble(&base(ExecutorVariant::ClaudePlan, "claude"));

        assert!(assembled.command.starts_with("bash -c "));
        assert!(assembled.command.contains("--permission-mode=plan"));
        assert!(assembled.command.contains("exit_plan_mode"));
        assert!(assembled.stdin.is_some());
    }

    #[test]
    fn amp_delivers_prompt_as_argument() {
        let task = test_task(ExecutorVariant::Amp);
        let invocation =
            build_invocation(ExecutorVariant::Amp, &task, &AssistantSettings::default());
        let assembled = invocation.assemble(&base(ExecutorVariant::Amp, "amp"));

        assert!(assembled.stdin.is_none());
        assert!(assembled.command.contains("Add dark mode"));
    }

    #[test]
    fn extra_args_from_settings_are_appended() {
        let mut settings = AssistantSettings::default();
        settings.set(
            ExecutorVariant::Gemini,
            crate::config::AssistantEntry {
                extra_args: vec!["--sandbox".to_string()],
                ..Default::default()
            },
        );
        let task = test_task(ExecutorVariant::Gemini);
        let invocation = build_invocation(ExecutorVariant::Gemini, &task, &settings);
        let assembled = invocation.assemble(&base(ExecutorVariant::Gemini, "gemini"));
        assert!(assembled.command.contains("--sandbox"));
    }

    #[test]
    fn followup_with_session_resumes() {
        let task = test_task(ExecutorVariant::Claude);
        let invocation = build_followup_invocation(
            ExecutorVariant::Claude,
            &task,
            Some("sess-1234"),
            "Please also update the tests",
            &AssistantSettings::default(),
        );
        let assembled = invocation.assemble(&base(ExecutorVariant::Claude, "claude"));
        assert!(assembled.command.contains("--resume=sess-1234"));
        let stdin = assembled.stdin.unwrap();
        assert!(stdin.contains("Please also update the tests"));
        // The resumed session already has the task context.
        assert!(!stdin.contains("project_id"));
    }

    #[test]
    fn followup_without_session_starts_fresh_with_feedback() {
        let task = test_task(ExecutorVariant::Gemini);
        let invocation = build_followup_invocation(
            ExecutorVariant::Gemini,
            &task,
            None,
            "Missing error handling",
            &AssistantSettings::default(),
        );
        assert!(invocation.prompt.contains("Add dark mode"));
        assert!(invocation.prompt.contains("Missing error handling"));
    }

    #[test]
    fn cancellation_and_timeout_override_exit_codes() {
        let mut result = ProcessResult {
            exit_code: Some(0),
            duration: std::time::Duration::from_secs(1),
            timed_out: false,
            cancelled: true,
        };
        assert_eq!(
            interpret_outcome(ExecutorVariant::Claude, &result, ""),
            AttemptOutcome::Cancelled
        );

        result.cancelled = false;
        result.timed_out = true;
        assert_eq!(
            interpret_outcome(ExecutorVariant::Amp, &result, ""),
            AttemptOutcome::TimedOut
        );
    }

    #[test]
    fn session_id_only_from_claude_stream() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#;
        assert_eq!(
            extract_session_id(ExecutorVariant::Claude, line),
            Some("abc-123".to_string())
        );
        assert_eq!(extract_session_id(ExecutorVariant::Amp, line), None);
    }

    #[test]
    fn watchkill_script_preserves_exit_code_plumbing() {
        let script = watchkill_script("claude -p", "stop here");
        assert!(script.contains("set -euo pipefail"));
        assert!(script.contains(r#"word="stop here""#));
        assert!(script.contains("claude -p <&0 2>&1"));
        assert!(script.contains("PIPESTATUS"));
    }
}
