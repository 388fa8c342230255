//! Gemini CLI invocation and output conventions.
//!
//! The prompt is passed via `-p`; `--yolo` auto-approves tool use so the
//! run is unattended. Exit code is the outcome contract; there is no
//! session resumption.

use crate::config::AssistantSettings;
use crate::executor::{ExecutorVariant, Invocation, PromptDelivery, followup_prompt, task_prompt};
use crate::process::ProcessResult;
use crate::task::{AttemptOutcome, Task};

fn invocation(prompt: String, settings: &AssistantSettings) -> Invocation {
    let mut args = vec!["--yolo".to_string()];
    args.extend(settings.extra_args(ExecutorVariant::Gemini).iter().cloned());
    // `-p` must stay adjacent to the prompt argument appended at assembly.
    args.push("-p".to_string());

    Invocation {
        variant: ExecutorVariant::Gemini,
        args,
        prompt,
        delivery: PromptDelivery::Argument,
        env: vec![("NODE_NO_WARNINGS".to_string(), "1".to_string())],
        stop_indicator: None,
    }
}

pub(super) fn build(task: &Task, settings: &AssistantSettings) -> Invocation {
    invocation(task_prompt(task), settings)
}

pub(super) fn build_followup(
    task: &Task,
    feedback: &str,
    settings: &AssistantSettings,
) -> Invocation {
    invocation(followup_prompt(task, feedback), settings)
}

pub(super) fn interpret(result: &ProcessResult) -> AttemptOutcome {
    match result.exit_code {
        Some(0) => AttemptOutcome::Succeeded,
        _ => AttemptOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ProjectRef;

    #[test]
    fn prompt_is_argument_after_p_flag() {
        let task = Task::new(
            "Rename module",
            None,
            ExecutorVariant::Gemini,
            ProjectRef::new("/tmp/repo", "main"),
        );
        let inv = build(&task, &AssistantSettings::default());
        assert_eq!(inv.delivery, PromptDelivery::Argument);
        assert_eq!(inv.args.last().map(String::as_str), Some("-p"));
    }
}
