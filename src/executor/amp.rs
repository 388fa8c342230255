//! Amp invocation and output conventions.
//!
//! Amp takes the prompt as an argument in execute mode and signals task
//! failure purely through its exit code. It has no session resumption, so
//! follow-ups start a fresh run with the feedback folded into the prompt.

use crate::config::AssistantSettings;
use crate::executor::{ExecutorVariant, Invocation, PromptDelivery, followup_prompt, task_prompt};
use crate::process::ProcessResult;
use crate::task::{AttemptOutcome, Task};

fn invocation(prompt: String, settings: &AssistantSettings) -> Invocation {
    let mut args = vec!["-x".to_string()];
    args.extend(settings.extra_args(ExecutorVariant::Amp).iter().cloned());

    Invocation {
        variant: ExecutorVariant::Amp,
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
    use std::time::Duration;

    #[test]
    fn exit_code_is_the_whole_contract() {
        let ok = ProcessResult {
            exit_code: Some(0),
            duration: Duration::from_secs(1),
            timed_out: false,
            cancelled: false,
        };
        assert_eq!(interpret(&ok), AttemptOutcome::Succeeded);

        let killed = ProcessResult {
            exit_code: None,
            ..ok
        };
        assert_eq!(interpret(&killed), AttemptOutcome::Failed);
    }
}
