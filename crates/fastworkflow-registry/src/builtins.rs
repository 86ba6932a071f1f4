use crate::schema::CommandDescriptor;

/// Context of the built-in error-correction commands.
pub const ERROR_CORRECTION: &str = "ErrorCorrection";
/// Context of the built-in intent-detection commands.
pub const INTENT_DETECTION: &str = "IntentDetection";

pub const ABORT: &str = "ErrorCorrection/abort";
pub const YOU_MISUNDERSTOOD: &str = "ErrorCorrection/you_misunderstood";
pub const WHAT_CAN_I_DO: &str = "IntentDetection/what_can_i_do";
pub const GO_UP: &str = "IntentDetection/go_up";
pub const RESET_CONTEXT: &str = "IntentDetection/reset_context";

fn builtin(context: &str, name: &str, display: &str, utterances: &[&str]) -> CommandDescriptor {
    CommandDescriptor {
        qualified_name: format!("{context}/{name}"),
        context: context.to_string(),
        name: name.to_string(),
        display_name: display.to_string(),
        description: String::new(),
        parameters: Vec::new(),
        plain_utterances: utterances.iter().map(|s| s.to_string()).collect(),
        template_utterances: Vec::new(),
        is_builtin: true,
    }
}

/// Synthesize the built-in command descriptors every workflow carries.
///
/// Abort and "you misunderstood" are first-class correction verbs; they are
/// exact-matched against these plain utterances independent of the
/// classifier.
pub fn builtin_commands() -> Vec<CommandDescriptor> {
    vec![
        builtin(
            ERROR_CORRECTION,
            "abort",
            "abort",
            &[
                "abort",
                "cancel",
                "stop",
                "quit",
                "terminate",
                "end",
                "never mind",
                "exit",
            ],
        ),
        builtin(
            ERROR_CORRECTION,
            "you_misunderstood",
            "you misunderstood",
            &[
                "you_misunderstood",
                "you misunderstood",
                "that is not what i meant",
                "not what i asked",
                "none of these commands",
                "incorrect command",
                "wrong command",
                "change command",
                "different command",
            ],
        ),
        builtin(
            INTENT_DETECTION,
            "what_can_i_do",
            "what can i do",
            &[
                "what_can_i_do",
                "what can i do",
                "what can i do?",
                "what can you do",
                "what are my options",
                "list commands",
                "show commands",
                "help",
            ],
        ),
        builtin(
            INTENT_DETECTION,
            "go_up",
            "go up",
            &[
                "go up",
                "up",
                "parent context",
                "go up a level",
                "one level up",
                "move up",
            ],
        ),
        builtin(
            INTENT_DETECTION,
            "reset_context",
            "reset context",
            &["reset context", "go to root", "root context", "reset to global"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_correction_verbs() {
        let names: Vec<String> = builtin_commands()
            .into_iter()
            .map(|c| c.qualified_name)
            .collect();
        assert!(names.contains(&ABORT.to_string()));
        assert!(names.contains(&YOU_MISUNDERSTOOD.to_string()));
        assert!(names.contains(&WHAT_CAN_I_DO.to_string()));
        assert!(names.contains(&GO_UP.to_string()));
        assert!(names.contains(&RESET_CONTEXT.to_string()));
    }

    #[test]
    fn builtins_have_no_parameters() {
        for cmd in builtin_commands() {
            assert!(cmd.is_builtin);
            assert!(cmd.parameters.is_empty());
            assert!(!cmd.plain_utterances.is_empty());
        }
    }
}
