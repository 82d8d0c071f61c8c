//! Operator prompt after a failed stripe.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use sara_client::session::ZoneOutcome;
use sara_client::{Recovery, RecoveryAction};

const CHOICES: &str = "  1: Retry\n  2: Continue\n  3: Abort right now";

/// Asks on the terminal what to do with a failed stripe.
///
/// Blocks the calling thread while waiting for input; the collection only
/// asks between calls.
pub struct PromptRecovery {
    editor: DefaultEditor,
}

impl PromptRecovery {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Recovery for PromptRecovery {
    fn decide(&mut self, outcome: &ZoneOutcome) -> RecoveryAction {
        println!("{}: {}", "Stripe failed".red(), outcome);
        println!("Please select one of the following options:\n{}", CHOICES);

        loop {
            match self.editor.readline(&format!("{} ", "choice>".cyan())) {
                Ok(line) => match parse_choice(&line) {
                    Some(action) => return action,
                    None => println!("{}: enter 1, 2 or 3", "Input not valid".yellow()),
                },
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    println!("^C");
                    return RecoveryAction::Abort;
                }
                Err(err) => {
                    tracing::error!("Prompt failed: {:?}", err);
                    return RecoveryAction::Abort;
                }
            }
        }
    }
}

fn parse_choice(line: &str) -> Option<RecoveryAction> {
    match line.trim().to_lowercase().as_str() {
        "1" | "r" | "retry" => Some(RecoveryAction::Retry),
        "2" | "c" | "continue" => Some(RecoveryAction::Continue),
        "3" | "a" | "abort" => Some(RecoveryAction::Abort),
        _ => None,
    }
}
