//! Operator confirmation for security-sensitive changes.
//!
//! Workflows never prompt directly. Any step that mutates an existing object
//! in a way the operator should approve asks a [`ConfirmationProvider`]
//! instead, so the same logic runs unattended in tests and interactively from
//! the CLI.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Mutex;

/// Decides whether a proposed change may proceed.
pub trait ConfirmationProvider: Send + Sync {
    /// Ask about `action`; `true` means go ahead.
    fn confirm(&self, action: &str) -> bool;
}

impl<T: ConfirmationProvider + ?Sized> ConfirmationProvider for Box<T> {
    fn confirm(&self, action: &str) -> bool {
        (**self).confirm(action)
    }
}

/// Approves everything. Used for `--yes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ConfirmationProvider for AutoApprove {
    fn confirm(&self, action: &str) -> bool {
        log::info!("Auto-approved: {}", action);
        true
    }
}

/// Declines everything. Findings are reported but nothing is changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecline;

impl ConfirmationProvider for AutoDecline {
    fn confirm(&self, action: &str) -> bool {
        log::info!("Declined (non-interactive): {}", action);
        false
    }
}

/// Asks on the terminal with a `[y/N]` prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirmation;

impl ConfirmationProvider for TerminalConfirmation {
    fn confirm(&self, action: &str) -> bool {
        let stdin = std::io::stdin();
        let mut stderr = std::io::stderr();
        if write!(stderr, "{} [y/N] ", action).and_then(|_| stderr.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        parse_answer(&answer)
    }
}

/// `y`/`yes` in any case is consent; everything else is not.
pub fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Replays canned answers and remembers what was asked.
#[derive(Debug, Default)]
pub struct ScriptedConfirmation {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedConfirmation {
    /// Answers are used in order; once exhausted every answer is `false`.
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

impl ConfirmationProvider for ScriptedConfirmation {
    fn confirm(&self, action: &str) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(action.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert!(parse_answer("y\n"));
        assert!(parse_answer(" YES "));
        assert!(!parse_answer("n"));
        assert!(!parse_answer(""));
        assert!(!parse_answer("yep"));
    }

    #[test]
    fn test_scripted_answers_in_order() {
        let confirm = ScriptedConfirmation::new([true, false]);
        assert!(confirm.confirm("first"));
        assert!(!confirm.confirm("second"));
        assert!(!confirm.confirm("third"));
        assert_eq!(confirm.asked(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_auto_providers() {
        assert!(AutoApprove.confirm("x"));
        assert!(!AutoDecline.confirm("x"));
    }
}
