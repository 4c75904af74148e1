//! Reflection Signals
//!
//! A reflection signal is the one corrective request active in an
//! iteration. Each constructor renders the message the model sees next.

use serde::{Deserialize, Serialize};

use editflow_quality_gates::{GateFailureKind, GateReflection};

use crate::models::edit::{EditFormat, MalformedEdit};
use crate::services::context::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    MalformedEdit,
    LintFailure,
    TestFailure,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::MalformedEdit => "malformed_edit",
            SignalKind::LintFailure => "lint_failure",
            SignalKind::TestFailure => "test_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionSignal {
    pub kind: SignalKind,
    /// Corrective text sent as the next user message
    pub message: String,
}

impl ReflectionSignal {
    /// The reply could not be parsed, or some edits did not apply.
    ///
    /// `applied` lists files that did land, so the model does not resend them.
    pub fn malformed(error: &MalformedEdit, applied: &[String], format: EditFormat) -> Self {
        let failures = error.clone().flatten();
        let mut message = if failures.len() == 1 {
            String::from("One of your edits could not be applied.\n\n")
        } else {
            format!("{} of your edits could not be applied.\n\n", failures.len())
        };
        for failure in &failures {
            message.push_str(&failure.render());
            message.push('\n');
        }
        if !applied.is_empty() {
            message.push_str(&format!(
                "The other edits were applied successfully to: {}\nDon't resend them.\n\n",
                applied.join(", ")
            ));
        }
        message.push_str("Resend only the failed edits, using this format:\n\n");
        message.push_str(prompts::rules(format));
        Self {
            kind: SignalKind::MalformedEdit,
            message,
        }
    }

    /// A lint or test failure the user chose to have fixed
    pub fn from_gate(reflection: &GateReflection) -> Self {
        let kind = match reflection.kind {
            GateFailureKind::Lint => SignalKind::LintFailure,
            GateFailureKind::Test => SignalKind::TestFailure,
        };
        Self {
            kind,
            message: reflection.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_quotes_each_failure() {
        let error = MalformedEdit::combine(vec![
            MalformedEdit::new("SEARCH block not found")
                .with_path("a.py")
                .with_fragment("def foo():")
                .with_hint("Did you mean:\ndef foo(x):"),
            MalformedEdit::new("file does not exist").with_path("b.py"),
        ])
        .unwrap();
        let signal =
            ReflectionSignal::malformed(&error, &["c.py".to_string()], EditFormat::SearchReplace);
        assert_eq!(signal.kind, SignalKind::MalformedEdit);
        assert!(signal.message.starts_with("2 of your edits"));
        assert!(signal.message.contains("## Edit to a.py failed"));
        assert!(signal.message.contains("def foo(x):"));
        assert!(signal.message.contains("## Edit to b.py failed"));
        assert!(signal.message.contains("applied successfully to: c.py"));
        assert!(signal.message.contains("<<<<<<< SEARCH"));
    }

    #[test]
    fn test_gate_kind_mapping() {
        let signal = ReflectionSignal::from_gate(&GateReflection {
            kind: GateFailureKind::Test,
            message: "1 test failed".into(),
        });
        assert_eq!(signal.kind, SignalKind::TestFailure);
        assert_eq!(signal.message, "1 test failed");
    }
}
