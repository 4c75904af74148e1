//! Turn State Machine
//!
//! `next(state, event)` is the whole transition table. The coordinator
//! performs the work of each state and reports what happened as an event.

use thiserror::Error;

use crate::models::turn::TurnOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Formatting,
    Requesting,
    Extracting,
    Applying,
    Gating,
    Reflecting,
    Done(TurnOutcome),
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Formatting => "formatting",
            TurnState::Requesting => "requesting",
            TurnState::Extracting => "extracting",
            TurnState::Applying => "applying",
            TurnState::Gating => "gating",
            TurnState::Reflecting => "reflecting",
            TurnState::Done(_) => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Start,
    /// The bundle fits the input budget
    Formatted,
    /// Formatting or the backend reported an overflow
    ContextExceeded {
        message: String,
        already_summarized: bool,
    },
    /// The backend returned a full reply
    Completed,
    /// Fatal error or exhausted retries
    RequestFailed { message: String },
    /// The reply parsed into at least one edit
    EditsFound,
    /// The reply had no edits; `tool_round` when tool results await the model
    NoEdits { tool_round: bool },
    Malformed,
    Applied { any_failed: bool },
    Gated { reflect: bool },
    /// Checked before the counter is incremented
    Reflect { count: u32, ceiling: u32 },
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no transition from {state} on {event}")]
pub struct InvalidTransition {
    pub state: &'static str,
    pub event: String,
}

pub fn next(state: &TurnState, event: &TurnEvent) -> Result<TurnState, InvalidTransition> {
    use TurnEvent as E;
    use TurnState as S;

    let to = match (state, event) {
        (S::Done(_), _) => None,
        (_, E::Interrupted) => Some(S::Done(TurnOutcome::Interrupted)),

        (S::Idle, E::Start) => Some(S::Formatting),

        (S::Formatting, E::Formatted) => Some(S::Requesting),
        (
            S::Formatting | S::Requesting,
            E::ContextExceeded {
                message,
                already_summarized,
            },
        ) => Some(if *already_summarized {
            S::Done(TurnOutcome::ContextExceeded {
                message: message.clone(),
            })
        } else {
            S::Formatting
        }),

        (S::Requesting, E::Completed) => Some(S::Extracting),
        (S::Requesting, E::RequestFailed { message }) => Some(S::Done(TurnOutcome::Fatal {
            message: message.clone(),
        })),

        (S::Extracting, E::EditsFound) => Some(S::Applying),
        (S::Extracting, E::NoEdits { tool_round: true }) => Some(S::Formatting),
        (S::Extracting, E::NoEdits { tool_round: false }) => Some(S::Done(TurnOutcome::Success)),
        (S::Extracting, E::Malformed) => Some(S::Reflecting),

        (S::Applying, E::Applied { any_failed: true }) => Some(S::Reflecting),
        (S::Applying, E::Applied { any_failed: false }) => Some(S::Gating),

        (S::Gating, E::Gated { reflect: true }) => Some(S::Reflecting),
        (S::Gating, E::Gated { reflect: false }) => Some(S::Done(TurnOutcome::Success)),

        (S::Reflecting, E::Reflect { count, ceiling }) => Some(if count >= ceiling {
            S::Done(TurnOutcome::MaxReflections)
        } else {
            S::Formatting
        }),

        _ => None,
    };

    to.ok_or_else(|| InvalidTransition {
        state: state.as_str(),
        event: format!("{:?}", event),
    })
}
