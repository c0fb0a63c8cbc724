use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::WorkflowState;

/// A structured event published by the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// The workflow session changed state.
    State {
        when: DateTime<Utc>,
        state: WorkflowState,
    },
    /// Operator-facing log line (user-level log in beamline terms).
    Operator {
        when: DateTime<Utc>,
        message: String,
    },
    /// Dispatch-loop diagnostic, scoped to a message type.
    Protocol {
        when: DateTime<Utc>,
        message_type: String,
        detail: String,
    },
}

impl Event {
    pub fn state(state: WorkflowState) -> Self {
        Event::State {
            when: Utc::now(),
            state,
        }
    }

    pub fn operator(message: impl Into<String>) -> Self {
        Event::Operator {
            when: Utc::now(),
            message: message.into(),
        }
    }

    pub fn protocol(message_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Event::Protocol {
            when: Utc::now(),
            message_type: message_type.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::State { state, .. } => write!(f, "[state] {state}"),
            Event::Operator { message, .. } => write!(f, "[operator] {message}"),
            Event::Protocol {
                message_type,
                detail,
                ..
            } => write!(f, "[protocol:{message_type}] {detail}"),
        }
    }
}
