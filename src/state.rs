//! Workflow session state machine.
//!
//! One [`WorkflowState`] instance exists per workflow session, owned by
//! the orchestrator and mutated only through [`StateTracker::set_state`].
//! Transitions outside the table fail with [`StateError`] and leave the
//! current state untouched.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of the workflow session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Not active. Initial state only; unreachable once left.
    Off,
    /// Active, awaiting an execution order.
    On,
    /// Active, awaiting user input.
    Open,
    /// Executing a workflow.
    Running,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Off => "OFF",
            WorkflowState::On => "ON",
            WorkflowState::Open => "OPEN",
            WorkflowState::Running => "RUNNING",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    /// The requested transition is not in the table. Fatal to the caller;
    /// the tracked state is left unchanged.
    #[error("invalid workflow state transition: {from} -> {to}")]
    #[diagnostic(
        code(gphl_workflow::state::invalid_transition),
        help("OFF is initial-only; active states move between ON, OPEN and RUNNING.")
    )]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },
}

/// Owner of the session state, enforcing the transition table.
#[derive(Debug)]
pub struct StateTracker {
    state: WorkflowState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Off,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Request a transition. Out-of-table requests fail without mutating
    /// the current state.
    pub fn set_state(&mut self, to: WorkflowState) -> Result<WorkflowState, StateError> {
        if Self::permitted(self.state, to) {
            self.state = to;
            Ok(to)
        } else {
            Err(StateError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }

    fn permitted(from: WorkflowState, to: WorkflowState) -> bool {
        use WorkflowState::*;
        match (from, to) {
            // Session start.
            (Off, On) => true,
            // Execution order, and return on completion or workflow end.
            // ON -> ON keeps workflow_end idempotent.
            (On, Running) | (Running, On) | (On, On) => true,
            // Awaiting-input excursions from either active state.
            (On, Open) | (Open, On) | (Running, Open) | (Open, Running) => true,
            // OFF is unreachable once the session is active.
            _ => false,
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
