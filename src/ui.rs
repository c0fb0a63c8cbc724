//! Blocking "ask the UI and wait" requests.
//!
//! The strategy builder needs answers from an operator before it can
//! continue. A [`ParametersRequest`] carrying the field list and a
//! one-shot reply channel is broadcast to whoever registered a
//! subscriber; the builder then blocks on the reply. If nobody is
//! listening the request fails immediately instead of hanging.

use flume::{Receiver, Sender};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error, Diagnostic)]
pub enum UiError {
    #[error("no subscriber for parameter requests")]
    #[diagnostic(
        code(gphl_workflow::ui::no_listener),
        help("Register a ParametersRequest subscriber before executing a workflow.")
    )]
    NoListener,

    #[error("parameter request dropped without an answer")]
    #[diagnostic(code(gphl_workflow::ui::cancelled))]
    Cancelled,
}

/// Kind of an input field presented to the operator.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Text,
    TextArea,
    Boolean,
    Combo { choices: Vec<String> },
    /// Row-selection table with a fixed header and optional per-row
    /// highlighting.
    SelectionTable {
        header: String,
        rows: Vec<String>,
        highlighted: Vec<bool>,
    },
}

/// One input field of a parameter request.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub default_value: String,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub read_only: bool,
    /// Start a new layout column with this field.
    pub new_column: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            default_value: String::new(),
            lower_bound: None,
            upper_bound: None,
            read_only: false,
            new_column: false,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Values returned by the operator, keyed by field name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterValues(pub FxHashMap<String, Value>);

impl ParameterValues {
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Defaults to false when the field was never queried.
    pub fn boolean(&self, name: &str) -> bool {
        matches!(self.0.get(name), Some(Value::Bool(true)))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// First element of an array-valued field (table selections).
    pub fn first_of(&self, name: &str) -> Option<&Value> {
        match self.0.get(name)? {
            Value::Array(items) => items.first(),
            other => Some(other),
        }
    }
}

/// An outstanding request for operator input.
#[derive(Debug)]
pub struct ParametersRequest {
    pub fields: Vec<Field>,
    reply: oneshot::Sender<ParameterValues>,
}

impl ParametersRequest {
    /// Answer the request. Consumes it; a second answer is impossible.
    pub fn respond(self, values: ParameterValues) {
        // The requester may have given up; nothing to do then.
        let _ = self.reply.send(values);
    }
}

/// Requester half held by the orchestrator.
#[derive(Clone, Debug)]
pub struct ParameterGateway {
    tx: Sender<ParametersRequest>,
}

impl ParameterGateway {
    /// Create a gateway and the subscriber receiver that the UI layer
    /// must service.
    pub fn channel() -> (Self, Receiver<ParametersRequest>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    /// Broadcast a request and block until the answer arrives.
    ///
    /// Fails fast with [`UiError::NoListener`] when no subscriber is
    /// registered, rather than waiting forever.
    pub async fn request(&self, fields: Vec<Field>) -> Result<ParameterValues, UiError> {
        if self.tx.receiver_count() == 0 {
            return Err(UiError::NoListener);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ParametersRequest {
            fields,
            reply: reply_tx,
        };
        self.tx.send(request).map_err(|_| UiError::NoListener)?;
        reply_rx.await.map_err(|_| UiError::Cancelled)
    }
}
