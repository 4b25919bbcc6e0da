//! Request model and per-request outcome

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::{json, Value};

use crate::executor::ExecutionReport;
use crate::interpreter::ParsedResponse;
use crate::util::generate_request_id;

/// A natural-language request plus the document context it refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique within the process
    pub id: String,
    pub text: String,
    /// Document state sent along with the request
    pub context: Option<Value>,
    pub timestamp: DateTime<Utc>,
    /// Retries so far; maintained by the orchestrator
    pub retry_count: u32,
    /// Queued ahead of normal requests in offline mode
    pub priority: bool,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: generate_request_id(),
            text: text.into(),
            context: None,
            timestamp: Utc::now(),
            retry_count: 0,
            priority: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Outbound JSON body: `{request, request_id, context?}`
    pub fn body(&self) -> Value {
        let mut body = json!({
            "request": self.text,
            "request_id": self.id,
        });
        if let (Some(context), Some(fields)) = (&self.context, body.as_object_mut()) {
            fields.insert("context".to_string(), context.clone());
        }
        body
    }
}

/// `Created → Sent → (Success | Retrying → Sent | Failed)`, plus the
/// terminal `Cancelled` and `Queued` (handed to the offline queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    Sent,
    Retrying,
    Success,
    Failed,
    Cancelled,
    Queued,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Success | RequestState::Failed | RequestState::Cancelled | RequestState::Queued
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Created => "created",
            RequestState::Sent => "sent",
            RequestState::Retrying => "retrying",
            RequestState::Success => "success",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
            RequestState::Queued => "queued",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a request once it reached a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    pub request_id: String,
    pub state: RequestState,
    /// Human-readable result; failures start with `Error: `
    pub display_text: String,
    /// Transport attempts made
    pub attempts: u32,
    pub parsed: Option<ParsedResponse>,
    pub execution: Option<ExecutionReport>,
    pub error: Option<String>,
    /// Offline queue message carrying the request, when queued
    pub queued_message_id: Option<String>,
}

impl OrchestrationOutcome {
    pub(crate) fn new(request_id: &str, state: RequestState, display_text: impl Into<String>, attempts: u32) -> Self {
        Self {
            request_id: request_id.to_string(),
            state,
            display_text: display_text.into(),
            attempts,
            parsed: None,
            execution: None,
            error: None,
            queued_message_id: None,
        }
    }

    /// A terminal failure; the display text is `Error: <cause>`
    pub(crate) fn failed(request_id: &str, error: impl fmt::Display, attempts: u32) -> Self {
        let error = error.to_string();
        let mut outcome = Self::new(request_id, RequestState::Failed, format!("Error: {}", error), attempts);
        outcome.error = Some(error);
        outcome
    }

    pub(crate) fn cancelled(request_id: &str, attempts: u32) -> Self {
        let mut outcome = Self::new(request_id, RequestState::Cancelled, "Request cancelled", attempts);
        outcome.error = Some(format!("Request {} was cancelled", request_id));
        outcome
    }

    pub fn is_success(&self) -> bool {
        self.state == RequestState::Success
    }
}
