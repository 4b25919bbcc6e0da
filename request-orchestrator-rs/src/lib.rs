//! # Request Orchestrator
//!
//! Turns natural-language editing requests into document changes. A request
//! is sent to the agent backend, the backend's JSON answer is interpreted
//! into operation descriptors, the descriptors are translated into validated
//! operations and the operations are executed against the host document.
//!
//! ## Architecture
//!
//! - `transport`: one HTTP exchange per attempt, with a per-attempt timeout
//! - `interpreter`: backend JSON into `ParsedResponse` and operation descriptors
//! - `translator`: descriptors into typed `TranslatedOperation`s
//! - `executor`: priority-ordered execution through a `DocumentCollaborator`
//! - `orchestrator`: the request lifecycle, retries, cancellation and offline queueing
//!
//! Failure classification, retry policies and circuit breakers live in
//! `error_recovery_rs`; the offline queue is `message_queue_rs`.

pub mod error;
pub use error::{OrchestratorError, Result, TransportError};

pub mod config;
pub use config::{load_config, OrchestratorConfig};

pub mod transport;
pub use transport::{HttpMethod, HttpTransport, Transport, TransportRequest, TransportResponse};

pub mod interpreter;
pub use interpreter::{OperationDescriptor, ParseError, ParsedResponse, ResponseType};

pub mod translator;
pub use translator::{OperationParameters, OperationTranslator, OperationType, TranslatedOperation};

pub mod executor;
pub use executor::{
    DocumentCollaborator, DocumentError, DryRunDocument, ExecutionReport, ExecutionResult, ExecutionSummary,
    OperationExecutor,
};

pub mod orchestrator;
pub use orchestrator::{
    FnListener, OrchestrationOutcome, OrchestratorBuilder, OrchestratorStats, Request, RequestOrchestrator,
    RequestState, ResponseListener,
};

// Utility module for common functionality
mod util;

#[cfg(test)]
mod tests;
