//! Assembly of a `RequestOrchestrator`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use error_recovery_rs::ErrorRecoveryManager;
use message_queue_rs::MessageQueue;
use tracing::debug;

use super::{FnListener, RequestOrchestrator, ResponseListener, StatsCounters};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::executor::{DocumentCollaborator, OperationExecutor};
use crate::transport::{HttpTransport, Transport};
use crate::translator::OperationTranslator;

/// Builder for `RequestOrchestrator`.
///
/// Only the document is required. The transport defaults to `HttpTransport`,
/// the recovery manager to one built from the configured retry policy and
/// the queue to an empty one sized by `max_queue_size`.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<OrchestratorConfig>,
    transport: Option<Arc<dyn Transport>>,
    recovery: Option<Arc<ErrorRecoveryManager>>,
    document: Option<Arc<dyn DocumentCollaborator>>,
    listeners: Vec<Arc<dyn ResponseListener>>,
    queue: Option<Arc<MessageQueue>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares an existing recovery manager, e.g. with other components
    pub fn recovery(mut self, recovery: Arc<ErrorRecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn document(mut self, document: Arc<dyn DocumentCollaborator>) -> Self {
        self.document = Some(document);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ResponseListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn fn_listener<F>(self, listener: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listener(Arc::new(FnListener(listener)))
    }

    pub fn queue(mut self, queue: Arc<MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> Result<RequestOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let document = self
            .document
            .ok_or_else(|| OrchestratorError::configuration("a document collaborator is required"))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let policy = config.retry_policy();
        let recovery = match self.recovery {
            Some(recovery) => recovery,
            None => Arc::new(ErrorRecoveryManager::new(policy.clone())),
        };
        recovery
            .register_policy(&config.service_name, policy)
            .map_err(|e| OrchestratorError::configuration(e.to_string()))?;

        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(MessageQueue::new(config.queue_config())));

        debug!(
            backend_url = %config.backend_url,
            service = %config.service_name,
            offline_mode = config.enable_offline_mode,
            listeners = self.listeners.len(),
            "Request orchestrator built"
        );

        Ok(RequestOrchestrator {
            config,
            transport,
            recovery,
            translator: OperationTranslator::new(),
            executor: OperationExecutor::new(document),
            listeners: self.listeners,
            queue,
            active: Mutex::new(HashMap::new()),
            stats: StatsCounters::default(),
        })
    }
}
