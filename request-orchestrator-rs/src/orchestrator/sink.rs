//! Delivery of queued requests back through the orchestrator

use std::sync::Arc;
use async_trait::async_trait;
use error_recovery_rs::Error;
use message_queue_rs::{MessageSink, QueuedMessage};
use tracing::{debug, info};

use super::{RequestOrchestrator, RequestState};
use crate::error::mapping::{extract_error_message, retry_after_ms, to_recovery_error};
use crate::error::OrchestratorError;
use crate::transport::{HttpMethod, TransportRequest};

/// Sends queued request bodies to the backend and completes them like a
/// live request once delivered
pub(crate) struct QueuedRequestSink {
    orchestrator: Arc<RequestOrchestrator>,
}

impl QueuedRequestSink {
    pub(crate) fn new(orchestrator: Arc<RequestOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MessageSink for QueuedRequestSink {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), Error> {
        let config = self.orchestrator.config();
        let mut request = TransportRequest::new(HttpMethod::Post, config.backend_url.clone())
            .with_body(message.content.clone())
            .with_header("Content-Type", message.content_type.clone())
            .with_header("Accept", "application/json")
            .with_timeout(config.timeout());
        for (name, value) in &message.headers {
            request = request.with_header(name.clone(), value.clone());
        }

        let response = match self.orchestrator.transport().execute(request).await {
            Ok(response) => response,
            Err(e) => {
                let error = OrchestratorError::from(e);
                return Err(to_recovery_error(&error, &message.request_id, &message.service));
            }
        };

        if !response.is_success() {
            let error = OrchestratorError::http(response.status, extract_error_message(&response.body));
            let mut record = to_recovery_error(&error, &message.request_id, &message.service);
            if let Some(ms) = retry_after_ms(&response.headers) {
                record = record.with_context("retry_after_ms", ms);
            }
            debug!(message_id = %message.id, status = response.status, "Queued request rejected by backend");
            return Err(record);
        }

        let attempts = message.attempt_count.max(1);
        let outcome = self
            .orchestrator
            .complete(&message.request_id, &response.body, attempts)
            .await;
        info!(
            request_id = %message.request_id,
            message_id = %message.id,
            delivered = outcome.state == RequestState::Success,
            "Queued request delivered"
        );
        self.orchestrator.finish(&outcome);
        Ok(())
    }
}
