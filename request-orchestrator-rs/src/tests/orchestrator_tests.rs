//! End-to-end tests for the request orchestrator
//!
//! These tests drive full requests against a WireMock backend and a
//! recording document: success, retries, non-retryable failures, bad
//! responses, cancellation and offline queueing.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::OrchestratorConfig;
    use crate::orchestrator::{Request, RequestOrchestrator, RequestState};
    use crate::tests::support::{fast_config, RecordingDocument};
    use error_recovery_rs::CircuitState;

    struct Harness {
        orchestrator: Arc<RequestOrchestrator>,
        document: Arc<RecordingDocument>,
        notifications: Arc<Mutex<Vec<String>>>,
    }

    fn harness(config: OrchestratorConfig) -> Harness {
        let document = Arc::new(RecordingDocument::new());
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = notifications.clone();
        let orchestrator = RequestOrchestrator::builder()
            .config(config)
            .document(document.clone())
            .fn_listener(move |text| sink.lock().unwrap().push(text.to_string()))
            .build()
            .expect("Failed to build orchestrator");

        Harness {
            orchestrator: Arc::new(orchestrator),
            document,
            notifications,
        }
    }

    fn agent_url(server: &MockServer) -> String {
        format!("{}/api/agent", server.uri())
    }

    #[tokio::test]
    async fn test_table_request_end_to_end() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent"))
            .and(header_exists("x-request-id"))
            .and(body_partial_json(json!({"request": "insert a 3x4 table"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "response": "Here is your table.",
                "operations": [{"type": "create_table", "rows": 3, "columns": 4}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process_text("insert a 3x4 table", None).await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(h.document.calls(), vec!["create_table:3x4"]);

        let report = outcome.execution.as_ref().unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].priority, 1);
        assert!(outcome.display_text.starts_with("Here is your table."));
        assert!(outcome.display_text.contains("1 operation(s): 1 successful"));

        let parsed = outcome.parsed.as_ref().unwrap();
        assert_eq!(parsed.operations[0].op_type, "create_table");

        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0], outcome.display_text);
        assert_eq!(h.orchestrator.stats().succeeded, 1);
        assert!(h.orchestrator.active_requests().is_empty());
    }

    #[tokio::test]
    async fn test_translated_parameters_reach_document() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "insert",
                "content": "hello",
                "position": "start"
            })))
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process(Request::new("say hello")).await;

        assert!(outcome.is_success());
        assert_eq!(h.document.calls(), vec!["insert_text:hello"]);
        assert_eq!(outcome.display_text, "Executed 1 operation(s): 1 successful, 0 failed");
        assert_eq!(outcome.parsed.as_ref().map(|p| p.operations.len()), Some(1));
    }

    #[tokio::test]
    async fn test_retries_transient_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "warming up"})))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "response",
                "response": "All good"
            })))
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process_text("hello", None).await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.display_text, "All good");
        assert_eq!(h.orchestrator.stats().retries, 1);
        assert_eq!(h.notifications.lock().unwrap().len(), 1);
        assert_eq!(h.orchestrator.recovery().active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal failure"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process_text("hello", None).await;

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.display_text, "Error: Backend returned HTTP 500: internal failure");
        assert_eq!(h.orchestrator.recovery().active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "request too long"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process_text("hello", None).await;

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.display_text, "Error: Backend returned HTTP 400: request too long");
        assert!(h.document.calls().is_empty());
        let notifications = h.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0], outcome.display_text);
    }

    #[tokio::test]
    async fn test_unparsable_response_fails_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process_text("hello", None).await;

        assert_eq!(outcome.state, RequestState::Failed);
        assert!(outcome.display_text.starts_with("Error: Failed to parse backend response:"));
        assert!(h.document.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "I cannot edit protected documents"
            })))
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let outcome = h.orchestrator.process_text("hello", None).await;

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(outcome.display_text, "Error: I cannot edit protected documents");
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let h = harness(fast_config("http://127.0.0.1:1/api/agent"));
        let outcome = h.orchestrator.process_text("   ", None).await;

        assert_eq!(outcome.state, RequestState::Failed);
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.display_text.starts_with("Error: Invalid request"));
        assert_eq!(h.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let config = OrchestratorConfig {
            initial_delay_ms: 5_000,
            max_delay_ms: 10_000,
            ..fast_config(&agent_url(&mock_server))
        };
        let h = harness(config);

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.process(Request::new("hello").with_id("req-cancel")).await });

        let mut waited = Duration::ZERO;
        while h.orchestrator.request_state("req-cancel") != Some(RequestState::Retrying) {
            assert!(waited < Duration::from_secs(5), "request never started retrying");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        assert!(h.orchestrator.cancel("req-cancel"));
        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("cancelled request did not finish")
            .unwrap();

        assert_eq!(outcome.state, RequestState::Cancelled);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.display_text, "Request cancelled");
        assert!(!h.orchestrator.cancel("req-cancel"));
        assert_eq!(h.orchestrator.stats().cancelled, 1);
        assert_eq!(h.orchestrator.recovery().active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_active_id_is_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(300))
                    .set_body_json(json!({"type": "response", "response": "slow"})),
            )
            .mount(&mock_server)
            .await;

        let h = harness(fast_config(&agent_url(&mock_server)));
        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.process(Request::new("one").with_id("dup")).await });

        while h.orchestrator.request_state("dup").is_none() {
            tokio::task::yield_now().await;
        }
        let second = h.orchestrator.process(Request::new("two").with_id("dup")).await;

        assert_eq!(second.state, RequestState::Failed);
        assert!(second.display_text.contains("already in progress"));
        assert!(first.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_circuit_open_without_offline_mode() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let config = OrchestratorConfig {
            failure_threshold: 1,
            ..fast_config(&agent_url(&mock_server))
        };
        let h = harness(config);

        let first = h.orchestrator.process_text("one", None).await;
        assert_eq!(first.state, RequestState::Failed);
        assert_eq!(first.attempts, 1);
        assert_eq!(h.orchestrator.recovery().circuit_state("agent-backend"), CircuitState::Open);

        let second = h.orchestrator.process_text("two", None).await;
        assert_eq!(second.state, RequestState::Failed);
        assert_eq!(second.attempts, 0);
        assert_eq!(second.display_text, "Error: Service agent-backend is unavailable");
    }

    #[tokio::test]
    async fn test_offline_queueing_and_delivery() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "insert",
                "content": "queued text"
            })))
            .mount(&mock_server)
            .await;

        let config = OrchestratorConfig {
            failure_threshold: 1,
            open_state_timeout_ms: 100,
            enable_offline_mode: true,
            ..fast_config(&agent_url(&mock_server))
        };
        let h = harness(config);

        let outcome = h.orchestrator.process(Request::new("write something").with_priority(true)).await;
        assert_eq!(outcome.state, RequestState::Queued);
        assert!(outcome.queued_message_id.is_some());
        assert_eq!(h.orchestrator.queue().len().await, 1);
        assert_eq!(h.orchestrator.stats().queued, 1);

        let processor = h.orchestrator.start_queue_processor();
        let mut waited = Duration::ZERO;
        while h.notifications.lock().unwrap().len() < 2 {
            assert!(waited < Duration::from_secs(5), "queued request was never delivered");
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        processor.shutdown().await;

        assert_eq!(h.document.calls(), vec!["insert_text:queued text"]);
        assert!(h.orchestrator.queue().is_empty().await);
        assert_eq!(
            h.notifications.lock().unwrap()[1],
            "Executed 1 operation(s): 1 successful, 0 failed"
        );

        let stats = h.orchestrator.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
    }
}
