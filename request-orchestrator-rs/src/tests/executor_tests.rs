//! Tests for operation execution
//!
//! These tests verify priority ordering, per-operation failure isolation and
//! the summary shown to the user.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::executor::{DryRunDocument, ExecutionSummary, OperationExecutor};
    use crate::interpreter::OperationDescriptor;
    use crate::tests::support::RecordingDocument;
    use crate::translator::{OperationTranslator, TranslatedOperation};

    fn translate(values: Vec<serde_json::Value>) -> Vec<TranslatedOperation> {
        let descriptors: Vec<OperationDescriptor> = values
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect();
        OperationTranslator::new().translate_all(&descriptors)
    }

    #[tokio::test]
    async fn test_priority_order_and_failure_isolation() {
        let document = Arc::new(RecordingDocument::failing_on("create_table"));
        let executor = OperationExecutor::new(document.clone());
        let operations = translate(vec![
            json!({"type": "insert_text", "content": "A", "priority": 5}),
            json!({"type": "create_table", "rows": 2, "columns": 2, "priority": 1}),
        ]);

        let report = executor.execute(&operations).await;

        assert_eq!(document.calls(), vec!["create_table:2x2", "insert_text:A"]);
        assert_eq!(report.results[0].operation_type, "create_table");
        assert!(!report.results[0].success);
        assert!(report.results[1].success);
        assert_eq!(report.results[1].operation_id.as_deref(), Some("insert_text-2"));
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.successful, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.describe(), "Executed 2 operation(s): 1 successful, 1 failed");
        assert_eq!(report.failures(), vec!["create_table: Document operation failed: create_table rejected"]);
    }

    #[tokio::test]
    async fn test_equal_priorities_keep_descriptor_order() {
        let document = Arc::new(RecordingDocument::new());
        let executor = OperationExecutor::new(document.clone());
        let operations = translate(vec![
            json!({"type": "insert_text", "content": "first", "priority": 2}),
            json!({"type": "insert_text", "content": "second", "priority": 2}),
            json!({"type": "insert_text", "content": "zeroth"}),
        ]);

        executor.execute(&operations).await;

        assert_eq!(
            document.calls(),
            vec!["insert_text:zeroth", "insert_text:first", "insert_text:second"]
        );
    }

    #[tokio::test]
    async fn test_untranslated_operation_never_reaches_document() {
        let document = Arc::new(RecordingDocument::new());
        let executor = OperationExecutor::new(document.clone());
        let operations = translate(vec![json!({"type": "teleport"}), json!({"type": "insert_text", "content": "ok"})]);

        let report = executor.execute(&operations).await;

        assert_eq!(document.calls(), vec!["insert_text:ok"]);
        assert!(!report.results[0].success);
        assert_eq!(report.results[0].error.as_deref(), Some("Unsupported operation type 'teleport'"));
        assert!(!report.summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_unsupported_by_document() {
        let executor = OperationExecutor::new(Arc::new(RecordingDocument::new()));
        let operations = translate(vec![json!({"type": "insert_image", "source": "https://example.com/cat.png"})]);

        let report = executor.execute(&operations).await;

        assert!(!report.results[0].success);
        assert_eq!(
            report.results[0].error.as_deref(),
            Some("Operation insert_image is not supported by this document")
        );
    }

    #[tokio::test]
    async fn test_dry_run_document() {
        let executor = OperationExecutor::new(Arc::new(DryRunDocument::new()));
        let operations = translate(vec![
            json!({"type": "create_table", "rows": 3, "columns": 4}),
            json!({"type": "insert_text", "content": "caption"}),
        ]);

        let report = executor.execute(&operations).await;

        assert!(report.summary.all_succeeded());
        assert_eq!(report.results[0].operation_id.as_deref(), Some("table-1"));
        assert_eq!(report.results[1].operation_id.as_deref(), Some("text-2"));
    }

    #[test]
    fn test_empty_summary() {
        let summary = ExecutionSummary::from_results(&[]);
        assert_eq!(summary.describe(), "Executed 0 operation(s): 0 successful, 0 failed");
        assert!(summary.all_succeeded());
    }
}
