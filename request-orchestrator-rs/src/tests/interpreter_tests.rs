//! Tests for backend response interpretation
//!
//! These tests cover the response shapes the backend sends, the
//! discriminator rules and the split between syntax and schema failures.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::interpreter::{parse, try_parse, ParseError, ResponseErrorKind, ResponseType};

    #[test]
    fn test_insert_response_yields_one_operation() {
        let parsed = parse(r#"{"type":"insert","content":"hello"}"#);

        assert!(parsed.success);
        assert_eq!(parsed.response_type, Some(ResponseType::Insert));
        assert_eq!(parsed.operations.len(), 1);
        assert_eq!(parsed.operations[0].op_type, "insert_text");
        assert_eq!(parsed.operations[0].get_str("content"), Some("hello"));
    }

    #[test]
    fn test_conversational_response() {
        let parsed = parse(r#"{"type":"chat","content":"Sure, here you go"}"#);

        assert!(parsed.success);
        assert_eq!(parsed.response_type, Some(ResponseType::Response));
        assert_eq!(parsed.response_text, "Sure, here you go");
        assert!(!parsed.has_operations());
    }

    #[test]
    fn test_operations_list() {
        let body = json!({
            "success": true,
            "response": "Done",
            "operations": [
                {"type": "insert_text", "content": "a", "priority": 2},
                {"type": "create_table", "rows": 2, "columns": 2}
            ],
            "operation_summaries": ["Inserted text", {"description": "Created table"}],
            "request_id": "req-9"
        });
        let parsed = parse(&body.to_string());

        assert!(parsed.success);
        assert_eq!(parsed.response_type, Some(ResponseType::Operations));
        assert_eq!(parsed.response_text, "Done");
        assert_eq!(parsed.operations.len(), 2);
        assert_eq!(parsed.operations[1].op_type, "create_table");
        assert_eq!(parsed.operation_summaries.len(), 2);
        assert_eq!(parsed.operation_summaries[0], "Inserted text");
        assert_eq!(parsed.metadata.get("request_id"), Some(&json!("req-9")));
    }

    #[test]
    fn test_table_response_merges_content_object() {
        let parsed = parse(r#"{"type":"table","content":{"rows":3,"columns":4},"response":"Table added"}"#);

        assert!(parsed.success);
        assert_eq!(parsed.operations.len(), 1);
        let op = &parsed.operations[0];
        assert_eq!(op.op_type, "create_table");
        assert_eq!(op.get("rows"), Some(&json!(3)));
        assert_eq!(op.get("columns"), Some(&json!(4)));
    }

    #[test]
    fn test_missing_discriminator_is_schema_error() {
        let error = try_parse(r#"{"response":"hi"}"#).unwrap_err();
        assert!(matches!(error, ParseError::Schema { ref path, .. } if path == "$"));

        let parsed = parse(r#"{"response":"hi"}"#);
        assert!(!parsed.success);
        assert_eq!(parsed.error_kind, Some(ResponseErrorKind::Schema));
    }

    #[test]
    fn test_operation_without_type_rejects_whole_response() {
        let body = json!({
            "type": "operations",
            "operations": [
                {"type": "insert_text", "content": "ok"},
                {"content": "no type"}
            ]
        });
        let error = try_parse(&body.to_string()).unwrap_err();

        match error {
            ParseError::Schema { path, .. } => assert_eq!(path, "$.operations[1].type"),
            other => panic!("expected schema error, got {:?}", other),
        }
        assert!(parse(&body.to_string()).operations.is_empty());
    }

    #[test]
    fn test_non_string_operation_type() {
        let error = try_parse(r#"{"type":"operations","operations":[{"type":7}]}"#).unwrap_err();
        assert_eq!(error.kind(), ResponseErrorKind::Schema);
    }

    #[test]
    fn test_syntax_error_reports_location() {
        let error = try_parse("{\n  \"type\": \"insert\",\n  oops\n}").unwrap_err();

        match error {
            ParseError::Syntax { line, column, .. } => {
                assert_eq!(line, 3);
                assert!(column > 0);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
        assert_eq!(parse("not json").error_kind, Some(ResponseErrorKind::Syntax));
    }

    #[test]
    fn test_unknown_top_level_field_is_rejected() {
        let error = try_parse(r#"{"type":"response","response":"hi","surprise":true}"#).unwrap_err();
        assert_eq!(error.kind(), ResponseErrorKind::Schema);
    }

    #[test]
    fn test_unknown_response_type() {
        let error = try_parse(r#"{"type":"hologram"}"#).unwrap_err();
        assert!(matches!(error, ParseError::Schema { ref path, .. } if path == "$.type"));
    }

    #[test]
    fn test_insert_requires_string_content() {
        let error = try_parse(r#"{"type":"insert","content":42}"#).unwrap_err();
        assert!(matches!(error, ParseError::Schema { ref path, .. } if path == "$.content"));
    }

    #[test]
    fn test_backend_error_response() {
        let parsed = parse(r#"{"type":"error","error":{"message":"model overloaded"}}"#);

        assert!(!parsed.success);
        assert_eq!(parsed.response_type, Some(ResponseType::Error));
        assert_eq!(parsed.error.as_deref(), Some("model overloaded"));
        assert_eq!(parsed.error_kind, Some(ResponseErrorKind::Backend));
    }

    #[test]
    fn test_success_false_without_type() {
        let parsed = parse(r#"{"success":false,"message":"could not understand the request"}"#);

        assert!(!parsed.success);
        assert_eq!(parsed.response_type, Some(ResponseType::Error));
        assert_eq!(parsed.error.as_deref(), Some("could not understand the request"));
    }
}
