//! Tests for operation translation
//!
//! These tests verify tag aliases, priority normalization, table sizing
//! rules and that a bad descriptor never affects its siblings.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::interpreter::OperationDescriptor;
    use crate::translator::{
        ChartType, OperationParameters, OperationTranslator, OperationType, Position, Range, DEFAULT_PRIORITY,
        MAX_PRIORITY,
    };

    fn descriptor(value: serde_json::Value) -> OperationDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_tag_aliases() {
        assert_eq!(OperationType::from_tag("insertText"), Some(OperationType::InsertText));
        assert_eq!(OperationType::from_tag("format-text"), Some(OperationType::ApplyFormatting));
        assert_eq!(OperationType::from_tag("insert_table"), Some(OperationType::CreateTable));
        assert_eq!(OperationType::from_tag("CHART"), Some(OperationType::CreateChart));
        assert_eq!(OperationType::from_tag("teleport"), None);
    }

    #[test]
    fn test_insert_text() {
        let op = OperationTranslator::new().translate(&descriptor(json!({
            "type": "insert_text",
            "content": "Hello",
            "position": "end",
            "formatting": {"bold": true, "size": 14},
            "description": "greeting"
        })));

        assert!(op.success, "{:?}", op.error);
        assert_eq!(op.priority, DEFAULT_PRIORITY);
        assert_eq!(op.description.as_deref(), Some("greeting"));
        match op.parameters {
            Some(OperationParameters::InsertText { content, position, formatting }) => {
                assert_eq!(content, "Hello");
                assert_eq!(position, Position::DocumentEnd);
                let formatting = formatting.unwrap();
                assert_eq!(formatting.bold, Some(true));
                assert_eq!(formatting.font_size, Some(14.0));
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_priority_is_clamped() {
        let translator = OperationTranslator::new();
        let priority = |p: serde_json::Value| {
            translator
                .translate(&descriptor(json!({"type": "insert_text", "content": "x", "priority": p})))
                .priority
        };

        assert_eq!(priority(json!(0)), 1);
        assert_eq!(priority(json!(-5)), 1);
        assert_eq!(priority(json!(7)), 7);
        assert_eq!(priority(json!("12")), 12);
        assert_eq!(priority(json!(500)), MAX_PRIORITY);
        assert_eq!(priority(json!("soon")), DEFAULT_PRIORITY);
    }

    #[test]
    fn test_table_dimensions() {
        let translator = OperationTranslator::new();
        let dims = |value: serde_json::Value| match translator.translate(&descriptor(value)).parameters {
            Some(OperationParameters::CreateTable { rows, columns, .. }) => (rows, columns),
            other => panic!("unexpected parameters {:?}", other),
        };

        assert_eq!(dims(json!({"type": "create_table", "rows": 3, "columns": 4})), (3, 4));
        assert_eq!(dims(json!({"type": "create_table"})), (1, 1));
        assert_eq!(dims(json!({"type": "create_table", "rows": 0, "cols": 1000})), (1, 100));
        assert_eq!(
            dims(json!({"type": "table", "data": [["a", "b", "c"], ["d", "e", "f"]]})),
            (2, 3)
        );
    }

    #[test]
    fn test_table_data_larger_than_table_fails() {
        let op = OperationTranslator::new().translate(&descriptor(json!({
            "type": "create_table",
            "rows": 1,
            "columns": 1,
            "data": [["a", "b"]]
        })));

        assert!(!op.success);
        assert!(op.parameters.is_none());
        assert!(op.error.unwrap().starts_with("Invalid create_table operation:"));
    }

    #[test]
    fn test_apply_formatting_requires_attributes() {
        let translator = OperationTranslator::new();

        let empty = translator.translate(&descriptor(json!({"type": "format", "formatting": {}})));
        assert!(!empty.success);

        let ok = translator.translate(&descriptor(json!({
            "type": "apply_formatting",
            "range": "entire-document",
            "formatting": {"italic": true}
        })));
        match ok.parameters {
            Some(OperationParameters::ApplyFormatting { range, .. }) => assert_eq!(range, Range::EntireDocument),
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_chart() {
        let op = OperationTranslator::new().translate(&descriptor(json!({
            "type": "create_chart",
            "chart_type": "line",
            "title": "Sales",
            "data": {"labels": ["Q1", "Q2"], "series": [{"name": "2024", "values": [1, 2]}]}
        })));

        match op.parameters {
            Some(OperationParameters::CreateChart { chart_type, data, title, .. }) => {
                assert_eq!(chart_type, ChartType::Line);
                assert_eq!(data.labels, vec!["Q1", "Q2"]);
                assert_eq!(data.series[0].values, vec![1.0, 2.0]);
                assert_eq!(title.as_deref(), Some("Sales"));
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_chart_label_mismatch_fails() {
        let op = OperationTranslator::new().translate(&descriptor(json!({
            "type": "chart",
            "data": {"labels": ["a"], "values": [1, 2, 3]}
        })));
        assert!(!op.success);
    }

    #[test]
    fn test_unsupported_type() {
        let op = OperationTranslator::new().translate(&descriptor(json!({"type": "teleport", "priority": 3})));

        assert!(!op.success);
        assert_eq!(op.operation_type, None);
        assert_eq!(op.priority, 3);
        assert_eq!(op.type_name(), "teleport");
        assert_eq!(op.error.as_deref(), Some("Unsupported operation type 'teleport'"));
    }

    #[test]
    fn test_failures_are_isolated() {
        let descriptors = vec![
            descriptor(json!({"type": "insert_text", "content": "one"})),
            descriptor(json!({"type": "insert_text"})),
            descriptor(json!({"type": "insert_text", "content": "three", "position": {"line": 2}})),
        ];
        let ops = OperationTranslator::new().translate_all(&descriptors);

        assert_eq!(ops.len(), 3);
        assert!(ops[0].success);
        assert!(!ops[1].success);
        assert!(ops[2].success);
        assert!(matches!(
            ops[2].parameters,
            Some(OperationParameters::InsertText { position: Position::LineColumn { line: 2, column: 0 }, .. })
        ));
    }
}
