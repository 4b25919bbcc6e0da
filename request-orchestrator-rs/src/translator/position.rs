//! Position and range normalization
//!
//! Backends describe locations loosely: named anchors, `{line, column}`,
//! `{paragraph}`, `{offset}` or a bare number. Everything is normalized into
//! `Position` and `Range` before it reaches the document collaborator.

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

/// A point in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    DocumentStart,
    DocumentEnd,
    CurrentCursor,
    /// Zero-based line and column
    LineColumn { line: u64, column: u64 },
    /// Start of a zero-based paragraph
    Paragraph { index: u64 },
    /// Character offset from the document start
    Offset { offset: u64 },
}

impl Default for Position {
    fn default() -> Self {
        Position::CurrentCursor
    }
}

/// A span of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Range {
    CurrentSelection,
    EntireDocument,
    /// A whole zero-based paragraph
    Paragraph { index: u64 },
    /// From `start` up to `end`
    Span { start: Position, end: Position },
}

impl Default for Range {
    fn default() -> Self {
        Range::CurrentSelection
    }
}

fn normalize_anchor(anchor: &str) -> String {
    anchor
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect()
}

fn index_field(fields: &Map<String, Value>, key: &str) -> Result<Option<u64>, String> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("'{}' must be a non-negative integer", key)),
    }
}

/// Normalizes a position; an absent position means the current cursor
pub fn parse_position(value: Option<&Value>) -> Result<Position, String> {
    let value = match value {
        None | Some(Value::Null) => return Ok(Position::CurrentCursor),
        Some(value) => value,
    };

    match value {
        Value::String(anchor) => match normalize_anchor(anchor).as_str() {
            "documentstart" | "start" | "beginning" | "top" => Ok(Position::DocumentStart),
            "documentend" | "end" | "bottom" => Ok(Position::DocumentEnd),
            "currentcursor" | "cursor" | "current" => Ok(Position::CurrentCursor),
            _ => Err(format!("unknown position anchor '{}'", anchor)),
        },
        Value::Number(number) => number
            .as_u64()
            .map(|offset| Position::Offset { offset })
            .ok_or_else(|| format!("position offset must be a non-negative integer, got {}", number)),
        Value::Object(fields) => {
            if let Some(Value::String(anchor)) = fields.get("anchor") {
                return parse_position(Some(&Value::String(anchor.clone())));
            }
            if let Some(line) = index_field(fields, "line")? {
                let column = index_field(fields, "column")?.unwrap_or(0);
                return Ok(Position::LineColumn { line, column });
            }
            if let Some(index) = index_field(fields, "paragraph")? {
                return Ok(Position::Paragraph { index });
            }
            if let Some(offset) = index_field(fields, "offset")? {
                return Ok(Position::Offset { offset });
            }
            Err("position object needs 'line', 'paragraph', 'offset' or 'anchor'".to_string())
        }
        other => Err(format!("unsupported position value {}", other)),
    }
}

/// Normalizes a range; an absent range means the current selection
pub fn parse_range(value: Option<&Value>) -> Result<Range, String> {
    let value = match value {
        None | Some(Value::Null) => return Ok(Range::CurrentSelection),
        Some(value) => value,
    };

    match value {
        Value::String(anchor) => match normalize_anchor(anchor).as_str() {
            "currentselection" | "selection" => Ok(Range::CurrentSelection),
            "entiredocument" | "document" | "all" => Ok(Range::EntireDocument),
            _ => Err(format!("unknown range anchor '{}'", anchor)),
        },
        Value::Object(fields) => {
            if let Some(index) = index_field(fields, "paragraph")? {
                return Ok(Range::Paragraph { index });
            }
            match (fields.get("start"), fields.get("end")) {
                (Some(start), Some(end)) => {
                    let start = parse_position(Some(start))?;
                    let end = parse_position(Some(end))?;
                    if ends_before(&start, &end) {
                        return Err("range end lies before its start".to_string());
                    }
                    Ok(Range::Span { start, end })
                }
                (Some(_), None) | (None, Some(_)) => Err("range needs both 'start' and 'end'".to_string()),
                (None, None) => Err("range object needs 'paragraph' or 'start' and 'end'".to_string()),
            }
        }
        other => Err(format!("unsupported range value {}", other)),
    }
}

/// Only comparable position pairs are checked
fn ends_before(start: &Position, end: &Position) -> bool {
    match (start, end) {
        (Position::Offset { offset: a }, Position::Offset { offset: b }) => b < a,
        (Position::LineColumn { line: la, column: ca }, Position::LineColumn { line: lb, column: cb }) => {
            (lb, cb) < (la, ca)
        }
        (Position::Paragraph { index: a }, Position::Paragraph { index: b }) => b < a,
        (Position::DocumentEnd, Position::DocumentStart) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_anchors() {
        assert_eq!(parse_position(None), Ok(Position::CurrentCursor));
        assert_eq!(parse_position(Some(&json!("document-start"))), Ok(Position::DocumentStart));
        assert_eq!(parse_position(Some(&json!("Document_End"))), Ok(Position::DocumentEnd));
        assert_eq!(parse_position(Some(&json!("current-cursor"))), Ok(Position::CurrentCursor));
        assert!(parse_position(Some(&json!("somewhere"))).is_err());
    }

    #[test]
    fn test_position_objects() {
        assert_eq!(
            parse_position(Some(&json!({"line": 3, "column": 7}))),
            Ok(Position::LineColumn { line: 3, column: 7 })
        );
        assert_eq!(
            parse_position(Some(&json!({"line": 2}))),
            Ok(Position::LineColumn { line: 2, column: 0 })
        );
        assert_eq!(parse_position(Some(&json!({"paragraph": 4}))), Ok(Position::Paragraph { index: 4 }));
        assert_eq!(parse_position(Some(&json!(42))), Ok(Position::Offset { offset: 42 }));
        assert_eq!(parse_position(Some(&json!({"anchor": "end"}))), Ok(Position::DocumentEnd));
        assert!(parse_position(Some(&json!(-1))).is_err());
        assert!(parse_position(Some(&json!({"line": "three"}))).is_err());
        assert!(parse_position(Some(&json!({}))).is_err());
    }

    #[test]
    fn test_ranges() {
        assert_eq!(parse_range(None), Ok(Range::CurrentSelection));
        assert_eq!(parse_range(Some(&json!("entire-document"))), Ok(Range::EntireDocument));
        assert_eq!(parse_range(Some(&json!({"paragraph": 1}))), Ok(Range::Paragraph { index: 1 }));
        assert_eq!(
            parse_range(Some(&json!({"start": 5, "end": 10}))),
            Ok(Range::Span {
                start: Position::Offset { offset: 5 },
                end: Position::Offset { offset: 10 },
            })
        );
        assert!(parse_range(Some(&json!({"start": 10, "end": 5}))).is_err());
        assert!(parse_range(Some(&json!({"start": 10}))).is_err());
    }
}
