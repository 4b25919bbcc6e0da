//! # Response Interpreter
//!
//! Turns a backend response body into a `ParsedResponse`. Parsing happens in
//! two steps so the two failure classes stay distinct: the body is first read
//! as JSON (`ParseError::Syntax`, with line and column), then validated
//! against the response schema (`ParseError::Schema`, with a JSON path).
//!
//! A response is rejected as a whole when any operation descriptor lacks a
//! string `type`; it never degrades into an empty operation list.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod models;

pub use models::{OperationDescriptor, ParsedResponse, RawResponse, ResponseErrorKind, ResponseType};

/// A response body that cannot be interpreted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid response at {path}: {message}")]
    Schema { path: String, message: String },
}

impl ParseError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        ParseError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ResponseErrorKind {
        match self {
            ParseError::Syntax { .. } => ResponseErrorKind::Syntax,
            ParseError::Schema { .. } => ResponseErrorKind::Schema,
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_data() {
            ParseError::schema("$", error.to_string())
        } else {
            ParseError::Syntax {
                line: error.line(),
                column: error.column(),
                message: error.to_string(),
            }
        }
    }
}

/// Interprets a body, reporting failures as `success = false`
pub fn parse(body: &str) -> ParsedResponse {
    match try_parse(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Backend response rejected");
            ParsedResponse::failure(e.kind(), e.to_string())
        }
    }
}

/// Interprets a body, returning parse failures as errors
pub fn try_parse(body: &str) -> Result<ParsedResponse, ParseError> {
    let value: Value = serde_json::from_str(body)?;
    let raw: RawResponse = serde_json::from_value(value)?;
    interpret(raw)
}

fn interpret(raw: RawResponse) -> Result<ParsedResponse, ParseError> {
    let response_type = resolve_type(&raw)?;

    let mut operations = synthesize_operation(response_type, &raw)?.into_iter().collect::<Vec<_>>();
    if let Some(listed) = &raw.operations {
        for (index, value) in listed.iter().enumerate() {
            operations.push(descriptor_from_value(value, &format!("$.operations[{}]", index))?);
        }
    } else if response_type == ResponseType::Operations {
        return Err(ParseError::schema("$.operations", "operations response without an operations list"));
    }

    let operation_summaries = raw
        .operation_summaries
        .as_ref()
        .map(|summaries| summaries.iter().map(summary_text).collect())
        .unwrap_or_default();

    let response_text = response_text(&raw, response_type);
    let backend_failed = response_type == ResponseType::Error || raw.success == Some(false);

    let (error, error_kind) = if backend_failed {
        let message = raw
            .error
            .as_ref()
            .and_then(error_text)
            .or_else(|| (!response_text.is_empty()).then(|| response_text.clone()))
            .unwrap_or_else(|| "backend reported an error".to_string());
        (Some(message), Some(ResponseErrorKind::Backend))
    } else {
        (None, None)
    };

    let mut metadata = raw.metadata.clone().unwrap_or_default();
    if let Some(request_id) = &raw.request_id {
        metadata
            .entry("request_id".to_string())
            .or_insert_with(|| Value::String(request_id.clone()));
    }

    debug!(
        response_type = %response_type,
        operations = operations.len(),
        success = !backend_failed,
        "Backend response interpreted"
    );

    Ok(ParsedResponse {
        success: !backend_failed,
        response_type: Some(response_type),
        response_text,
        operations,
        operation_summaries,
        warnings: raw.warnings.clone().unwrap_or_default(),
        metadata,
        error,
        error_kind,
    })
}

/// `type` decides; without it `success` must be present
fn resolve_type(raw: &RawResponse) -> Result<ResponseType, ParseError> {
    match (&raw.response_type, raw.success) {
        (Some(tag), _) => ResponseType::from_tag(tag)
            .ok_or_else(|| ParseError::schema("$.type", format!("unknown response type '{}'", tag))),
        (None, Some(false)) => Ok(ResponseType::Error),
        (None, Some(true)) => Ok(if raw.operations.is_some() {
            ResponseType::Operations
        } else {
            ResponseType::Response
        }),
        (None, None) => Err(ParseError::schema(
            "$",
            "missing discriminator: expected a 'type' or 'success' field",
        )),
    }
}

/// Single-action response types describe their operation at the top level
fn synthesize_operation(response_type: ResponseType, raw: &RawResponse) -> Result<Option<OperationDescriptor>, ParseError> {
    let descriptor = match response_type {
        ResponseType::Insert => {
            let content = raw
                .content
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::schema("$.content", "insert response requires string content"))?;
            let mut op = OperationDescriptor::new("insert_text").with_field("content", Value::String(content.to_string()));
            op = with_optional(op, "position", &raw.position);
            with_optional(op, "formatting", &raw.formatting)
        }
        ResponseType::Format => {
            let formatting = raw
                .formatting
                .clone()
                .or_else(|| raw.content.clone().filter(Value::is_object))
                .ok_or_else(|| ParseError::schema("$.formatting", "format response requires formatting"))?;
            let op = OperationDescriptor::new("apply_formatting").with_field("formatting", formatting);
            with_optional(op, "range", &raw.range)
        }
        ResponseType::Table => {
            let mut op = OperationDescriptor::new("create_table");
            op = with_optional(op, "rows", &raw.rows);
            op = with_optional(op, "columns", &raw.columns);
            op = with_optional(op, "data", &raw.data);
            op = with_optional(op, "position", &raw.position);
            op = with_optional(op, "properties", &raw.properties);
            merge_content_object(op, &raw.content)
        }
        ResponseType::Chart => {
            let mut op = OperationDescriptor::new("create_chart");
            op = with_optional(op, "data", &raw.data);
            if let Some(chart_type) = &raw.chart_type {
                op = op.with_field("chart_type", Value::String(chart_type.clone()));
            }
            op = with_optional(op, "position", &raw.position);
            op = with_optional(op, "properties", &raw.properties);
            merge_content_object(op, &raw.content)
        }
        ResponseType::Response | ResponseType::Operations | ResponseType::Error => return Ok(None),
    };
    Ok(Some(descriptor))
}

fn with_optional(op: OperationDescriptor, key: &str, value: &Option<Value>) -> OperationDescriptor {
    match value {
        Some(value) => op.with_field(key, value.clone()),
        None => op,
    }
}

/// Table and chart payloads may also arrive nested under `content`
fn merge_content_object(mut op: OperationDescriptor, content: &Option<Value>) -> OperationDescriptor {
    if let Some(Value::Object(fields)) = content {
        for (key, value) in fields {
            if key != "type" {
                op.fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    op
}

fn descriptor_from_value(value: &Value, path: &str) -> Result<OperationDescriptor, ParseError> {
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::schema(path, "operation descriptor must be an object"))?;

    let op_type = match object.get("type") {
        Some(Value::String(tag)) if !tag.trim().is_empty() => tag.clone(),
        Some(Value::String(_)) => return Err(ParseError::schema(format!("{}.type", path), "operation type is empty")),
        Some(_) => return Err(ParseError::schema(format!("{}.type", path), "operation type must be a string")),
        None => return Err(ParseError::schema(format!("{}.type", path), "operation is missing its type")),
    };

    let fields: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| key.as_str() != "type")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(OperationDescriptor { op_type, fields })
}

fn response_text(raw: &RawResponse, response_type: ResponseType) -> String {
    raw.response
        .clone()
        .or_else(|| raw.response_content.clone())
        .or_else(|| match response_type {
            // Only conversational responses use `content` as their text
            ResponseType::Response => raw.content.as_ref().and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .or_else(|| raw.message.clone())
        .unwrap_or_default()
}

fn summary_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(fields) => fields
            .get("description")
            .or_else(|| fields.get("summary"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => fields.get("message").and_then(Value::as_str).map(str::to_string),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
