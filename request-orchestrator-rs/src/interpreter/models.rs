//! Backend response models
//!
//! `RawResponse` mirrors the wire format and rejects unknown top-level
//! fields. `ParsedResponse` is what the rest of the pipeline consumes.

use std::fmt;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

/// Wire shape of a backend response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawResponse {
    #[serde(rename = "type")]
    pub response_type: Option<String>,
    pub success: Option<bool>,
    pub response: Option<String>,
    pub response_content: Option<String>,
    pub message: Option<String>,
    pub content: Option<Value>,
    pub operations: Option<Vec<Value>>,
    pub operation_summaries: Option<Vec<Value>>,
    pub warnings: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
    pub error: Option<Value>,
    pub request_id: Option<String>,

    // Fields of the single-action response types
    pub position: Option<Value>,
    pub range: Option<Value>,
    pub formatting: Option<Value>,
    pub rows: Option<Value>,
    pub columns: Option<Value>,
    pub data: Option<Value>,
    pub chart_type: Option<String>,
    pub properties: Option<Value>,
}

/// Kind of response the backend sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Conversational text only
    Response,
    Insert,
    Format,
    Table,
    Chart,
    /// An explicit list of operations
    Operations,
    /// The backend reported a failure
    Error,
}

impl ResponseType {
    /// Parses a `type` discriminator; `chat` is an alias of `response`
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "response" | "chat" | "text" => Some(ResponseType::Response),
            "insert" => Some(ResponseType::Insert),
            "format" => Some(ResponseType::Format),
            "table" => Some(ResponseType::Table),
            "chart" => Some(ResponseType::Chart),
            "operations" => Some(ResponseType::Operations),
            "error" => Some(ResponseType::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ResponseType::Response => "response",
            ResponseType::Insert => "insert",
            ResponseType::Format => "format",
            ResponseType::Table => "table",
            ResponseType::Chart => "chart",
            ResponseType::Operations => "operations",
            ResponseType::Error => "error",
        };
        write!(f, "{}", tag)
    }
}

/// A generic, untranslated description of one document action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// The `type` tag exactly as the backend sent it
    #[serde(rename = "type")]
    pub op_type: String,
    /// Every other field of the descriptor
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OperationDescriptor {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Why a response could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseErrorKind {
    /// The body is not valid JSON
    Syntax,
    /// Valid JSON that does not match the response schema
    Schema,
    /// A well-formed response in which the backend reports a failure
    Backend,
}

/// Strongly-typed result of interpreting a backend response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub success: bool,
    pub response_type: Option<ResponseType>,
    /// Text to show the user
    pub response_text: String,
    pub operations: Vec<OperationDescriptor>,
    pub operation_summaries: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
    pub error_kind: Option<ResponseErrorKind>,
}

impl ParsedResponse {
    /// A failed parse carrying only the error
    pub fn failure(kind: ResponseErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            response_type: None,
            response_text: String::new(),
            operations: Vec::new(),
            operation_summaries: Vec::new(),
            warnings: Vec::new(),
            metadata: Map::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }
}
