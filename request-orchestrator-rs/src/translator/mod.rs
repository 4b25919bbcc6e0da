//! # Operation Translator
//!
//! Converts generic `OperationDescriptor`s into `TranslatedOperation`s with
//! typed, validated parameters. A descriptor that cannot be translated
//! yields a failed `TranslatedOperation` carrying the reason; translation of
//! its siblings is unaffected.

use std::fmt;
use metrics::counter;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::interpreter::OperationDescriptor;

pub mod position;

pub use position::{parse_position, parse_range, Position, Range};

/// Priority given to operations that do not state one
pub const DEFAULT_PRIORITY: u8 = 1;

/// Highest allowed priority value (executed last)
pub const MAX_PRIORITY: u8 = 100;

/// Bound on either table dimension
pub const MAX_TABLE_DIMENSION: u32 = 100;

/// Concrete operation kinds understood by the document collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    InsertText,
    ApplyFormatting,
    CreateTable,
    CreateChart,
    InsertImage,
    ApplyTemplate,
    RestructureDocument,
}

impl OperationType {
    /// Resolves a descriptor tag, accepting snake, kebab and camel case plus short aliases
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect();

        match normalized.as_str() {
            "inserttext" | "insert" | "text" => Some(OperationType::InsertText),
            "applyformatting" | "formattext" | "format" | "formatting" => Some(OperationType::ApplyFormatting),
            "createtable" | "inserttable" | "table" => Some(OperationType::CreateTable),
            "createchart" | "insertchart" | "chart" => Some(OperationType::CreateChart),
            "insertimage" | "image" => Some(OperationType::InsertImage),
            "applytemplate" | "template" => Some(OperationType::ApplyTemplate),
            "restructuredocument" | "restructure" => Some(OperationType::RestructureDocument),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::InsertText => "insert_text",
            OperationType::ApplyFormatting => "apply_formatting",
            OperationType::CreateTable => "create_table",
            OperationType::CreateChart => "create_chart",
            OperationType::InsertImage => "insert_image",
            OperationType::ApplyTemplate => "apply_template",
            OperationType::RestructureDocument => "restructure_document",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Character formatting; unset fields leave the document unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Formatting {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    #[serde(alias = "font", alias = "font_family")]
    pub font_name: Option<String>,
    #[serde(alias = "size")]
    pub font_size: Option<f32>,
    pub color: Option<String>,
    pub highlight: Option<String>,
    /// 1 through 6
    pub heading_level: Option<u8>,
    /// Named paragraph style
    pub style: Option<String>,
}

impl Formatting {
    pub fn is_empty(&self) -> bool {
        *self == Formatting::default()
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.font_size {
            if !(size > 0.0 && size <= 1638.0) {
                return Err(format!("font size {} is out of range", size));
            }
        }
        if let Some(level) = self.heading_level {
            if !(1..=6).contains(&level) {
                return Err(format!("heading level {} must be between 1 and 6", level));
            }
        }
        Ok(())
    }
}

/// Presentation of a created table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableProperties {
    /// First row is a header row
    pub has_header: bool,
    pub style: Option<String>,
    pub borders: Option<bool>,
    pub column_widths: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Column,
    Line,
    Pie,
    Area,
    Scatter,
}

impl Default for ChartType {
    fn default() -> Self {
        ChartType::Bar
    }
}

impl ChartType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "bar" => Some(ChartType::Bar),
            "column" => Some(ChartType::Column),
            "line" => Some(ChartType::Line),
            "pie" => Some(ChartType::Pie),
            "area" => Some(ChartType::Area),
            "scatter" => Some(ChartType::Scatter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub values: Vec<f64>,
}

/// Labels plus one or more equally long series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub series: Vec<ChartSeries>,
}

/// Structural document edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestructureAction {
    ReorderSections,
    MergeSections,
    SplitSection,
    AddHeadings,
    GenerateToc,
}

impl RestructureAction {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().replace('-', "_").as_str() {
            "reorder_sections" | "reorder" => Some(RestructureAction::ReorderSections),
            "merge_sections" | "merge" => Some(RestructureAction::MergeSections),
            "split_section" | "split" => Some(RestructureAction::SplitSection),
            "add_headings" => Some(RestructureAction::AddHeadings),
            "generate_toc" | "toc" | "table_of_contents" => Some(RestructureAction::GenerateToc),
            _ => None,
        }
    }
}

/// Validated parameters, one variant per operation type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationParameters {
    InsertText {
        content: String,
        position: Position,
        formatting: Option<Formatting>,
    },
    ApplyFormatting {
        range: Range,
        formatting: Formatting,
    },
    CreateTable {
        rows: u32,
        columns: u32,
        position: Position,
        /// Row-major cell text, at most `rows` × `columns`
        data: Vec<Vec<String>>,
        properties: TableProperties,
    },
    CreateChart {
        chart_type: ChartType,
        data: ChartData,
        position: Position,
        title: Option<String>,
        properties: Map<String, Value>,
    },
    InsertImage {
        source: String,
        alt_text: Option<String>,
        position: Position,
        width: Option<u32>,
        height: Option<u32>,
    },
    ApplyTemplate {
        template: String,
        variables: Map<String, Value>,
    },
    RestructureDocument {
        action: RestructureAction,
        /// Zero-based section indices the action applies to
        sections: Vec<u64>,
    },
}

impl OperationParameters {
    pub fn operation_type(&self) -> OperationType {
        match self {
            OperationParameters::InsertText { .. } => OperationType::InsertText,
            OperationParameters::ApplyFormatting { .. } => OperationType::ApplyFormatting,
            OperationParameters::CreateTable { .. } => OperationType::CreateTable,
            OperationParameters::CreateChart { .. } => OperationType::CreateChart,
            OperationParameters::InsertImage { .. } => OperationType::InsertImage,
            OperationParameters::ApplyTemplate { .. } => OperationType::ApplyTemplate,
            OperationParameters::RestructureDocument { .. } => OperationType::RestructureDocument,
        }
    }
}

/// Result of translating one descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedOperation {
    /// Tag as sent by the backend
    pub type_tag: String,
    /// `None` when the tag is not a supported operation
    pub operation_type: Option<OperationType>,
    pub parameters: Option<OperationParameters>,
    /// 1 through 100, lower runs earlier; always set
    pub priority: u8,
    pub description: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl TranslatedOperation {
    fn translated(descriptor: &OperationDescriptor, priority: u8, parameters: OperationParameters) -> Self {
        Self {
            type_tag: descriptor.op_type.clone(),
            operation_type: Some(parameters.operation_type()),
            parameters: Some(parameters),
            priority,
            description: descriptor.get_str("description").map(str::to_string),
            success: true,
            error: None,
        }
    }

    fn failed(
        descriptor: &OperationDescriptor,
        operation_type: Option<OperationType>,
        priority: u8,
        error: impl Into<String>,
    ) -> Self {
        Self {
            type_tag: descriptor.op_type.clone(),
            operation_type,
            parameters: None,
            priority,
            description: descriptor.get_str("description").map(str::to_string),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Label used in results and logs
    pub fn type_name(&self) -> String {
        self.operation_type
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| self.type_tag.clone())
    }
}

/// Descriptor-to-operation conversion rules
#[derive(Debug, Clone, Default)]
pub struct OperationTranslator;

impl OperationTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Translates a batch, one result per descriptor, in descriptor order
    pub fn translate_all(&self, descriptors: &[OperationDescriptor]) -> Vec<TranslatedOperation> {
        descriptors.iter().map(|descriptor| self.translate(descriptor)).collect()
    }

    pub fn translate(&self, descriptor: &OperationDescriptor) -> TranslatedOperation {
        let priority = priority_of(descriptor);

        let operation_type = match OperationType::from_tag(&descriptor.op_type) {
            Some(operation_type) => operation_type,
            None => {
                counter!("translator_failures_total", 1, "type" => "unsupported");
                warn!(op_type = %descriptor.op_type, "Unsupported operation type");
                return TranslatedOperation::failed(
                    descriptor,
                    None,
                    priority,
                    format!("Unsupported operation type '{}'", descriptor.op_type),
                );
            }
        };

        let parameters = match operation_type {
            OperationType::InsertText => insert_text(descriptor),
            OperationType::ApplyFormatting => apply_formatting(descriptor),
            OperationType::CreateTable => create_table(descriptor),
            OperationType::CreateChart => create_chart(descriptor),
            OperationType::InsertImage => insert_image(descriptor),
            OperationType::ApplyTemplate => apply_template(descriptor),
            OperationType::RestructureDocument => restructure_document(descriptor),
        };

        match parameters {
            Ok(parameters) => {
                debug!(op_type = %operation_type, priority = priority, "Operation translated");
                TranslatedOperation::translated(descriptor, priority, parameters)
            }
            Err(reason) => {
                counter!("translator_failures_total", 1, "type" => operation_type.as_str());
                warn!(op_type = %operation_type, error = %reason, "Operation translation failed");
                TranslatedOperation::failed(
                    descriptor,
                    Some(operation_type),
                    priority,
                    format!("Invalid {} operation: {}", operation_type, reason),
                )
            }
        }
    }
}

/// Stated priority clamped to 1..=100; absent or non-numeric means 1
fn priority_of(descriptor: &OperationDescriptor) -> u8 {
    let stated = match descriptor.get("priority") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    stated
        .map(|p| p.clamp(i64::from(DEFAULT_PRIORITY), i64::from(MAX_PRIORITY)) as u8)
        .unwrap_or(DEFAULT_PRIORITY)
}

/// Parses a typed sub-object, naming the field on failure
fn typed<T: serde::de::DeserializeOwned>(value: &Value, field: &str) -> Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("invalid '{}': {}", field, e))
}

fn formatting_of(descriptor: &OperationDescriptor) -> Result<Option<Formatting>, String> {
    match descriptor.get("formatting") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let formatting: Formatting = typed(value, "formatting")?;
            formatting.validate()?;
            Ok(Some(formatting))
        }
    }
}

fn insert_text(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let content = descriptor
        .get_str("content")
        .or_else(|| descriptor.get_str("text"))
        .ok_or("missing 'content'")?;
    if content.is_empty() {
        return Err("'content' is empty".to_string());
    }

    Ok(OperationParameters::InsertText {
        content: content.to_string(),
        position: parse_position(descriptor.get("position"))?,
        formatting: formatting_of(descriptor)?,
    })
}

fn apply_formatting(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let formatting = formatting_of(descriptor)?.ok_or("missing 'formatting'")?;
    if formatting.is_empty() {
        return Err("'formatting' sets no attributes".to_string());
    }

    Ok(OperationParameters::ApplyFormatting {
        range: parse_range(descriptor.get("range"))?,
        formatting,
    })
}

/// Table dimension: clamped to 1..=100, `None` when absent
fn dimension(descriptor: &OperationDescriptor, keys: &[&str]) -> Result<Option<u32>, String> {
    let value = keys.iter().find_map(|key| descriptor.get(key).filter(|v| !v.is_null()));
    let count = match value {
        None => return Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("'{}' must be an integer", keys[0]))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' must be an integer", keys[0]))?,
        Some(_) => return Err(format!("'{}' must be an integer", keys[0])),
    };
    Ok(Some(count.clamp(1, i64::from(MAX_TABLE_DIMENSION)) as u32))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn create_table(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let data: Vec<Vec<String>> = match descriptor.get("data") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(rows)) => rows
            .iter()
            .map(|row| match row {
                Value::Array(cells) => Ok(cells.iter().map(cell_text).collect::<Vec<String>>()),
                _ => Err("'data' must be an array of rows".to_string()),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err("'data' must be an array of rows".to_string()),
    };

    let data_columns = data.iter().map(Vec::len).max().unwrap_or(0) as u32;
    let rows = dimension(descriptor, &["rows", "row_count"])?
        .unwrap_or_else(|| (data.len() as u32).clamp(1, MAX_TABLE_DIMENSION));
    let columns = dimension(descriptor, &["columns", "cols", "column_count"])?
        .unwrap_or_else(|| data_columns.clamp(1, MAX_TABLE_DIMENSION));

    if data.len() as u32 > rows || data_columns > columns {
        return Err(format!(
            "table data ({}x{}) exceeds the table size ({}x{})",
            data.len(),
            data_columns,
            rows,
            columns
        ));
    }

    let properties = match descriptor.get("properties") {
        None | Some(Value::Null) => TableProperties::default(),
        Some(value) => typed(value, "properties")?,
    };

    Ok(OperationParameters::CreateTable {
        rows,
        columns,
        position: parse_position(descriptor.get("position"))?,
        data,
        properties,
    })
}

fn numbers(value: &Value, field: &str) -> Result<Vec<f64>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("'{}' must be an array of numbers", field))?
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| format!("'{}' must contain only numbers", field)))
        .collect()
}

/// Accepts `{labels, series: [{name, values}]}`, `{labels, values}` or a bare number array
fn chart_data(value: &Value) -> Result<ChartData, String> {
    let (labels, series) = match value {
        Value::Array(_) => (Vec::new(), vec![ChartSeries {
            name: "Series 1".to_string(),
            values: numbers(value, "data")?,
        }]),
        Value::Object(fields) => {
            let labels: Vec<String> = match fields.get("labels") {
                Some(Value::Array(labels)) => labels.iter().map(cell_text).collect(),
                Some(_) => return Err("'labels' must be an array".to_string()),
                None => Vec::new(),
            };
            let series = if let Some(series) = fields.get("series") {
                series
                    .as_array()
                    .ok_or("'series' must be an array")?
                    .iter()
                    .enumerate()
                    .map(|(i, s)| -> Result<ChartSeries, String> {
                        let name = s
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("Series {}", i + 1));
                        let values = s.get("values").ok_or("series is missing 'values'")?;
                        Ok(ChartSeries {
                            name,
                            values: numbers(values, "values")?,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            } else if let Some(values) = fields.get("values") {
                vec![ChartSeries {
                    name: "Series 1".to_string(),
                    values: numbers(values, "values")?,
                }]
            } else {
                return Err("chart data needs 'series' or 'values'".to_string());
            };
            (labels, series)
        }
        _ => return Err("'data' must be an object or an array".to_string()),
    };

    let points = series.first().map(|s| s.values.len()).unwrap_or(0);
    if points == 0 {
        return Err("chart data has no values".to_string());
    }
    if series.iter().any(|s| s.values.len() != points) {
        return Err("chart series differ in length".to_string());
    }
    if !labels.is_empty() && labels.len() != points {
        return Err(format!("{} labels for {} data points", labels.len(), points));
    }

    let labels = if labels.is_empty() {
        (1..=points).map(|i| i.to_string()).collect()
    } else {
        labels
    };
    Ok(ChartData { labels, series })
}

fn create_chart(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let chart_type = match descriptor.get_str("chart_type").or_else(|| descriptor.get_str("chartType")) {
        Some(tag) => ChartType::from_tag(tag).ok_or_else(|| format!("unknown chart type '{}'", tag))?,
        None => ChartType::default(),
    };
    let data = descriptor.get("data").ok_or("missing 'data'")?;

    let properties = match descriptor.get("properties") {
        Some(Value::Object(properties)) => properties.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err("'properties' must be an object".to_string()),
    };

    Ok(OperationParameters::CreateChart {
        chart_type,
        data: chart_data(data)?,
        position: parse_position(descriptor.get("position"))?,
        title: descriptor.get_str("title").map(str::to_string),
        properties,
    })
}

fn optional_u32(descriptor: &OperationDescriptor, key: &str) -> Result<Option<u32>, String> {
    match descriptor.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|v| *v > 0 && *v <= u64::from(u32::MAX))
            .map(|v| Some(v as u32))
            .ok_or_else(|| format!("'{}' must be a positive integer", key)),
    }
}

fn insert_image(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let source = descriptor
        .get_str("source")
        .or_else(|| descriptor.get_str("url"))
        .or_else(|| descriptor.get_str("path"))
        .filter(|s| !s.trim().is_empty())
        .ok_or("missing 'source'")?;

    Ok(OperationParameters::InsertImage {
        source: source.to_string(),
        alt_text: descriptor.get_str("alt_text").map(str::to_string),
        position: parse_position(descriptor.get("position"))?,
        width: optional_u32(descriptor, "width")?,
        height: optional_u32(descriptor, "height")?,
    })
}

fn apply_template(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let template = descriptor
        .get_str("template")
        .or_else(|| descriptor.get_str("name"))
        .filter(|s| !s.trim().is_empty())
        .ok_or("missing 'template'")?;

    let variables = match descriptor.get("variables") {
        Some(Value::Object(variables)) => variables.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err("'variables' must be an object".to_string()),
    };

    Ok(OperationParameters::ApplyTemplate {
        template: template.to_string(),
        variables,
    })
}

fn restructure_document(descriptor: &OperationDescriptor) -> Result<OperationParameters, String> {
    let tag = descriptor.get_str("action").ok_or("missing 'action'")?;
    let action = RestructureAction::from_tag(tag).ok_or_else(|| format!("unknown restructure action '{}'", tag))?;

    let sections: Vec<u64> = match descriptor.get("sections") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_u64().ok_or("'sections' must contain section indices"))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err("'sections' must be an array".to_string()),
    };

    match action {
        RestructureAction::ReorderSections if sections.is_empty() => {
            return Err("reorder_sections needs the new section order".to_string())
        }
        RestructureAction::MergeSections if sections.len() < 2 => {
            return Err("merge_sections needs at least two sections".to_string())
        }
        RestructureAction::SplitSection if sections.len() != 1 => {
            return Err("split_section needs exactly one section".to_string())
        }
        _ => {}
    }

    Ok(OperationParameters::RestructureDocument { action, sections })
}
