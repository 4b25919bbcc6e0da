//! # Operation Executor
//!
//! Runs translated operations against the host document in ascending
//! priority order (stable, so equal priorities keep descriptor order). Each
//! operation succeeds or fails on its own; nothing is rolled back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::translator::{
    ChartData, ChartType, Formatting, OperationParameters, Position, Range, RestructureAction, TableProperties,
    TranslatedOperation,
};
use crate::util::measure_time_async;

/// Failure reported by the host document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Document is unavailable: {0}")]
    Unavailable(String),

    #[error("Operation {0} is not supported by this document")]
    Unsupported(String),

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Document operation failed: {0}")]
    Failed(String),
}

/// The host document-editing engine.
///
/// Every method returns the id the document assigns to the change. The host
/// is expected to serialize mutations itself.
#[async_trait]
pub trait DocumentCollaborator: Send + Sync {
    async fn insert_text(
        &self,
        text: &str,
        position: &Position,
        formatting: Option<&Formatting>,
    ) -> Result<String, DocumentError>;

    async fn format_text(&self, range: &Range, formatting: &Formatting) -> Result<String, DocumentError>;

    async fn create_table(
        &self,
        rows: u32,
        columns: u32,
        position: &Position,
        data: &[Vec<String>],
        properties: &TableProperties,
    ) -> Result<String, DocumentError>;

    async fn insert_chart(
        &self,
        data: &ChartData,
        chart_type: ChartType,
        position: &Position,
        title: Option<&str>,
        properties: &Map<String, Value>,
    ) -> Result<String, DocumentError>;

    async fn insert_image(
        &self,
        _source: &str,
        _alt_text: Option<&str>,
        _position: &Position,
        _size: (Option<u32>, Option<u32>),
    ) -> Result<String, DocumentError> {
        Err(DocumentError::Unsupported("insert_image".to_string()))
    }

    async fn apply_template(&self, _template: &str, _variables: &Map<String, Value>) -> Result<String, DocumentError> {
        Err(DocumentError::Unsupported("apply_template".to_string()))
    }

    async fn restructure_document(
        &self,
        _action: RestructureAction,
        _sections: &[u64],
    ) -> Result<String, DocumentError> {
        Err(DocumentError::Unsupported("restructure_document".to_string()))
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Id assigned by the document on success
    pub operation_id: Option<String>,
    pub operation_type: String,
    pub priority: u8,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Totals over one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl ExecutionSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            elapsed: results.iter().map(|r| r.elapsed).sum(),
        }
    }

    /// One-line summary shown to the user
    pub fn describe(&self) -> String {
        format!(
            "Executed {} operation(s): {} successful, {} failed",
            self.total, self.successful, self.failed
        )
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Results in execution order plus their summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub results: Vec<ExecutionResult>,
    pub summary: ExecutionSummary,
}

impl ExecutionReport {
    /// Errors of the failed operations, in execution order
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| format!("{}: {}", r.operation_type, r.error.as_deref().unwrap_or("unknown error")))
            .collect()
    }
}

pub struct OperationExecutor {
    document: Arc<dyn DocumentCollaborator>,
}

impl OperationExecutor {
    pub fn new(document: Arc<dyn DocumentCollaborator>) -> Self {
        Self { document }
    }

    /// Executes every operation, lowest priority value first
    pub async fn execute(&self, operations: &[TranslatedOperation]) -> ExecutionReport {
        let mut ordered: Vec<&TranslatedOperation> = operations.iter().collect();
        ordered.sort_by_key(|op| op.priority);

        let mut results = Vec::with_capacity(ordered.len());
        for operation in ordered {
            results.push(self.execute_one(operation).await);
        }

        let summary = ExecutionSummary::from_results(&results);
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Operations executed"
        );
        ExecutionReport { results, summary }
    }

    async fn execute_one(&self, operation: &TranslatedOperation) -> ExecutionResult {
        let operation_type = operation.type_name();

        // Failed translations never reach the document
        let parameters = match (&operation.parameters, operation.success) {
            (Some(parameters), true) => parameters,
            _ => {
                let error = operation
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("Operation {} was not translated", operation_type));
                counter!("executor_operations_total", 1, "type" => operation_type.clone(), "outcome" => "untranslated");
                return ExecutionResult {
                    success: false,
                    operation_id: None,
                    operation_type,
                    priority: operation.priority,
                    error: Some(error),
                    elapsed: Duration::ZERO,
                };
            }
        };

        let (outcome, elapsed) = measure_time_async(|| self.dispatch(parameters)).await;
        histogram!("executor_operation_duration_seconds", elapsed.as_secs_f64(), "type" => operation_type.clone());

        match outcome {
            Ok(operation_id) => {
                counter!("executor_operations_total", 1, "type" => operation_type.clone(), "outcome" => "success");
                debug!(op_type = %operation_type, operation_id = %operation_id, "Operation executed");
                ExecutionResult {
                    success: true,
                    operation_id: Some(operation_id),
                    operation_type,
                    priority: operation.priority,
                    error: None,
                    elapsed,
                }
            }
            Err(e) => {
                counter!("executor_operations_total", 1, "type" => operation_type.clone(), "outcome" => "failure");
                warn!(op_type = %operation_type, error = %e, "Operation failed");
                ExecutionResult {
                    success: false,
                    operation_id: None,
                    operation_type,
                    priority: operation.priority,
                    error: Some(e.to_string()),
                    elapsed,
                }
            }
        }
    }

    async fn dispatch(&self, parameters: &OperationParameters) -> Result<String, DocumentError> {
        match parameters {
            OperationParameters::InsertText { content, position, formatting } => {
                self.document.insert_text(content, position, formatting.as_ref()).await
            }
            OperationParameters::ApplyFormatting { range, formatting } => {
                self.document.format_text(range, formatting).await
            }
            OperationParameters::CreateTable { rows, columns, position, data, properties } => {
                self.document.create_table(*rows, *columns, position, data, properties).await
            }
            OperationParameters::CreateChart { chart_type, data, position, title, properties } => {
                self.document
                    .insert_chart(data, *chart_type, position, title.as_deref(), properties)
                    .await
            }
            OperationParameters::InsertImage { source, alt_text, position, width, height } => {
                self.document
                    .insert_image(source, alt_text.as_deref(), position, (*width, *height))
                    .await
            }
            OperationParameters::ApplyTemplate { template, variables } => {
                self.document.apply_template(template, variables).await
            }
            OperationParameters::RestructureDocument { action, sections } => {
                self.document.restructure_document(*action, sections).await
            }
        }
    }
}

/// Collaborator that only logs what it would do; used for dry runs
#[derive(Debug, Default)]
pub struct DryRunDocument {
    next_id: AtomicU64,
}

impl DryRunDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl DocumentCollaborator for DryRunDocument {
    async fn insert_text(
        &self,
        text: &str,
        position: &Position,
        formatting: Option<&Formatting>,
    ) -> Result<String, DocumentError> {
        info!(chars = text.chars().count(), position = ?position, formatted = formatting.is_some(), "Dry run: insert text");
        Ok(self.next_id("text"))
    }

    async fn format_text(&self, range: &Range, formatting: &Formatting) -> Result<String, DocumentError> {
        info!(range = ?range, formatting = ?formatting, "Dry run: format text");
        Ok(self.next_id("format"))
    }

    async fn create_table(
        &self,
        rows: u32,
        columns: u32,
        position: &Position,
        _data: &[Vec<String>],
        _properties: &TableProperties,
    ) -> Result<String, DocumentError> {
        info!(rows = rows, columns = columns, position = ?position, "Dry run: create table");
        Ok(self.next_id("table"))
    }

    async fn insert_chart(
        &self,
        data: &ChartData,
        chart_type: ChartType,
        position: &Position,
        title: Option<&str>,
        _properties: &Map<String, Value>,
    ) -> Result<String, DocumentError> {
        info!(chart_type = ?chart_type, series = data.series.len(), title = ?title, position = ?position, "Dry run: insert chart");
        Ok(self.next_id("chart"))
    }
}
