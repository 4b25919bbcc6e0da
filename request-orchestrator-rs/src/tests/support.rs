//! Shared test fixtures

#[cfg(test)]
pub use self::fixtures::*;

#[cfg(test)]
mod fixtures {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Map, Value};

    use crate::config::OrchestratorConfig;
    use crate::executor::{DocumentCollaborator, DocumentError};
    use crate::translator::{ChartData, ChartType, Formatting, Position, Range, TableProperties};

    /// Document that records every call and fails the configured operations
    #[derive(Default)]
    pub struct RecordingDocument {
        pub calls: Mutex<Vec<String>>,
        pub failing: HashSet<&'static str>,
    }

    impl RecordingDocument {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(operation: &'static str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: [operation].into_iter().collect(),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, operation: &'static str, detail: String) -> Result<String, DocumentError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(detail);
            if self.failing.contains(operation) {
                return Err(DocumentError::Failed(format!("{} rejected", operation)));
            }
            Ok(format!("{}-{}", operation, calls.len()))
        }
    }

    #[async_trait]
    impl DocumentCollaborator for RecordingDocument {
        async fn insert_text(
            &self,
            text: &str,
            _position: &Position,
            _formatting: Option<&Formatting>,
        ) -> Result<String, DocumentError> {
            self.record("insert_text", format!("insert_text:{}", text))
        }

        async fn format_text(&self, _range: &Range, _formatting: &Formatting) -> Result<String, DocumentError> {
            self.record("apply_formatting", "apply_formatting".to_string())
        }

        async fn create_table(
            &self,
            rows: u32,
            columns: u32,
            _position: &Position,
            _data: &[Vec<String>],
            _properties: &TableProperties,
        ) -> Result<String, DocumentError> {
            self.record("create_table", format!("create_table:{}x{}", rows, columns))
        }

        async fn insert_chart(
            &self,
            data: &ChartData,
            _chart_type: ChartType,
            _position: &Position,
            _title: Option<&str>,
            _properties: &Map<String, Value>,
        ) -> Result<String, DocumentError> {
            self.record("create_chart", format!("create_chart:{}", data.series.len()))
        }
    }

    /// Config pointing at `url` with millisecond-scale retry delays
    pub fn fast_config(url: &str) -> OrchestratorConfig {
        OrchestratorConfig {
            backend_url: url.to_string(),
            max_retries: 3,
            timeout_ms: 2_000,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            jitter_ms: 0,
            ..OrchestratorConfig::default()
        }
    }
}
