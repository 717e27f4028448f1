use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::{AppConfig, PublicAppConfig};
use crate::errors::AppResult;
use crate::export::{summarize, ExportFormat, SummaryMetrics};
use crate::probe::Reachability;
use crate::submission::{BatchOutcome, BatchResult};
use crate::validation::ValidationResult;

#[derive(Debug, Serialize)]
pub struct ConsoleHealth {
    pub config: PublicAppConfig,
    pub endpoint: Reachability,
    pub journal_path: String,
    pub journal_queue_depth: usize,
}

impl ConsoleHealth {
    pub fn new(
        config: PublicAppConfig,
        endpoint: Reachability,
        journal_path: String,
        journal_queue_depth: usize,
    ) -> Self {
        Self {
            config,
            endpoint,
            journal_path,
            journal_queue_depth,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub endpoint_url: String,
    pub timeout_ms: u64,
}

impl RunOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            endpoint_url: config.endpoint_url.clone(),
            timeout_ms: config.workflow_timeout_ms,
        }
    }

    pub fn with_endpoint(mut self, endpoint_url: Option<String>) -> Self {
        if let Some(url) = endpoint_url.filter(|url| !url.trim().is_empty()) {
            self.endpoint_url = url.trim().to_string();
        }
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        if let Some(timeout_ms) = timeout_ms {
            self.timeout_ms = timeout_ms.max(1);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub submitted: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub validation: ValidationSummary,
    pub result: BatchResult,
    pub summary: SummaryMetrics,
}

impl BatchReport {
    pub fn new(validation: &ValidationResult, result: BatchResult) -> Self {
        let summary = summarize(&result.records);
        Self {
            validation: ValidationSummary {
                submitted: validation.valid.len(),
                skipped: validation.invalid.clone(),
            },
            result,
            summary,
        }
    }

    pub fn message(&self) -> String {
        let nothing_returned =
            self.result.records.is_empty() && self.result.dropped_elements == 0;
        let mut message = match self.result.outcome {
            _ if nothing_returned => "Workflow finished but no leads were returned.".to_string(),
            BatchOutcome::Success => format!(
                "Lead generation completed: {} lead(s) in {} ms.",
                self.summary.lead_count, self.result.elapsed_millis
            ),
            BatchOutcome::PartialFailure => format!(
                "Lead generation completed with gaps: {} lead(s), {} unusable element(s) dropped.",
                self.summary.lead_count, self.result.dropped_elements
            ),
            BatchOutcome::TotalFailure => format!(
                "Workflow returned {} element(s) but none were lead records.",
                self.result.dropped_elements
            ),
        };
        if !self.validation.skipped.is_empty() {
            message.push_str(&format!(
                " Skipped {} invalid line(s).",
                self.validation.skipped.len()
            ));
        }
        message
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub mime_type: &'static str,
    pub bytes: usize,
}

pub fn write_exports(
    report: &BatchReport,
    formats: &[ExportFormat],
    out_dir: &Path,
    stem: &str,
) -> AppResult<Vec<ExportedFile>> {
    fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let bytes = format.render(&report.result.records)?;
        let path = out_dir.join(format.file_name(stem));
        fs::write(&path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "export written");
        written.push(ExportedFile {
            format: *format,
            path,
            mime_type: format.mime_type(),
            bytes: bytes.len(),
        });
    }
    Ok(written)
}
