mod commands;
mod config;
mod errors;
mod export;
mod journal;
mod normalize;
mod probe;
mod submission;
mod validation;

use once_cell::sync::OnceCell;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::commands::{
    write_exports, BatchReport, ConsoleHealth, ExportedFile, RunOptions, ValidationSummary,
};
pub use crate::config::{endpoint_base, AppConfig, PublicAppConfig, DEFAULT_WORKFLOW_TIMEOUT_MS};
pub use crate::errors::{AppError, AppResult};
pub use crate::export::{
    columns, render_cell, summarize, to_delimited, to_spreadsheet, ExportFormat, SummaryMetrics,
};
pub use crate::journal::{batch_fingerprint, RunJournal};
pub use crate::normalize::{normalize, LeadRecord, NormalizedLeads, ResponseShape, WRAPPER_KEY};
pub use crate::probe::{probe, Reachability};
pub use crate::submission::{
    BatchOutcome, BatchPayload, BatchResult, HttpWorkflowClient, PhaseObserver,
    SubmissionCoordinator, SubmissionPhase, WorkflowClient, WorkflowResponse,
};
pub use crate::validation::{validate, BatchDraft, BatchRequest, ValidationResult, EXAMPLE_INPUT};

pub struct AppState {
    config: AppConfig,
    http: Client,
    coordinator: SubmissionCoordinator,
    journal: RunJournal,
}

impl AppState {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let http = Client::builder()
            .user_agent(concat!("lead-console/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let journal = RunJournal::new(&config.data_dir, &config)?;
        info!(
            journal = %journal.buffer_path().display(),
            journal_enabled = journal.is_enabled(),
            "lead console initialized"
        );

        Ok(Self {
            coordinator: SubmissionCoordinator::new(http.clone()),
            config,
            http,
            journal,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    pub async fn probe(&self) -> Reachability {
        self.probe_endpoint(&self.config.endpoint_url).await
    }

    pub async fn probe_endpoint(&self, endpoint_url: &str) -> Reachability {
        let state = match endpoint_base(endpoint_url) {
            Ok(base) => probe(&self.http, &base, self.config.probe_timeout_ms).await,
            Err(err) => Reachability::Unreachable {
                reason: err.to_string(),
            },
        };
        self.journal
            .record("probe", json!({ "reachable": state.is_reachable() }));
        self.flush_journal();
        state
    }

    pub async fn console_health(&self) -> ConsoleHealth {
        let endpoint = self.probe().await;
        ConsoleHealth::new(
            self.config.public_profile(),
            endpoint,
            self.journal.buffer_path().to_string_lossy().to_string(),
            self.journal.queue_depth(),
        )
    }

    /// Validates the draft, submits the valid subset once and summarises the
    /// result. Every failure is scoped to this batch.
    pub async fn run_batch(
        &self,
        draft: &BatchDraft,
        options: &RunOptions,
        observer: Option<PhaseObserver>,
    ) -> AppResult<BatchReport> {
        let (batch, validation) = draft.to_request(&self.config.profile_marker)?;
        self.journal
            .record_submitted(&batch, validation.invalid.len());

        let submitted = self
            .coordinator
            .submit(&batch, &options.endpoint_url, options.timeout_ms, observer)
            .await;
        match &submitted {
            Ok(result) => self.journal.record_completed(&batch, result),
            Err(err) => self.journal.record_failed(&batch, err),
        }
        self.flush_journal();

        let result = submitted?;
        Ok(BatchReport::new(&validation, result))
    }

    fn flush_journal(&self) {
        if let Err(err) = self.journal.flush() {
            warn!(?err, "failed to flush run journal");
        }
    }
}

fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,lead_console=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
