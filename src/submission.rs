use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::normalize::{normalize, LeadRecord};
use crate::validation::BatchRequest;

/// Coarse, observational progress of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    Sending,
    AwaitingWorkflow,
    Formatting,
    Done,
}

impl SubmissionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionPhase::Sending => "Sending batch",
            SubmissionPhase::AwaitingWorkflow => "Waiting for workflow",
            SubmissionPhase::Formatting => "Formatting results",
            SubmissionPhase::Done => "Done",
        }
    }

    pub fn progress_percent(&self) -> u8 {
        match self {
            SubmissionPhase::Sending => 0,
            SubmissionPhase::AwaitingWorkflow => 25,
            SubmissionPhase::Formatting => 75,
            SubmissionPhase::Done => 100,
        }
    }
}

pub type PhaseObserver = Arc<dyn Fn(SubmissionPhase) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Success,
    PartialFailure,
    TotalFailure,
}

impl BatchOutcome {
    /// Decided from how many array elements had to be dropped.
    pub(crate) fn classify(records: usize, dropped: usize) -> Self {
        match (records, dropped) {
            (_, 0) => BatchOutcome::Success,
            (0, _) => BatchOutcome::TotalFailure,
            _ => BatchOutcome::PartialFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Success => "success",
            BatchOutcome::PartialFailure => "partial_failure",
            BatchOutcome::TotalFailure => "total_failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub records: Vec<LeadRecord>,
    pub elapsed_millis: u64,
    pub outcome: BatchOutcome,
    pub dropped_elements: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchPayload<'a> {
    pub urls: &'a [String],
}

#[derive(Debug, Clone)]
pub struct WorkflowResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait WorkflowClient: Send + Sync {
    async fn post_batch(
        &self,
        endpoint_url: &str,
        payload: &BatchPayload<'_>,
        timeout: Duration,
    ) -> AppResult<WorkflowResponse>;
}

pub struct HttpWorkflowClient {
    http: Client,
}

impl HttpWorkflowClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl WorkflowClient for HttpWorkflowClient {
    async fn post_batch(
        &self,
        endpoint_url: &str,
        payload: &BatchPayload<'_>,
        timeout: Duration,
    ) -> AppResult<WorkflowResponse> {
        let timeout_ms = timeout.as_millis() as u64;
        let request = self.http.post(endpoint_url).json(payload).timeout(timeout);

        let exchange = async move {
            let response = request
                .send()
                .await
                .map_err(|err| transport_error(err, timeout_ms))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|err| transport_error(err, timeout_ms))?;
            Ok::<_, AppError>(WorkflowResponse {
                status,
                body: body.to_vec(),
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout { timeout_ms }),
        }
    }
}

fn transport_error(err: reqwest::Error, timeout_ms: u64) -> AppError {
    if err.is_timeout() {
        AppError::Timeout { timeout_ms }
    } else if err.is_builder() {
        AppError::InvalidEndpoint(err.to_string())
    } else {
        AppError::Connection(err.to_string())
    }
}

/// Owns the lifecycle of a batch call. One submission at a time; a second
/// caller waits for the first to settle. Never retries: the workflow may
/// write to an external sink on every invocation.
pub struct SubmissionCoordinator {
    transport: Arc<dyn WorkflowClient>,
    guard: AsyncMutex<()>,
}

impl SubmissionCoordinator {
    pub fn new(http: Client) -> Self {
        Self::with_transport(Arc::new(HttpWorkflowClient::new(http)))
    }

    pub fn with_transport(transport: Arc<dyn WorkflowClient>) -> Self {
        Self {
            transport,
            guard: AsyncMutex::new(()),
        }
    }

    pub async fn submit(
        &self,
        batch: &BatchRequest,
        endpoint_url: &str,
        timeout_ms: u64,
        observer: Option<PhaseObserver>,
    ) -> AppResult<BatchResult> {
        if batch.is_empty() {
            return Err(AppError::ValidationEmpty {
                invalid: Vec::new(),
            });
        }

        let _in_flight = self.guard.lock().await;
        let notify = |phase: SubmissionPhase| {
            if let Some(callback) = &observer {
                callback(phase);
            }
        };

        notify(SubmissionPhase::Sending);
        let payload = BatchPayload {
            urls: batch.identifiers(),
        };
        let timeout = Duration::from_millis(timeout_ms.max(1));
        info!(
            identifier_count = batch.len(),
            timeout_ms, "submitting batch to automation workflow"
        );

        let started = Instant::now();
        let exchange = self.transport.post_batch(endpoint_url, &payload, timeout);
        notify(SubmissionPhase::AwaitingWorkflow);
        let response = match exchange.await {
            Ok(response) => response,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "batch submission failed");
                return Err(err);
            }
        };
        let elapsed_millis = started.elapsed().as_millis() as u64;

        if response.status != 200 {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            warn!(
                status = response.status,
                elapsed_ms = elapsed_millis,
                "automation workflow returned an error status"
            );
            return Err(AppError::Server {
                status: response.status,
                body,
            });
        }

        let raw: Value = serde_json::from_slice(&response.body).map_err(|err| {
            warn!(error = %err, "automation workflow returned a non-JSON body");
            AppError::MalformedResponse {
                body: String::from_utf8_lossy(&response.body).into_owned(),
                reason: err.to_string(),
            }
        })?;

        notify(SubmissionPhase::Formatting);
        let leads = normalize(raw)?;
        let outcome = BatchOutcome::classify(leads.records.len(), leads.dropped_elements);
        if leads.dropped_elements > 0 {
            warn!(
                dropped = leads.dropped_elements,
                "workflow response contained non-object elements"
            );
        }
        debug!(
            records = leads.records.len(),
            elapsed_ms = elapsed_millis,
            outcome = outcome.as_str(),
            "batch normalized"
        );
        notify(SubmissionPhase::Done);

        Ok(BatchResult {
            records: leads.records,
            elapsed_millis,
            outcome,
            dropped_elements: leads.dropped_elements,
        })
    }
}
