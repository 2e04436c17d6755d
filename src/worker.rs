//! Pull-based worker.
//!
//! A worker claims one job at a time from the broker, runs it through the
//! [`Pipeline`] and posts the result back. Every claimed job is completed,
//! failures included: the result is then error-shaped (see
//! [`BriefPayload::failed`]) so polling clients always reach `done`.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::jobs::{JobDescriptor, JobType};
use crate::links::prefer_pdf;
use crate::models::BriefPayload;
use crate::pipeline::Pipeline;
use crate::server::MAX_ARTIFACT_BYTES;

/// HTTP client for the broker's admin routes.
pub struct BrokerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl BrokerClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_retries: 4,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Claim the next pending job; `None` when the broker is idle.
    pub async fn next_job(&self) -> Result<Option<JobDescriptor>> {
        let resp = self
            .client
            .get(format!("{}/api/admin/next_job", self.base_url))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .context("Failed to reach broker")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("next_job failed ({}): {}", status, body);
        }

        let body: Value = resp.json().await?;
        if body.get("id").map_or(true, Value::is_null) {
            return Ok(None);
        }
        let descriptor = serde_json::from_value(body).context("Malformed job descriptor")?;
        Ok(Some(descriptor))
    }

    /// Post a job result. Network errors, 429 and 5xx are retried with
    /// exponential backoff; any other status fails at once.
    pub async fn complete(&self, job_id: &str, result: &Value) -> Result<()> {
        let body = serde_json::json!({ "result": result });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ... capped at 32s
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/admin/job/{}/complete", self.base_url, job_id))
                .header("x-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(job_id, attempt, %status, "complete rejected, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "complete failed for job {} ({}): {}",
                            job_id,
                            status,
                            text
                        ));
                        continue;
                    }
                    anyhow::bail!("complete failed for job {} ({}): {}", job_id, status, text);
                }
                Err(e) => {
                    warn!(job_id, attempt, error = %e, "broker unreachable, retrying");
                    last_err = Some(anyhow::Error::new(e).context("Failed to reach broker"));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("complete failed for job {}", job_id)))
    }

    pub async fn upload_artifact(&self, job_id: &str, document_id: i64, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes.len() > MAX_ARTIFACT_BYTES {
            anyhow::bail!(
                "{} is {} bytes, over the {} byte upload limit",
                path.display(),
                bytes.len(),
                MAX_ARTIFACT_BYTES
            );
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .text("doc_id", document_id.to_string())
            .part("file", part);

        let resp = self
            .client
            .post(format!("{}/api/admin/job/{}/artifact", self.base_url, job_id))
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to reach broker")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("artifact upload failed ({}): {}", status, body);
        }
        Ok(())
    }
}

/// Run one job descriptor to a result value. Never fails.
pub async fn process_job(pipeline: &Pipeline, job: &JobDescriptor) -> Value {
    let payload = match job.spec.job_type {
        JobType::Search => match pipeline
            .search(
                &job.spec.query,
                Some(job.spec.top_k),
                job.spec.reformulate,
                Some(&job.id),
            )
            .await
        {
            Ok(Some(payload)) => payload,
            Ok(None) => BriefPayload::failed("no documents found for query"),
            Err(e) => {
                warn!(job_id = %job.id, error = %format!("{:#}", e), "search failed");
                BriefPayload::failed(format!("{:#}", e))
            }
        },
        JobType::ExpandBullet => match job.spec.doc_id {
            None => BriefPayload::failed("expand_bullet requires doc_id"),
            Some(doc_id) => match pipeline
                .expand_bullet(
                    doc_id,
                    &job.spec.query,
                    job.spec.parent_query.as_deref(),
                    Some(&job.id),
                )
                .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(job_id = %job.id, error = %format!("{:#}", e), "expand failed");
                    BriefPayload::failed(format!("{:#}", e))
                }
            },
        },
    };

    serde_json::to_value(&payload).unwrap_or_else(|e| {
        serde_json::json!({ "error": format!("result serialization failed: {}", e) })
    })
}

pub struct Worker {
    client: BrokerClient,
    pipeline: Pipeline,
    upload_artifacts: bool,
}

impl Worker {
    pub fn new(client: BrokerClient, pipeline: Pipeline, upload_artifacts: bool) -> Self {
        Self {
            client,
            pipeline,
            upload_artifacts,
        }
    }

    /// Pull and finish at most one job. Returns the job id, or `None`
    /// when the broker had nothing pending.
    pub async fn run_once(&self) -> Result<Option<String>> {
        let Some(job) = self.client.next_job().await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, job_type = ?job.spec.job_type, "processing job");

        let result = process_job(&self.pipeline, &job).await;
        if self.upload_artifacts && job.spec.job_type == JobType::Search {
            self.upload_sources(&job.id, &result).await;
        }
        self.client.complete(&job.id, &result).await?;
        info!(job_id = %job.id, "job done");
        Ok(Some(job.id))
    }

    async fn upload_sources(&self, job_id: &str, result: &Value) {
        let Some(sources) = result.get("sources").and_then(Value::as_array) else {
            return;
        };
        for source in sources {
            let Some(document_id) = source.get("document_id").and_then(Value::as_i64) else {
                continue;
            };
            let path = source
                .get("source_path")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if path.is_empty() {
                continue;
            }
            let pdf = prefer_pdf(path);
            if !Path::new(&pdf).is_file() {
                debug!(document_id, path = %pdf, "no PDF next to source");
                continue;
            }
            if let Err(e) = self
                .client
                .upload_artifact(job_id, document_id, Path::new(&pdf))
                .await
            {
                warn!(job_id, document_id, error = %format!("{:#}", e), "artifact upload failed");
            }
        }
    }
}

/// Poll the broker until interrupted.
pub async fn run_worker(config: &Config, pipeline: Pipeline) -> Result<()> {
    let Some(api_key) = config.broker.resolved_admin_key() else {
        anyhow::bail!("No admin key configured: set [broker].admin_key or BRIEF_ADMIN_KEY");
    };
    let client = BrokerClient::new(
        &config.worker.broker_url,
        &api_key,
        Duration::from_secs(config.worker.request_timeout_secs),
    )?
    .with_max_retries(config.worker.complete_retries);
    let worker = Worker::new(client, pipeline, config.worker.upload_artifacts);
    let idle = Duration::from_secs(config.worker.poll_interval_secs);
    let backoff = Duration::from_secs(config.worker.error_backoff_secs);

    info!(broker = %config.worker.broker_url, "worker started");
    println!("Worker polling {}", config.worker.broker_url);

    loop {
        let pause = match worker.run_once().await {
            Ok(Some(_)) => Duration::ZERO,
            Ok(None) => idle,
            Err(e) => {
                error!(error = %format!("{:#}", e), "worker iteration failed");
                backoff
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("worker stopping");
                return Ok(());
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
