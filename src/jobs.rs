//! Job table for the broker.
//!
//! Jobs move `pending → processing → done`. The [`JobStore`] trait is the
//! only way the broker touches job state, so the in-memory table can be
//! replaced by a durable queue without changing the routes.
//!
//! [`InMemoryJobStore`] keeps everything behind one `Mutex`: every
//! transition is a short read-modify-write, and a claim both pops the
//! pending queue and marks the job in the same critical section, so two
//! concurrent pulls can never receive the same job.
//!
//! With a TTL set, finished jobs and their artifacts are swept on every
//! `create` and claim once they have sat in `done` for longer than the
//! TTL. Unfinished jobs are never swept.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Search,
    ExpandBullet,
}

/// What a client asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub query: String,
    pub top_k: usize,
    #[serde(default)]
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<i64>,
    #[serde(default)]
    pub reformulate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(flatten)]
    pub spec: JobSpec,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A claimed job as handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub spec: JobSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub etag: String,
    pub filename: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("missing result")]
    MissingResult,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, spec: JobSpec) -> Job;

    /// Claim one pending job (oldest first) and mark it `processing`.
    /// `None` when nothing is pending.
    async fn claim_next_pending(&self) -> Option<JobDescriptor>;

    /// Mark a job `done` with its result.
    async fn complete(&self, id: &str, result: Option<Value>) -> Result<(), JobError>;

    async fn get(&self, id: &str) -> Option<Job>;

    /// Store a binary artifact for `(job, document)`; returns its ETag.
    async fn put_artifact(
        &self,
        id: &str,
        document_id: i64,
        bytes: Vec<u8>,
        filename: Option<String>,
    ) -> Result<String, JobError>;

    async fn artifact(&self, id: &str, document_id: i64) -> Option<Artifact>;
}

#[derive(Default)]
struct Table {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
    artifacts: HashMap<(String, i64), Artifact>,
}

impl Table {
    /// Drop `done` jobs last updated before `cutoff`, with their artifacts.
    fn evict_done_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| job.status != JobStatus::Done || job.updated_at >= cutoff);
        let jobs = &self.jobs;
        self.artifacts.retain(|(id, _), _| jobs.contains_key(id));
        before - self.jobs.len()
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    table: Mutex<Table>,
    ttl: Option<TimeDelta>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that forgets finished jobs `ttl` after completion.
    /// A zero `ttl` keeps everything.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            table: Mutex::default(),
            ttl: (!ttl.is_zero())
                .then(|| TimeDelta::from_std(ttl).ok())
                .flatten(),
        }
    }

    fn sweep(&self, table: &mut Table) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let evicted = table.evict_done_before(Utc::now() - ttl);
        if evicted > 0 {
            debug!(evicted, remaining = table.jobs.len(), "expired jobs dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock cannot leave a job half-updated:
        // every transition is a single assignment.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, spec: JobSpec) -> Job {
        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            spec,
            status: JobStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        };
        let mut table = self.lock();
        self.sweep(&mut table);
        table.pending.push_back(job.id.clone());
        table.jobs.insert(job.id.clone(), job.clone());
        job
    }

    async fn claim_next_pending(&self) -> Option<JobDescriptor> {
        let mut table = self.lock();
        self.sweep(&mut table);
        while let Some(id) = table.pending.pop_front() {
            if let Some(job) = table.jobs.get_mut(&id) {
                if job.status != JobStatus::Pending {
                    continue;
                }
                job.status = JobStatus::Processing;
                job.updated_at = Utc::now();
                return Some(JobDescriptor {
                    id: job.id.clone(),
                    status: job.status,
                    spec: job.spec.clone(),
                });
            }
        }
        None
    }

    async fn complete(&self, id: &str, result: Option<Value>) -> Result<(), JobError> {
        let mut table = self.lock();
        let job = table
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let result = result.filter(|r| !r.is_null()).ok_or(JobError::MissingResult)?;
        job.status = JobStatus::Done;
        job.result = Some(result);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: &str) -> Option<Job> {
        self.lock().jobs.get(id).cloned()
    }

    async fn put_artifact(
        &self,
        id: &str,
        document_id: i64,
        bytes: Vec<u8>,
        filename: Option<String>,
    ) -> Result<String, JobError> {
        let mut table = self.lock();
        if !table.jobs.contains_key(id) {
            return Err(JobError::NotFound(id.to_string()));
        }
        let etag = sha256_hex(&bytes);
        table.artifacts.insert(
            (id.to_string(), document_id),
            Artifact {
                bytes,
                etag: etag.clone(),
                filename,
            },
        );
        Ok(etag)
    }

    async fn artifact(&self, id: &str, document_id: i64) -> Option<Artifact> {
        self.lock()
            .artifacts
            .get(&(id.to_string(), document_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn spec(query: &str) -> JobSpec {
        JobSpec {
            query: query.to_string(),
            top_k: 5,
            job_type: JobType::Search,
            doc_id: None,
            reformulate: false,
            parent_query: None,
        }
    }

    #[tokio::test]
    async fn lifecycle() {
        let store = InMemoryJobStore::new();
        let job = store.create(spec("JBH margins")).await;
        assert_eq!(job.status, JobStatus::Pending);

        let claimed = store.claim_next_pending().await.unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(store.claim_next_pending().await.is_none());
        assert_eq!(store.get(&job.id).await.unwrap().result, None);

        store
            .complete(&job.id, Some(json!({"summary": "- ok"})))
            .await
            .unwrap();
        let done = store.get(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.result.unwrap()["summary"], "- ok");
    }

    #[tokio::test]
    async fn claims_in_submission_order() {
        let store = InMemoryJobStore::new();
        let a = store.create(spec("a")).await;
        let b = store.create(spec("b")).await;
        assert_eq!(store.claim_next_pending().await.unwrap().id, a.id);
        assert_eq!(store.claim_next_pending().await.unwrap().id, b.id);
    }

    #[tokio::test]
    async fn complete_errors() {
        let store = InMemoryJobStore::new();
        assert_eq!(
            store.complete("nope", Some(json!({}))).await,
            Err(JobError::NotFound("nope".into()))
        );
        let job = store.create(spec("q")).await;
        assert_eq!(store.complete(&job.id, None).await, Err(JobError::MissingResult));
        assert_eq!(
            store.complete(&job.id, Some(Value::Null)).await,
            Err(JobError::MissingResult)
        );
    }

    #[tokio::test]
    async fn concurrent_pulls_never_share_a_job() {
        let store = Arc::new(InMemoryJobStore::new());
        for i in 0..20 {
            store.create(spec(&format!("q{}", i))).await;
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store.claim_next_pending().await {
                    mine.push(job.id);
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[tokio::test]
    async fn artifacts_are_keyed_by_job_and_document() {
        let store = InMemoryJobStore::new();
        let job = store.create(spec("q")).await;
        let etag = store
            .put_artifact(&job.id, 7, b"%PDF-1.4".to_vec(), Some("a.pdf".into()))
            .await
            .unwrap();
        assert_eq!(etag, sha256_hex(b"%PDF-1.4"));
        assert_eq!(store.artifact(&job.id, 7).await.unwrap().bytes, b"%PDF-1.4");
        assert!(store.artifact(&job.id, 8).await.is_none());
        assert!(store.put_artifact("nope", 7, vec![], None).await.is_err());
    }

    #[tokio::test]
    async fn finished_jobs_expire_with_their_artifacts() {
        let store = InMemoryJobStore::with_ttl(Duration::from_millis(20));
        let done = store.create(spec("done")).await;
        let waiting = store.create(spec("waiting")).await;
        assert_eq!(store.claim_next_pending().await.unwrap().id, done.id);
        store.complete(&done.id, Some(json!({}))).await.unwrap();
        store
            .put_artifact(&done.id, 1, b"%PDF".to_vec(), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        store.create(spec("later")).await;

        assert!(store.get(&done.id).await.is_none());
        assert!(store.artifact(&done.id, 1).await.is_none());
        assert_eq!(
            store.get(&waiting.id).await.unwrap().status,
            JobStatus::Pending
        );
    }

    #[tokio::test]
    async fn zero_ttl_keeps_finished_jobs() {
        let store = InMemoryJobStore::with_ttl(Duration::ZERO);
        let job = store.create(spec("q")).await;
        store.claim_next_pending().await.unwrap();
        store.complete(&job.id, Some(json!({}))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.create(spec("later")).await;
        assert!(store.get(&job.id).await.is_some());
    }

    #[test]
    fn descriptor_wire_shape() {
        let d = JobDescriptor {
            id: "abc".into(),
            status: JobStatus::Processing,
            spec: JobSpec {
                job_type: JobType::ExpandBullet,
                doc_id: Some(4),
                ..spec("bullet")
            },
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["status"], "processing");
        assert_eq!(v["job_type"], "expand_bullet");
        assert_eq!(v["doc_id"], 4);
        assert_eq!(v["query"], "bullet");
    }
}
