//! AICF job queue contract and provider quota tracking.
//!
//! The core only depends on the `JobQueue` seam; scheduling, pricing, and
//! attestation live in the external compute framework. Job ids are the
//! deterministic digests from `animica-crypto`, so the same request enqueued
//! twice lands on the same id.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use animica_core::{to_hex, Address, Digest32, TxHash};
use animica_crypto::derive_job_id;

pub type JobId = Digest32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub chain_id: u64,
    pub height: u64,
    pub tx_hash: TxHash,
    pub caller: Address,
    pub payload: Vec<u8>,
}

impl JobSpec {
    pub fn id(&self) -> JobId {
        derive_job_id(self.chain_id, self.height, &self.tx_hash, &self.caller, &self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("unknown job {id}", id = to_hex(.0))]
    UnknownJob(JobId),
}

/// Seam consumed by execution when a transaction triggers off-chain compute.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: JobSpec) -> Result<JobId, QueueError>;
    fn poll(&self, id: &JobId) -> Option<JobStatus>;
    fn release(&self, id: &JobId);
}

/// Devnet queue: ids and statuses only, no actual compute.
#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<HashMap<JobId, JobStatus>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host-side hook: mark a leased job as running or finished.
    pub fn set_status(&self, id: &JobId, status: JobStatus) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(id) {
            Some(slot) => {
                *slot = status;
                Ok(())
            }
            None => Err(QueueError::UnknownJob(*id)),
        }
    }
}

impl JobQueue for InMemoryQueue {
    /// Enqueue is idempotent: the id is a pure function of the request, so a
    /// duplicate submit returns the existing id untouched.
    fn enqueue(&self, job: JobSpec) -> Result<JobId, QueueError> {
        let id = job.id();
        let mut jobs = self.jobs.lock();
        jobs.entry(id).or_insert(JobStatus::Queued);
        debug!(id = %to_hex(&id), "enqueued job");
        Ok(id)
    }

    fn poll(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.lock().get(id).cloned()
    }

    fn release(&self, id: &JobId) {
        self.jobs.lock().remove(id);
    }
}

/// Per-provider concurrency quota over active job ids. An id is never
/// double-counted and releasing an unknown id is a no-op.
pub struct QuotaTracker {
    default_concurrent: usize,
    active: Mutex<HashMap<String, HashSet<JobId>>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("provider {0} is at its concurrency limit ({1})")]
    Exhausted(String, usize),
}

impl QuotaTracker {
    pub fn new(default_concurrent: usize) -> Self {
        Self { default_concurrent: default_concurrent.max(1), active: Mutex::new(HashMap::new()) }
    }

    pub fn try_acquire(&self, provider: &str, id: JobId) -> Result<(), QuotaError> {
        let mut active = self.active.lock();
        let slots = active.entry(provider.to_string()).or_default();
        if slots.contains(&id) {
            return Ok(());
        }
        if slots.len() >= self.default_concurrent {
            return Err(QuotaError::Exhausted(provider.to_string(), self.default_concurrent));
        }
        slots.insert(id);
        Ok(())
    }

    pub fn release(&self, provider: &str, id: &JobId) {
        let mut active = self.active.lock();
        if let Some(slots) = active.get_mut(provider) {
            slots.remove(id);
            if slots.is_empty() {
                active.remove(provider);
            }
        }
    }

    pub fn active_count(&self, provider: &str) -> usize {
        self.active.lock().get(provider).map_or(0, HashSet::len)
    }
}
