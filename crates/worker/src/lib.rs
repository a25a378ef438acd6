//! Background job execution.
//!
//! The API enqueues [`Job`]s on an in-process queue; [`run_loop`] drains it
//! and hands each job to the [`JobRunner`], which owns the shared services
//! (registry client, tenant session manager, face matcher, SMS sender).
//! Jobs are tenant-addressed: each one re-resolves its tenant slug so a
//! registry change between enqueue and execution is honored.

mod message;
mod recognition;
mod rule;
mod runner;
#[cfg(test)]
mod testutil;

pub use runner::JobRunner;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Registry(#[from] registry::RegistryError),

    #[error(transparent)]
    TenantDb(#[from] tenant_db::TenantDbError),

    #[error(transparent)]
    Database(#[from] database::DatabaseError),

    #[error(transparent)]
    Messaging(#[from] messaging::MessagingError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// One unit of background work.
#[derive(Debug)]
pub enum Job {
    /// Process an accepted gate frame: recognize, decide, record.
    Recognition {
        tenant_slug: String,
        frame_id: String,
        gate_id: String,
        captured_at: String,
        request_hash: String,
        job_id: String,
        image: Vec<u8>,
        session_id: Option<String>,
        face_present: Option<bool>,
        motion_score: Option<f64>,
    },
    /// Deliver one queued message log entry.
    SendMessage {
        tenant_slug: String,
        message_log_id: String,
        body: Option<String>,
    },
    /// Evaluate a rule against the tenant's data.
    RunRule {
        tenant_slug: String,
        rule_id: String,
        run_id: String,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Recognition { .. } => "recognition",
            Job::SendMessage { .. } => "send_message",
            Job::RunRule { .. } => "run_rule",
        }
    }

    fn tenant_slug(&self) -> &str {
        match self {
            Job::Recognition { tenant_slug, .. }
            | Job::SendMessage { tenant_slug, .. }
            | Job::RunRule { tenant_slug, .. } => tenant_slug,
        }
    }
}

/// Cloneable handle for enqueueing jobs.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn dispatch(&self, job: Job) {
        let kind = job.kind();
        if self.tx.send(job).is_err() {
            tracing::error!(job = kind, "job queue is closed, dropping job");
        }
    }
}

/// Drain the queue until every sender is dropped. A failed job is logged
/// and the loop continues; job bodies are responsible for leaving their
/// tenant database consistent on failure.
pub async fn run_loop(runner: std::sync::Arc<JobRunner>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let kind = job.kind();
        let slug = job.tenant_slug().to_string();
        if let Err(err) = runner.run(job).await {
            tracing::error!(job = kind, tenant = %slug, error = %err, "job failed");
        }
    }
    tracing::info!("job queue closed, worker loop exiting");
}
