//! Background merge worker.
//!
//! One named thread drains a FIFO of merge jobs. Jobs are never cancelled:
//! shutdown is queued behind whatever was submitted before it and is
//! acknowledged once the worker has finished them.

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use duotrack_common::error::{codes, DuotrackError, DuotrackResult};
use duotrack_media_core::MediaBackend;
use tokio::sync::mpsc;

use crate::merger::{try_merge, MergeStats};

/// Inputs and destination of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
}

/// Result handed to a job's callback.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub job: MergeJob,
    /// [`codes::OK`] or the merge failure code.
    pub code: i32,
    pub stats: Option<MergeStats>,
    pub message: Option<String>,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        self.code == codes::OK
    }
}

pub type MergeCallback = Box<dyn FnOnce(MergeOutcome) + Send>;

enum WorkerCommand {
    Merge { job: MergeJob, callback: MergeCallback },
    Shutdown { ack: std_mpsc::SyncSender<()> },
}

/// Handle to the merge thread.
pub struct MergeWorker {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl MergeWorker {
    /// Spawn the worker thread.
    pub fn spawn(backend: Arc<dyn MediaBackend>) -> DuotrackResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("duotrack-merge".to_string())
            .spawn(move || run(backend, rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Queue a merge. `callback` runs on the worker thread.
    pub fn submit(
        &self,
        job: MergeJob,
        callback: impl FnOnce(MergeOutcome) + Send + 'static,
    ) -> DuotrackResult<()> {
        self.tx
            .send(WorkerCommand::Merge {
                job,
                callback: Box::new(callback),
            })
            .map_err(|_| DuotrackError::merge(codes::MERGE_IO, "merge worker has shut down"))
    }

    /// Finish queued jobs, stop the thread and wait for it.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        if self.tx.send(WorkerCommand::Shutdown { ack: ack_tx }).is_ok() {
            let _ = ack_rx.recv();
        }
        if handle.join().is_err() {
            tracing::error!("Merge worker panicked");
        }
    }
}

impl Drop for MergeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(backend: Arc<dyn MediaBackend>, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    tracing::debug!(backend = backend.name(), "Merge worker started");
    while let Some(command) = rx.blocking_recv() {
        match command {
            WorkerCommand::Merge { job, callback } => {
                let outcome = match try_merge(
                    backend.as_ref(),
                    &job.video_path,
                    &job.audio_path,
                    &job.output_path,
                ) {
                    Ok(stats) => MergeOutcome {
                        job,
                        code: codes::OK,
                        stats: Some(stats),
                        message: None,
                    },
                    Err(e) => MergeOutcome {
                        job,
                        code: e.code(),
                        stats: None,
                        message: Some(e.to_string()),
                    },
                };
                tracing::info!(
                    output = %outcome.job.output_path.display(),
                    code = outcome.code,
                    "Merge job done"
                );
                callback(outcome);
            }
            WorkerCommand::Shutdown { ack } => {
                let _ = ack.send(());
                break;
            }
        }
    }
    tracing::debug!("Merge worker stopped");
}
