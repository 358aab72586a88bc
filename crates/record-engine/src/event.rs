//! Events reported by the pipelines and by the recorder.

use std::fmt;
use std::sync::Arc;

use duotrack_common::error::{codes, DuotrackError};
use duotrack_media_core::TrackType;
use serde::{Deserialize, Serialize};

use crate::session::{MediaInfo, RecordInfo, SessionId};

/// Failure category surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An encoder could not be opened; the recorder is armed for a retry.
    Configuration,
    /// A pipeline aborted mid-session; intermediates are kept.
    Runtime,
    /// Remuxing failed; intermediates are kept.
    Merge,
    /// The video file could not be moved to the output path.
    Relocation,
    /// The session produced no video.
    NoMedia,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub kind: FailureKind,
    pub code: i32,
    pub message: String,
}

impl RecordFailure {
    pub fn new(kind: FailureKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn no_media() -> Self {
        Self::new(
            FailureKind::NoMedia,
            codes::NO_MEDIA,
            DuotrackError::NoMedia.to_string(),
        )
    }
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failure ({}): {}", self.kind, self.code, self.message)
    }
}

/// What a [`MediaRecorder`](crate::MediaRecorder) reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecorderEvent {
    /// Every enabled pipeline has started; frames are being accepted.
    Started,
    /// Recorded video duration so far.
    Progress { duration_us: i64 },
    /// One pipeline finished.
    TrackFinished(RecordInfo),
    /// The session produced its artifact.
    Finished(MediaInfo),
    Failed(RecordFailure),
}

/// Pipeline to orchestrator report.
#[derive(Debug)]
pub(crate) enum PipelineEvent {
    Started {
        track: TrackType,
    },
    StartFailed {
        track: TrackType,
        error: DuotrackError,
    },
    Progress {
        duration_us: i64,
    },
    /// `None` when the pipeline was stopped before it started.
    Finished {
        track: TrackType,
        info: Option<RecordInfo>,
    },
}

/// Stamps pipeline events with their session and hands them on.
#[derive(Clone)]
pub(crate) struct Reporter {
    session: SessionId,
    sink: Arc<dyn Fn(SessionId, PipelineEvent) + Send + Sync>,
}

impl Reporter {
    pub fn new(
        session: SessionId,
        sink: impl Fn(SessionId, PipelineEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            session,
            sink: Arc::new(sink),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn report(&self, event: PipelineEvent) {
        (self.sink)(self.session, event);
    }
}
