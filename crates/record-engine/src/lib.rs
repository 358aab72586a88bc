//! duotrack Record Engine
//!
//! Runs a video pipeline and an audio pipeline side by side, each on its
//! own actor thread with its own encoder and intermediate file, then hands
//! both files to the merge worker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    MediaRecorder                     │
//! │        event loop · start/finish barriers            │
//! │  ┌─────────────────┐        ┌─────────────────────┐  │
//! │  │ VideoPipeline   │        │ AudioPipeline       │  │
//! │  │ texture → AVC   │        │ PCM → speed → AAC   │  │
//! │  └────────┬────────┘        └──────────┬──────────┘  │
//! │           ▼                            ▼             │
//! │      video.tmp                    audio.tmp          │
//! │           └────────────┬───────────────┘             │
//! │                        ▼                             │
//! │                  MergeWorker → output                │
//! └──────────────────────────────────────────────────────┘
//! ```

mod actor;
pub mod audio;
pub mod barrier;
pub mod event;
pub mod recorder;
pub mod session;
mod track;
pub mod transcoder;
pub mod video;

pub use actor::PipelineStatus;
pub use barrier::{FinishBarrier, FinishedTracks, StartBarrier};
pub use event::{FailureKind, RecordFailure, RecorderEvent};
pub use recorder::{MediaRecorder, RecorderState};
pub use session::{
    AudioParams, MediaInfo, RecordInfo, RecordingSession, SessionId, SpeedMode, VideoParams,
};
pub use transcoder::SpeedTranscoder;
pub use video::{frame_interval_us, frame_timestamp_ns, FRAME_RATE};
