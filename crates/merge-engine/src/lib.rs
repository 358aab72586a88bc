//! duotrack Merge Engine
//!
//! Combines the audio-only and video-only intermediates of a recording
//! session into one container. Audio samples are copied with their own
//! timestamps; video samples are retimed at the track's frame rate.

pub mod merger;
pub mod worker;

pub use merger::{merge, try_merge, MergeStats};
pub use worker::{MergeCallback, MergeJob, MergeOutcome, MergeWorker};
