//! Error types shared across duotrack crates.

use std::path::PathBuf;

/// Numeric result codes surfaced to callers alongside failure messages.
pub mod codes {
    /// Operation completed.
    pub const OK: i32 = 0;
    /// A demuxer, muxer or file operation failed during a merge.
    pub const MERGE_IO: i32 = -1;
    /// The audio input of a merge holds no audio track.
    pub const MERGE_MISSING_AUDIO: i32 = -2;
    /// The video input of a merge holds no video track.
    pub const MERGE_MISSING_VIDEO: i32 = -3;
    /// An encoder could not be configured with the requested parameters.
    pub const CONFIGURATION: i32 = -100;
    /// An encoder failed while a session was running.
    pub const RUNTIME: i32 = -200;
    /// The finished video file could not be moved to its final location.
    pub const RELOCATION: i32 = -300;
    /// The session ended without the video track producing anything.
    pub const NO_MEDIA: i32 = -999;
}

/// Top-level error type for duotrack operations.
#[derive(Debug, thiserror::Error)]
pub enum DuotrackError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Container error: {message}")]
    Container { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Graphics error: {message}")]
    Graphics { message: String },

    #[error("Merge error ({code}): {message}")]
    Merge { code: i32, message: String },

    #[error("No media was produced for this session")]
    NoMedia,

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DuotrackError.
pub type DuotrackResult<T> = Result<T, DuotrackError>;

impl DuotrackError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn graphics(msg: impl Into<String>) -> Self {
        Self::Graphics {
            message: msg.into(),
        }
    }

    pub fn merge(code: i32, msg: impl Into<String>) -> Self {
        Self::Merge {
            code,
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Numeric code reported to callers for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => codes::CONFIGURATION,
            Self::Merge { code, .. } => *code,
            Self::NoMedia => codes::NO_MEDIA,
            Self::FileNotFound { .. } | Self::Io(_) => codes::MERGE_IO,
            _ => codes::RUNTIME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_errors_keep_their_code() {
        let err = DuotrackError::merge(codes::MERGE_MISSING_AUDIO, "no audio track");
        assert_eq!(err.code(), -2);
        assert!(err.to_string().contains("no audio track"));
    }

    #[test]
    fn no_media_has_distinct_code() {
        assert_eq!(DuotrackError::NoMedia.code(), codes::NO_MEDIA);
        assert_ne!(
            DuotrackError::NoMedia.code(),
            DuotrackError::configuration("x").code()
        );
    }
}
