//! Per-session start and finish barriers.

use duotrack_media_core::TrackType;

use crate::session::RecordInfo;

/// Counts "started" signals. Releases once, when every enabled track has
/// started, in whatever order they arrive.
#[derive(Debug, Clone)]
pub struct StartBarrier {
    audio_enabled: bool,
    video: bool,
    audio: bool,
    released: bool,
}

impl StartBarrier {
    pub fn new(audio_enabled: bool) -> Self {
        Self {
            audio_enabled,
            video: false,
            audio: false,
            released: false,
        }
    }

    pub fn required(&self) -> usize {
        if self.audio_enabled {
            2
        } else {
            1
        }
    }

    pub fn arrived(&self) -> usize {
        self.video as usize + (self.audio_enabled && self.audio) as usize
    }

    /// Record a start. Returns true for exactly the call that releases.
    pub fn arrive(&mut self, track: TrackType) -> bool {
        match track {
            TrackType::Video => self.video = true,
            TrackType::Audio => self.audio = true,
        }
        if !self.released && self.arrived() == self.required() {
            self.released = true;
            return true;
        }
        false
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Reports of all enabled tracks, handed out once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FinishedTracks {
    pub video: Option<RecordInfo>,
    pub audio: Option<RecordInfo>,
}

impl FinishedTracks {
    pub fn iter(&self) -> impl Iterator<Item = &RecordInfo> {
        self.video.iter().chain(self.audio.iter())
    }

    pub fn any_failed(&self) -> bool {
        self.iter().any(|info| info.failed)
    }
}

/// Holds finish reports until every enabled track has reported.
#[derive(Debug, Clone)]
pub struct FinishBarrier {
    audio_enabled: bool,
    video: Option<Option<RecordInfo>>,
    audio: Option<Option<RecordInfo>>,
    released: bool,
}

impl FinishBarrier {
    pub fn new(audio_enabled: bool) -> Self {
        Self {
            audio_enabled,
            video: None,
            audio: None,
            released: false,
        }
    }

    /// Record a finish report (`None` when the track produced nothing).
    /// Returns the collected reports for exactly the call that releases.
    pub fn arrive(&mut self, track: TrackType, info: Option<RecordInfo>) -> Option<FinishedTracks> {
        if self.released {
            return None;
        }
        match track {
            TrackType::Video if self.video.is_none() => self.video = Some(info),
            TrackType::Audio if self.audio_enabled && self.audio.is_none() => {
                self.audio = Some(info)
            }
            _ => {
                tracing::debug!(%track, "Ignoring duplicate or unexpected finish report");
                return None;
            }
        }
        let complete = self.video.is_some() && (!self.audio_enabled || self.audio.is_some());
        if !complete {
            return None;
        }
        self.released = true;
        Some(FinishedTracks {
            video: self.video.take().flatten(),
            audio: self.audio.take().flatten(),
        })
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(track: TrackType) -> RecordInfo {
        RecordInfo {
            file_path: format!("/tmp/{track}.tmp").into(),
            duration_us: 3_000_000,
            track_type: track,
            failed: false,
        }
    }

    #[test]
    fn video_only_start_releases_on_first_video() {
        let mut barrier = StartBarrier::new(false);
        assert_eq!(barrier.required(), 1);
        assert!(barrier.arrive(TrackType::Video));
        assert!(!barrier.arrive(TrackType::Video));
        assert!(barrier.is_released());
    }

    #[test]
    fn audio_enabled_start_needs_both() {
        let mut barrier = StartBarrier::new(true);
        assert!(!barrier.arrive(TrackType::Audio));
        assert!(!barrier.arrive(TrackType::Audio));
        assert!(!barrier.is_released());
        assert!(barrier.arrive(TrackType::Video));
    }

    proptest! {
        #[test]
        fn start_barrier_fires_exactly_once_in_any_order(
            arrivals in prop::collection::vec(prop::bool::ANY, 1..12),
        ) {
            let mut barrier = StartBarrier::new(true);
            let mut fired = 0;
            let mut seen_video = false;
            let mut seen_audio = false;
            for is_video in arrivals {
                let track = if is_video { TrackType::Video } else { TrackType::Audio };
                seen_video |= is_video;
                seen_audio |= !is_video;
                if barrier.arrive(track) {
                    fired += 1;
                    prop_assert!(seen_video && seen_audio);
                }
            }
            prop_assert_eq!(fired, (seen_video && seen_audio) as usize);
        }
    }

    #[test]
    fn finish_barrier_holds_first_report() {
        let mut barrier = FinishBarrier::new(true);
        assert!(barrier
            .arrive(TrackType::Audio, Some(info(TrackType::Audio)))
            .is_none());
        assert!(!barrier.is_released());
        let done = barrier
            .arrive(TrackType::Video, Some(info(TrackType::Video)))
            .unwrap();
        assert_eq!(done.video.unwrap().track_type, TrackType::Video);
        assert_eq!(done.audio.unwrap().track_type, TrackType::Audio);
        assert!(barrier
            .arrive(TrackType::Video, Some(info(TrackType::Video)))
            .is_none());
    }

    #[test]
    fn video_only_finish_releases_immediately() {
        let mut barrier = FinishBarrier::new(false);
        let done = barrier.arrive(TrackType::Video, None).unwrap();
        assert!(done.video.is_none());
        assert!(barrier.is_released());
    }

    #[test]
    fn audio_report_is_ignored_when_audio_disabled() {
        let mut barrier = FinishBarrier::new(false);
        assert!(barrier
            .arrive(TrackType::Audio, Some(info(TrackType::Audio)))
            .is_none());
        let done = barrier
            .arrive(TrackType::Video, Some(info(TrackType::Video)))
            .unwrap();
        assert!(done.audio.is_none());
    }

    #[test]
    fn failed_tracks_are_detected() {
        let mut failed = info(TrackType::Video);
        failed.failed = true;
        let tracks = FinishedTracks {
            video: Some(failed),
            audio: Some(info(TrackType::Audio)),
        };
        assert!(tracks.any_failed());
    }
}
