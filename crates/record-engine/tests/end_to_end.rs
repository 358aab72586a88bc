//! Full recording sessions against the software backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use duotrack_common::config::RecordingDefaults;
use duotrack_common::error::{codes, DuotrackResult};
use duotrack_media_core::{
    FileStore, GraphicsContext, LocalFileStore, MediaBackend, TextureId, TrackType,
};
use duotrack_media_soft::{FaultPlan, MicrophoneSignal, SoftwareBackend};
use duotrack_record_engine::{
    frame_interval_us, frame_timestamp_ns, AudioParams, FailureKind, MediaInfo, MediaRecorder,
    RecordFailure, RecordInfo, RecorderEvent, RecorderState, VideoParams,
};
use tokio::sync::mpsc::UnboundedReceiver;

const START_NS: i64 = 5_000_000_000;

struct Fixture {
    dir: tempfile::TempDir,
    backend: Arc<SoftwareBackend>,
    recorder: MediaRecorder,
    events: UnboundedReceiver<RecorderEvent>,
}

impl Fixture {
    fn new(backend: SoftwareBackend) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().join("out"), "bc_media_", ".mp4");
        Self::with_store(dir, backend, Arc::new(store))
    }

    fn with_store(
        dir: tempfile::TempDir,
        backend: SoftwareBackend,
        store: Arc<dyn FileStore>,
    ) -> Self {
        let backend = Arc::new(backend);
        let (recorder, events) =
            MediaRecorder::new(backend.clone(), store, &RecordingDefaults::default()).unwrap();
        Self {
            dir,
            backend,
            recorder,
            events,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn params(&self, tag: &str) -> (VideoParams, AudioParams) {
        let defaults = RecordingDefaults::default();
        let graphics: Arc<dyn GraphicsContext> = Arc::new(self.backend.graphics());
        (
            VideoParams::from_defaults(&defaults, graphics, self.path(&format!("video{tag}.tmp"))),
            AudioParams::from_defaults(&defaults, self.path(&format!("audio{tag}.tmp"))),
        )
    }

    fn next_event(&mut self) -> RecorderEvent {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            match self.events.try_recv() {
                Ok(event) => return event,
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("no recorder event: {e:?}"),
            }
        }
    }

    /// Skip progress reports.
    fn next_significant(&mut self) -> RecorderEvent {
        loop {
            match self.next_event() {
                RecorderEvent::Progress { .. } => {}
                event => return event,
            }
        }
    }

    fn wait_started(&mut self) {
        match self.next_significant() {
            RecorderEvent::Started => {}
            other => panic!("expected start, got {other:?}"),
        }
        assert!(self.recorder.is_recording());
    }

    /// Collect track reports up to the final outcome.
    fn wait_outcome(&mut self) -> (Vec<RecordInfo>, Result<MediaInfo, RecordFailure>) {
        let mut tracks = Vec::new();
        loop {
            match self.next_significant() {
                RecorderEvent::TrackFinished(info) => tracks.push(info),
                RecorderEvent::Finished(media) => return (tracks, Ok(media)),
                RecorderEvent::Failed(failure) => return (tracks, Err(failure)),
                RecorderEvent::Started => panic!("unexpected start"),
                RecorderEvent::Progress { .. } => unreachable!(),
            }
        }
    }

    fn feed_frames(&self, count: u64) {
        for i in 0..count {
            self.recorder
                .on_frame_available(TextureId(1), frame_timestamp_ns(START_NS, i));
        }
    }

    fn finish(mut self) {
        self.recorder.release();
        assert_eq!(self.recorder.state(), RecorderState::Idle);
        assert!(self.backend.ledger().snapshot().all_released());
    }
}

fn track<'a>(tracks: &'a [RecordInfo], track_type: TrackType) -> &'a RecordInfo {
    tracks
        .iter()
        .find(|t| t.track_type == track_type)
        .unwrap()
}

#[test]
fn three_second_session_is_merged_into_one_file() {
    let mut fx = Fixture::new(
        SoftwareBackend::new().with_microphone(MicrophoneSignal::silence(3_000_000)),
    );
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();

    fx.feed_frames(91);
    // Let the unpaced microphone deliver all of its PCM.
    std::thread::sleep(Duration::from_millis(300));
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    let media = outcome.unwrap();
    assert_eq!(tracks.len(), 2);
    let video = track(&tracks, TrackType::Video);
    let audio = track(&tracks, TrackType::Audio);
    assert_eq!(video.duration_us, 90 * frame_interval_us());
    assert!((audio.duration_us - 3_000_000).abs() <= 50_000, "{}", audio.duration_us);
    assert_eq!(media.duration_us, video.duration_us);

    assert!(media.file_path.exists());
    assert!(media.file_path.starts_with(fx.path("out")));
    assert!(!fx.path("video.tmp").exists());
    assert!(!fx.path("audio.tmp").exists());
    assert_eq!(fx.recorder.state(), RecorderState::Complete);

    let mut reader = fx.backend.open_reader(&media.file_path).unwrap();
    let kinds: Vec<_> = (0..reader.track_count())
        .filter_map(|i| reader.track_format(i).and_then(|f| f.track_type()))
        .collect();
    assert!(kinds.contains(&TrackType::Audio));
    assert!(kinds.contains(&TrackType::Video));
    reader.release();

    fx.finish();
}

#[test]
fn video_only_session_is_relocated() {
    let mut fx = Fixture::new(SoftwareBackend::new());
    fx.recorder.set_audio_enabled(false);
    assert!(!fx.recorder.audio_enabled());
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();

    fx.feed_frames(31);
    fx.recorder.stop_recording();
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    let media = outcome.unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_type, TrackType::Video);
    assert_eq!(media.duration_us, 30 * frame_interval_us());
    assert!(media.file_path.exists());
    assert!(!fx.path("video.tmp").exists());
    assert!(!fx.path("audio.tmp").exists());
    fx.finish();
}

#[test]
fn zero_timestamps_are_dropped() {
    let mut fx = Fixture::new(SoftwareBackend::new());
    fx.recorder.set_audio_enabled(false);
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();

    fx.recorder.on_frame_available(TextureId(1), 0);
    fx.feed_frames(3);
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    assert!(outcome.is_ok());
    assert_eq!(tracks[0].duration_us, 2 * frame_interval_us());
    fx.finish();
}

/// Hands out an output path the merger cannot create.
struct BlockedOutputStore {
    inner: LocalFileStore,
    blocked: PathBuf,
}

impl FileStore for BlockedOutputStore {
    fn make_output_path(&self) -> DuotrackResult<PathBuf> {
        Ok(self.blocked.join("final.mp4"))
    }

    fn relocate(&self, from: &Path, to: &Path) -> DuotrackResult<()> {
        self.inner.relocate(from, to)
    }

    fn delete(&self, path: &Path) -> DuotrackResult<()> {
        self.inner.delete(path)
    }
}

#[test]
fn merge_failure_preserves_intermediates() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("not-a-directory");
    std::fs::write(&blocked, b"occupied").unwrap();
    let store = BlockedOutputStore {
        inner: LocalFileStore::new(dir.path().join("out"), "bc_media_", ".mp4"),
        blocked,
    };
    let mut fx = Fixture::with_store(
        dir,
        SoftwareBackend::new().with_microphone(MicrophoneSignal::silence(1_000_000)),
        Arc::new(store),
    );
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();
    fx.feed_frames(30);
    std::thread::sleep(Duration::from_millis(200));
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    assert_eq!(tracks.len(), 2);
    let failure = outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::Merge);
    assert_eq!(failure.code, codes::MERGE_IO);
    assert!(fx.path("video.tmp").exists());
    assert!(fx.path("audio.tmp").exists());
    assert_eq!(fx.recorder.state(), RecorderState::Failed);
    fx.finish();
}

#[test]
fn configuration_failure_allows_a_retry() {
    let mut fx = Fixture::new(
        SoftwareBackend::new()
            .with_faults(FaultPlan {
                reject_video_config: true,
                ..FaultPlan::default()
            })
            .with_microphone(MicrophoneSignal::silence(1_000_000)),
    );
    let (video, audio) = fx.params("-1");
    fx.recorder.start_recording(video, audio);
    match fx.next_significant() {
        RecorderEvent::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Configuration);
            assert_eq!(failure.code, codes::CONFIGURATION);
        }
        other => panic!("expected configuration failure, got {other:?}"),
    }
    assert_eq!(fx.recorder.state(), RecorderState::Armed);
    // Frames are not accepted without a session.
    fx.feed_frames(5);

    fx.backend.set_faults(FaultPlan::default());
    let (video, audio) = fx.params("-2");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();
    fx.feed_frames(30);
    std::thread::sleep(Duration::from_millis(200));
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(track(&tracks, TrackType::Video).duration_us, 29 * frame_interval_us());
    fx.finish();
}

#[test]
fn session_without_frames_reports_no_media() {
    let mut fx = Fixture::new(SoftwareBackend::new());
    fx.recorder.set_audio_enabled(false);
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    assert!(tracks.is_empty());
    let failure = outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::NoMedia);
    assert_eq!(failure.code, codes::NO_MEDIA);
    assert_eq!(fx.recorder.state(), RecorderState::Failed);
    fx.finish();
}

#[test]
fn runtime_failure_keeps_files_and_reports_runtime_error() {
    let mut fx = Fixture::new(
        SoftwareBackend::new()
            .with_faults(FaultPlan {
                fail_video_after_frames: Some(3),
                ..FaultPlan::default()
            })
            .with_microphone(MicrophoneSignal::silence(1_000_000)),
    );
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    fx.wait_started();
    fx.feed_frames(10);

    let (tracks, outcome) = fx.wait_outcome();
    assert!(track(&tracks, TrackType::Video).failed);
    let failure = outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::Runtime);
    assert_eq!(failure.code, codes::RUNTIME);
    assert!(fx.path("audio.tmp").exists());
    fx.finish();
}

#[test]
fn maximum_duration_stops_the_session() {
    let mut fx = Fixture::new(SoftwareBackend::new());
    fx.recorder.set_audio_enabled(false);
    let (mut video, audio) = fx.params("");
    video.max_duration_us = 1_000_000;
    fx.recorder.start_recording(video, audio);
    fx.wait_started();
    fx.feed_frames(90);

    let (tracks, outcome) = fx.wait_outcome();
    let media = outcome.unwrap();
    assert!(tracks[0].duration_us >= 1_000_000);
    assert_eq!(media.duration_us, tracks[0].duration_us);
    fx.finish();
}

#[test]
fn start_while_recording_is_ignored() {
    let mut fx = Fixture::new(SoftwareBackend::new());
    fx.recorder.set_audio_enabled(false);
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video.clone(), audio.clone());
    fx.wait_started();
    fx.recorder.start_recording(video, audio);
    fx.feed_frames(4);
    fx.recorder.stop_recording();

    let (tracks, outcome) = fx.wait_outcome();
    assert_eq!(tracks.len(), 1);
    assert!(outcome.is_ok());
    fx.finish();
}

#[tokio::test]
async fn dropping_a_live_recorder_inside_a_runtime_releases_everything() {
    let mut fx = Fixture::new(
        SoftwareBackend::new().with_microphone(MicrophoneSignal::silence(10_000_000)),
    );
    let (video, audio) = fx.params("");
    fx.recorder.start_recording(video, audio);
    loop {
        match fx.events.recv().await {
            Some(RecorderEvent::Started) => break,
            Some(RecorderEvent::Progress { .. }) => {}
            other => panic!("expected start, got {other:?}"),
        }
    }
    fx.feed_frames(10);

    let Fixture {
        dir,
        backend,
        recorder,
        events: _events,
    } = fx;
    drop(recorder);
    assert!(backend.ledger().snapshot().all_released());
    drop(dir);
}
