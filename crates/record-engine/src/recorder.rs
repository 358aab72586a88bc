//! Recording orchestrator.
//!
//! [`MediaRecorder`] owns one event-loop thread. Caller requests, pipeline
//! reports and merge completions all arrive on that loop's queue, so the
//! session, its barriers and the state machine are only ever touched from
//! one thread. Callers observe progress through the [`RecorderEvent`]
//! receiver returned by [`MediaRecorder::new`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use duotrack_common::clock::DriftMeasurement;
use duotrack_common::config::RecordingDefaults;
use duotrack_common::error::{codes, DuotrackError, DuotrackResult};
use duotrack_media_core::{FileStore, MediaBackend, TextureId, TrackType};
use duotrack_merge_engine::{MergeJob, MergeOutcome, MergeWorker};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::actor::{ack_channel, Ack};
use crate::audio::AudioPipeline;
use crate::barrier::FinishedTracks;
use crate::event::{FailureKind, PipelineEvent, RecordFailure, RecorderEvent, Reporter};
use crate::session::{AudioParams, MediaInfo, RecordInfo, RecordingSession, SessionId, VideoParams};
use crate::video::VideoPipeline;

/// Audio/video duration mismatch worth a warning.
const DRIFT_WARN_MS: f64 = 100.0;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    /// Pipelines are starting, or a configuration failure left no session.
    Armed,
    Recording,
    Stopping,
    Merging,
    Complete,
    Failed,
}

impl RecorderState {
    fn accepts_start(self, has_session: bool) -> bool {
        match self {
            Self::Idle | Self::Complete | Self::Failed => true,
            Self::Armed => !has_session,
            _ => false,
        }
    }
}

struct Shared {
    state: Mutex<RecorderState>,
    accepting_frames: AtomicBool,
    audio_enabled: AtomicBool,
}

enum LoopMessage {
    Start {
        video: VideoParams,
        audio: AudioParams,
    },
    Frame {
        texture: TextureId,
        timestamp_ns: i64,
    },
    Stop,
    Pipeline(SessionId, PipelineEvent),
    MergeDone {
        session: SessionId,
        outcome: MergeOutcome,
    },
    Shutdown {
        ack: Ack,
    },
}

/// Dual-track recorder.
pub struct MediaRecorder {
    tx: mpsc::UnboundedSender<LoopMessage>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl MediaRecorder {
    /// Spawn the event loop and the merge worker.
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        file_store: Arc<dyn FileStore>,
        defaults: &RecordingDefaults,
    ) -> DuotrackResult<(Self, mpsc::UnboundedReceiver<RecorderEvent>)> {
        let shared = Arc::new(Shared {
            state: Mutex::new(RecorderState::Idle),
            accepting_frames: AtomicBool::new(false),
            audio_enabled: AtomicBool::new(defaults.audio_enabled),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let merge = MergeWorker::spawn(backend.clone())?;

        let event_loop = EventLoop {
            backend,
            file_store,
            drain_timeout: defaults.drain_timeout(),
            shared: shared.clone(),
            events: events_tx,
            self_tx: tx.clone(),
            merge,
            next_session: 0,
            active: None,
            retired: Vec::new(),
        };
        let thread = std::thread::Builder::new()
            .name("duotrack-recorder".to_string())
            .spawn(move || event_loop.run(rx))?;

        tracing::info!(
            audio_enabled = defaults.audio_enabled,
            drain_timeout_ms = defaults.drain_timeout_ms,
            "Media recorder created"
        );
        Ok((
            Self {
                tx,
                shared,
                thread: Some(thread),
            },
            events_rx,
        ))
    }

    /// Begin a session. Ignored while another session is live.
    pub fn start_recording(&self, video: VideoParams, audio: AudioParams) {
        self.post(LoopMessage::Start { video, audio });
    }

    /// Forward a rendered frame. Dropped unless recording, and when the
    /// timestamp is zero.
    pub fn on_frame_available(&self, texture: TextureId, timestamp_ns: i64) {
        if timestamp_ns == 0 || !self.shared.accepting_frames.load(Ordering::Acquire) {
            return;
        }
        self.post(LoopMessage::Frame {
            texture,
            timestamp_ns,
        });
    }

    /// Stop accepting frames and let both pipelines drain. Idempotent.
    pub fn stop_recording(&self) {
        self.shared.accepting_frames.store(false, Ordering::Release);
        self.post(LoopMessage::Stop);
    }

    pub fn state(&self) -> RecorderState {
        *self.shared.state.lock()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn audio_enabled(&self) -> bool {
        self.shared.audio_enabled.load(Ordering::Acquire)
    }

    /// Takes effect from the next session.
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.shared.audio_enabled.store(enabled, Ordering::Release);
    }

    /// Shut down pipelines, the merge worker and the event loop.
    pub fn release(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let (ack_tx, ack_rx) = ack_channel();
        if self.tx.send(LoopMessage::Shutdown { ack: ack_tx }).is_ok() {
            let _ = ack_rx.recv();
        }
        if thread.join().is_err() {
            tracing::error!("Recorder event loop panicked");
        }
        tracing::info!("Media recorder released");
    }

    fn post(&self, message: LoopMessage) {
        if self.tx.send(message).is_err() {
            tracing::warn!("Recorder already released");
        }
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        self.release();
    }
}

enum Pipeline {
    Video(VideoPipeline),
    Audio(AudioPipeline),
}

impl Pipeline {
    fn stop(&self) {
        match self {
            Self::Video(p) => p.stop_record(),
            Self::Audio(p) => p.stop_record(),
        }
    }

    fn join(&mut self) {
        match self {
            Self::Video(p) => p.join(),
            Self::Audio(p) => p.join(),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Self::Video(p) => p.shutdown(),
            Self::Audio(p) => p.shutdown(),
        }
    }
}

/// A pipeline of an abandoned session, kept until it reports its finish.
struct Retired {
    session: SessionId,
    track: TrackType,
    pipeline: Pipeline,
}

struct ActiveSession {
    session: RecordingSession,
    video: Option<VideoPipeline>,
    audio: Option<AudioPipeline>,
    stop_requested: bool,
    finished: Option<FinishedTracks>,
}

impl ActiveSession {
    fn pipelines(&mut self) -> Vec<(TrackType, Pipeline)> {
        let mut pipelines = Vec::new();
        if let Some(video) = self.video.take() {
            pipelines.push((TrackType::Video, Pipeline::Video(video)));
        }
        if let Some(audio) = self.audio.take() {
            pipelines.push((TrackType::Audio, Pipeline::Audio(audio)));
        }
        pipelines
    }
}

struct EventLoop {
    backend: Arc<dyn MediaBackend>,
    file_store: Arc<dyn FileStore>,
    drain_timeout: Duration,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    self_tx: mpsc::UnboundedSender<LoopMessage>,
    merge: MergeWorker,
    next_session: u64,
    active: Option<ActiveSession>,
    retired: Vec<Retired>,
}

impl EventLoop {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<LoopMessage>) {
        while let Some(message) = rx.blocking_recv() {
            match message {
                LoopMessage::Start { video, audio } => self.handle_start(video, audio),
                LoopMessage::Frame {
                    texture,
                    timestamp_ns,
                } => self.handle_frame(texture, timestamp_ns),
                LoopMessage::Stop => self.request_stop(),
                LoopMessage::Pipeline(session, event) => self.handle_pipeline(session, event),
                LoopMessage::MergeDone { session, outcome } => {
                    self.handle_merge_done(session, outcome)
                }
                LoopMessage::Shutdown { ack } => {
                    self.shutdown();
                    let _ = ack.send(());
                    return;
                }
            }
        }
        self.shutdown();
    }

    fn state(&self) -> RecorderState {
        *self.shared.state.lock()
    }

    fn set_state(&self, state: RecorderState) {
        let previous = std::mem::replace(&mut *self.shared.state.lock(), state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Recorder state changed");
        }
    }

    fn emit(&self, event: RecorderEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&mut self, failure: RecordFailure, state: RecorderState) {
        tracing::error!(kind = ?failure.kind, code = failure.code, message = %failure.message, "Recording failed");
        self.shared.accepting_frames.store(false, Ordering::Release);
        self.set_state(state);
        self.emit(RecorderEvent::Failed(failure));
    }

    fn reporter(&self, session: SessionId) -> Reporter {
        let tx = self.self_tx.clone();
        Reporter::new(session, move |session, event| {
            let _ = tx.send(LoopMessage::Pipeline(session, event));
        })
    }

    fn handle_start(&mut self, video: VideoParams, audio: AudioParams) {
        let state = self.state();
        if !state.accepts_start(self.active.is_some()) {
            tracing::debug!(state = ?state, "Start ignored, a session is live");
            return;
        }
        self.next_session += 1;
        let id = SessionId(self.next_session);
        let audio_enabled = self.shared.audio_enabled.load(Ordering::Acquire);
        let session = RecordingSession::new(id, video, audio, audio_enabled);
        tracing::info!(
            %id,
            audio_enabled,
            video = ?session.video,
            started_at = session.clock.epoch_wall(),
            "Starting recording session"
        );
        self.set_state(RecorderState::Armed);

        let video_pipeline = match VideoPipeline::start_record(
            self.backend.clone(),
            session.video.clone(),
            self.reporter(id),
            self.drain_timeout,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.fail(start_failure(&e), RecorderState::Armed);
                return;
            }
        };
        let mut active = ActiveSession {
            session,
            video: Some(video_pipeline),
            audio: None,
            stop_requested: false,
            finished: None,
        };
        if audio_enabled {
            match AudioPipeline::start_record(
                self.backend.clone(),
                active.session.audio.clone(),
                self.reporter(id),
                self.drain_timeout,
            ) {
                Ok(pipeline) => active.audio = Some(pipeline),
                Err(e) => {
                    self.retire(&mut active);
                    self.fail(start_failure(&e), RecorderState::Armed);
                    return;
                }
            }
        }
        self.active = Some(active);
    }

    fn handle_frame(&mut self, texture: TextureId, timestamp_ns: i64) {
        if self.state() != RecorderState::Recording {
            return;
        }
        if let Some(video) = self.active.as_ref().and_then(|a| a.video.as_ref()) {
            video.frame_available(texture, timestamp_ns);
        }
    }

    fn request_stop(&mut self) {
        let state = self.state();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.stop_requested || !matches!(state, RecorderState::Armed | RecorderState::Recording)
        {
            return;
        }
        active.stop_requested = true;
        self.shared.accepting_frames.store(false, Ordering::Release);
        tracing::info!(
            session = %active.session.id,
            elapsed_us = active.session.clock.elapsed_us(),
            video_running = active.video.as_ref().is_some_and(|v| v.is_running()),
            audio_running = active.audio.as_ref().is_some_and(|a| a.is_running()),
            "Stopping recording"
        );
        if let Some(video) = active.video.as_ref() {
            video.stop_record();
        }
        if let Some(audio) = active.audio.as_ref() {
            audio.stop_record();
        }
        self.set_state(RecorderState::Stopping);
    }

    fn handle_pipeline(&mut self, session: SessionId, event: PipelineEvent) {
        let is_active = self
            .active
            .as_ref()
            .is_some_and(|a| a.session.id == session);
        if !is_active {
            self.handle_stale(session, event);
            return;
        }
        match event {
            PipelineEvent::Started { track } => self.handle_started(track),
            PipelineEvent::StartFailed { track, error } => self.handle_start_failed(track, error),
            PipelineEvent::Progress { duration_us } => self.handle_progress(duration_us),
            PipelineEvent::Finished { track, info } => self.handle_finished(track, info),
        }
    }

    fn handle_stale(&mut self, session: SessionId, event: PipelineEvent) {
        let PipelineEvent::Finished { track, info } = event else {
            tracing::trace!(%session, "Ignoring stale pipeline event");
            return;
        };
        let Some(index) = self
            .retired
            .iter()
            .position(|r| r.session == session && r.track == track)
        else {
            tracing::debug!(%session, %track, "Ignoring stale finish report");
            return;
        };
        let mut retired = self.retired.swap_remove(index);
        retired.pipeline.join();
        if let Some(info) = info {
            if let Err(e) = self.file_store.delete(&info.file_path) {
                tracing::warn!(path = %info.file_path.display(), error = %e, "Failed to delete abandoned intermediate");
            }
        }
        tracing::debug!(%session, %track, "Abandoned pipeline finished");
    }

    fn handle_started(&mut self, track: TrackType) {
        let state = self.state();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let released = active.session.start.arrive(track);
        tracing::debug!(
            session = %active.session.id,
            %track,
            arrived = active.session.start.arrived(),
            required = active.session.start.required(),
            "Pipeline started"
        );
        if released && state == RecorderState::Armed {
            tracing::info!(session = %active.session.id, "Recording");
            self.set_state(RecorderState::Recording);
            self.shared.accepting_frames.store(true, Ordering::Release);
            self.emit(RecorderEvent::Started);
        }
    }

    fn handle_start_failed(&mut self, track: TrackType, error: DuotrackError) {
        tracing::warn!(%track, error = %error, "Pipeline failed to start, session abandoned");
        if let Some(mut active) = self.active.take() {
            self.retire(&mut active);
        }
        self.fail(
            RecordFailure::new(
                FailureKind::Configuration,
                codes::CONFIGURATION,
                format!("{track} encoder configuration failed: {error}"),
            ),
            RecorderState::Armed,
        );
    }

    /// Stop the session's pipelines and keep them until they report.
    fn retire(&mut self, active: &mut ActiveSession) {
        let session = active.session.id;
        for (track, pipeline) in active.pipelines() {
            pipeline.stop();
            self.retired.push(Retired {
                session,
                track,
                pipeline,
            });
        }
    }

    fn handle_progress(&mut self, duration_us: i64) {
        self.emit(RecorderEvent::Progress { duration_us });
        let max_duration_us = self
            .active
            .as_ref()
            .map_or(0, |a| a.session.video.max_duration_us);
        if max_duration_us > 0
            && duration_us >= max_duration_us
            && self.state() == RecorderState::Recording
        {
            tracing::info!(duration_us, max_duration_us, "Maximum duration reached");
            self.request_stop();
        }
    }

    fn handle_finished(&mut self, track: TrackType, info: Option<RecordInfo>) {
        if let Some(info) = &info {
            self.emit(RecorderEvent::TrackFinished(info.clone()));
        }
        let failed = info.as_ref().is_some_and(|i| i.failed);
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let released = active.session.finish.arrive(track, info);
        match released {
            Some(tracks) => self.complete(tracks),
            None if failed => {
                tracing::warn!(%track, "Track failed, stopping the other pipeline");
                self.request_stop();
            }
            None => {}
        }
    }

    fn complete(&mut self, tracks: FinishedTracks) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        for (_, mut pipeline) in active.pipelines() {
            pipeline.join();
        }
        self.shared.accepting_frames.store(false, Ordering::Release);
        let id = active.session.id;
        let audio_enabled = active.session.audio_enabled;
        tracing::info!(
            session = %id,
            elapsed_us = active.session.clock.elapsed_us(),
            "All tracks finished"
        );
        if let (Some(video), Some(audio)) = (&tracks.video, &tracks.audio) {
            let drift = DriftMeasurement {
                reference_us: video.duration_us,
                measured_us: audio.duration_us,
            };
            if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
                tracing::warn!(drift_ms = drift.drift_ms(), "Audio/video duration drift");
            } else {
                tracing::debug!(drift_ms = drift.drift_ms(), "Audio/video duration drift");
            }
        }

        if tracks.any_failed() {
            self.active = None;
            let failed: Vec<String> = tracks
                .iter()
                .filter(|i| i.failed)
                .map(|i| i.track_type.to_string())
                .collect();
            self.fail(
                RecordFailure::new(
                    FailureKind::Runtime,
                    codes::RUNTIME,
                    format!("{} pipeline failed while recording", failed.join(" and ")),
                ),
                RecorderState::Failed,
            );
            return;
        }

        let Some(video) = tracks.video.clone() else {
            self.active = None;
            self.fail(RecordFailure::no_media(), RecorderState::Failed);
            return;
        };

        if !audio_enabled {
            self.active = None;
            self.relocate(video);
            return;
        }

        let Some(audio) = tracks.audio.clone() else {
            self.active = None;
            self.fail(
                RecordFailure::new(
                    FailureKind::Merge,
                    codes::MERGE_MISSING_AUDIO,
                    "audio track produced nothing",
                ),
                RecorderState::Failed,
            );
            return;
        };

        if let Some(active) = self.active.as_mut() {
            active.finished = Some(tracks);
        }
        self.submit_merge(id, video, audio);
    }

    fn relocate(&mut self, video: RecordInfo) {
        let result = self.file_store.make_output_path().and_then(|output| {
            self.file_store.relocate(&video.file_path, &output)?;
            Ok(output)
        });
        match result {
            Ok(output) => {
                tracing::info!(path = %output.display(), duration_us = video.duration_us, "Recording complete");
                self.set_state(RecorderState::Complete);
                self.emit(RecorderEvent::Finished(MediaInfo {
                    file_path: output,
                    duration_us: video.duration_us,
                }));
            }
            Err(e) => self.fail(
                RecordFailure::new(FailureKind::Relocation, codes::RELOCATION, e.to_string()),
                RecorderState::Failed,
            ),
        }
    }

    fn submit_merge(&mut self, session: SessionId, video: RecordInfo, audio: RecordInfo) {
        let output = match self.file_store.make_output_path() {
            Ok(output) => output,
            Err(e) => {
                self.active = None;
                self.fail(
                    RecordFailure::new(FailureKind::Merge, codes::MERGE_IO, e.to_string()),
                    RecorderState::Failed,
                );
                return;
            }
        };
        let job = MergeJob {
            video_path: video.file_path,
            audio_path: audio.file_path,
            output_path: output,
        };
        tracing::info!(%session, output = %job.output_path.display(), "Merging tracks");
        self.set_state(RecorderState::Merging);
        let tx = self.self_tx.clone();
        let submitted = self.merge.submit(job, move |outcome| {
            let _ = tx.send(LoopMessage::MergeDone { session, outcome });
        });
        if let Err(e) = submitted {
            self.active = None;
            self.fail(
                RecordFailure::new(FailureKind::Merge, e.code(), e.to_string()),
                RecorderState::Failed,
            );
        }
    }

    fn handle_merge_done(&mut self, session: SessionId, outcome: MergeOutcome) {
        let is_active = self
            .active
            .as_ref()
            .is_some_and(|a| a.session.id == session);
        if !is_active || self.state() != RecorderState::Merging {
            tracing::debug!(%session, "Ignoring stale merge result");
            return;
        }
        let finished = self.active.take().and_then(|a| a.finished);
        if !outcome.is_success() {
            let message = outcome
                .message
                .unwrap_or_else(|| format!("merge failed with code {}", outcome.code));
            self.fail(
                RecordFailure::new(FailureKind::Merge, outcome.code, message),
                RecorderState::Failed,
            );
            return;
        }

        for path in [&outcome.job.video_path, &outcome.job.audio_path] {
            if let Err(e) = self.file_store.delete(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete intermediate");
            }
        }
        let duration_us = finished
            .and_then(|f| f.video)
            .map_or(0, |video| video.duration_us);
        tracing::info!(
            path = %outcome.job.output_path.display(),
            duration_us,
            stats = ?outcome.stats,
            "Recording complete"
        );
        self.set_state(RecorderState::Complete);
        self.emit(RecorderEvent::Finished(MediaInfo {
            file_path: outcome.job.output_path,
            duration_us,
        }));
    }

    fn shutdown(&mut self) {
        self.shared.accepting_frames.store(false, Ordering::Release);
        if let Some(mut active) = self.active.take() {
            for (_, mut pipeline) in active.pipelines() {
                pipeline.shutdown();
            }
        }
        for mut retired in self.retired.drain(..) {
            retired.pipeline.shutdown();
        }
        self.merge.shutdown();
        self.set_state(RecorderState::Idle);
    }
}

fn start_failure(error: &DuotrackError) -> RecordFailure {
    RecordFailure::new(
        FailureKind::Configuration,
        codes::CONFIGURATION,
        format!("failed to start pipeline: {error}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_accepted_only_without_a_live_session() {
        assert!(RecorderState::Idle.accepts_start(false));
        assert!(RecorderState::Complete.accepts_start(false));
        assert!(RecorderState::Failed.accepts_start(false));
        assert!(RecorderState::Armed.accepts_start(false));
        assert!(!RecorderState::Armed.accepts_start(true));
        assert!(!RecorderState::Recording.accepts_start(true));
        assert!(!RecorderState::Stopping.accepts_start(true));
        assert!(!RecorderState::Merging.accepts_start(true));
    }
}
