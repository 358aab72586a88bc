//! Video encode pipeline.
//!
//! An actor owning one surface-input encoder session, the render surface
//! bound to it, and the video-only container writer. Frames arrive as
//! texture handles; every frame is drawn, presented and followed by a
//! non-blocking drain of whatever the encoder has ready.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duotrack_common::clock::{us_to_ns, MICROS_PER_SEC};
use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    AvcLevel, AvcProfile, Encoder, MediaBackend, RenderSurface, TextureId, TrackFormat, TrackType,
    VideoFormat, MIME_VIDEO_AVC,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::actor::{spawn_actor, Ack, ActorHandle, PipelineStatus};
use crate::event::{PipelineEvent, Reporter};
use crate::session::{RecordInfo, VideoParams};
use crate::track::TrackWriter;

/// Encoder frame rate.
pub const FRAME_RATE: u32 = 30;

/// Seconds between key frames.
pub const I_FRAME_INTERVAL_SECS: u32 = 1;

/// Added to a timestamp that fails to advance past the previous one.
pub const TIMESTAMP_BUMP_US: i64 = 10_000;

/// Round a dimension down to the nearest even value.
pub fn even_dimension(value: u32) -> u32 {
    value & !1
}

/// AVC level for the given frame size: 4.0 from 1080p up, 3.1 below.
pub fn select_level(width: u32, height: u32) -> AvcLevel {
    if width as u64 * height as u64 >= 1920 * 1080 {
        AvcLevel::Level4
    } else {
        AvcLevel::Level31
    }
}

/// Encoder configuration for `params`.
pub fn video_format(params: &VideoParams) -> VideoFormat {
    let width = even_dimension(params.width);
    let height = even_dimension(params.height);
    VideoFormat {
        mime: MIME_VIDEO_AVC.to_string(),
        width,
        height,
        bit_rate: params.bit_rate,
        frame_rate: FRAME_RATE,
        i_frame_interval: I_FRAME_INTERVAL_SECS,
        profile: AvcProfile::High,
        level: select_level(width, height),
        codec_config: Vec::new(),
    }
}

/// Presentation-time bookkeeping for one video track.
#[derive(Debug, Clone)]
pub struct VideoTimeline {
    speed: f64,
    first_input_ns: Option<i64>,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
}

impl VideoTimeline {
    pub fn new(speed: f64) -> Self {
        Self {
            speed,
            first_input_ns: None,
            first_pts_us: None,
            last_pts_us: None,
        }
    }

    /// Surface presentation time for a renderer timestamp, compressed or
    /// stretched around the first frame by the speed factor.
    pub fn presentation_time_ns(&mut self, timestamp_ns: i64) -> i64 {
        let first = *self.first_input_ns.get_or_insert(timestamp_ns);
        if self.speed == 1.0 {
            return timestamp_ns;
        }
        first + ((timestamp_ns - first) as f64 / self.speed) as i64
    }

    /// Timestamp to write for an encoder output timestamp. Never goes back
    /// and never repeats.
    pub fn next_pts(&mut self, encoder_pts_us: i64) -> i64 {
        let pts = match self.last_pts_us {
            Some(previous) if encoder_pts_us <= previous => previous + TIMESTAMP_BUMP_US,
            _ => encoder_pts_us,
        };
        self.first_pts_us.get_or_insert(pts);
        self.last_pts_us = Some(pts);
        pts
    }

    /// Last written minus first written timestamp.
    pub fn duration_us(&self) -> i64 {
        match (self.first_pts_us, self.last_pts_us) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }
}

pub(crate) enum VideoCommand {
    Start(VideoParams),
    FrameAvailable { texture: TextureId, timestamp_ns: i64 },
    Stop,
    Shutdown { ack: Ack },
}

/// Handle to a running video pipeline actor.
pub(crate) struct VideoPipeline {
    actor: ActorHandle<VideoCommand>,
    status: Arc<Mutex<PipelineStatus>>,
}

impl VideoPipeline {
    /// Spawn the actor, wait until its loop is live, then post `Start`.
    pub fn start_record(
        backend: Arc<dyn MediaBackend>,
        params: VideoParams,
        reporter: Reporter,
        drain_timeout: Duration,
    ) -> DuotrackResult<Self> {
        let status = Arc::new(Mutex::new(PipelineStatus::default()));
        let actor_status = status.clone();
        let actor = spawn_actor("duotrack-video", move |rx| {
            VideoActor {
                backend,
                reporter,
                drain_timeout,
                status: actor_status,
                session: None,
            }
            .run(rx)
        })?;
        status.lock().ready = true;
        actor.send(VideoCommand::Start(params));
        Ok(Self { actor, status })
    }

    pub fn frame_available(&self, texture: TextureId, timestamp_ns: i64) {
        self.actor.send(VideoCommand::FrameAvailable {
            texture,
            timestamp_ns,
        });
    }

    pub fn stop_record(&self) {
        self.actor.send(VideoCommand::Stop);
    }

    pub fn is_running(&self) -> bool {
        self.status.lock().running
    }

    /// Release without draining and wait for the actor to exit.
    pub fn shutdown(&mut self) {
        self.actor
            .shutdown_with(|ack| VideoCommand::Shutdown { ack });
        self.status.lock().ready = false;
    }

    /// Wait for an actor that has already reported its finish.
    pub fn join(&mut self) {
        self.actor.join();
        self.status.lock().ready = false;
    }
}

/// Resources of one encoding session. Whatever is present gets released.
struct VideoSession {
    output_path: PathBuf,
    encoder: Option<Box<dyn Encoder>>,
    surface: Option<Box<dyn RenderSurface>>,
    track: Option<TrackWriter>,
    timeline: VideoTimeline,
}

impl VideoSession {
    fn open(
        backend: &dyn MediaBackend,
        params: &VideoParams,
        session: &mut Option<VideoSession>,
    ) -> DuotrackResult<()> {
        let format = video_format(params);
        tracing::info!(
            width = format.width,
            height = format.height,
            bit_rate = format.bit_rate,
            level = ?format.level,
            speed = params.speed_mode.factor(),
            "Configuring video encoder"
        );
        let this = session.insert(VideoSession {
            output_path: params.output_path.clone(),
            encoder: None,
            surface: None,
            track: None,
            timeline: VideoTimeline::new(params.speed_mode.factor()),
        });

        let encoder = this
            .encoder
            .insert(backend.create_encoder(&TrackFormat::Video(format))?);
        let input = encoder.create_input_surface()?;
        encoder.start()?;
        this.surface = Some(params.graphics.create_window_surface(&input)?);
        this.track = Some(TrackWriter::new(
            TrackType::Video,
            params.output_path.clone(),
            backend.create_writer(&params.output_path)?,
        ));
        Ok(())
    }

    fn samples_written(&self) -> u64 {
        self.track.as_ref().map_or(0, TrackWriter::samples_written)
    }

    fn render(&mut self, texture: TextureId, timestamp_ns: i64) -> DuotrackResult<()> {
        let presentation_ns = self.timeline.presentation_time_ns(timestamp_ns);
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| DuotrackError::graphics("no render surface"))?;
        surface.make_current()?;
        surface.draw_texture(texture)?;
        surface.set_presentation_time(presentation_ns);
        surface.swap_buffers()
    }

    /// Move encoder output into the writer, retiming each sample and
    /// reporting progress as it goes.
    fn drain(&mut self, reporter: &Reporter, until_eos: Option<Instant>) -> DuotrackResult<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| DuotrackError::encoder("encoder released"))?;
        let track = self
            .track
            .as_mut()
            .ok_or_else(|| DuotrackError::container("writer released"))?;
        let timeline = &mut self.timeline;
        track.drain(encoder.as_mut(), until_eos, |pts_us| {
            let pts = timeline.next_pts(pts_us);
            reporter.report(PipelineEvent::Progress {
                duration_us: timeline.duration_us(),
            });
            pts
        })?;
        Ok(())
    }

    /// Signal end-of-stream, drain and finalize the file.
    fn finish(&mut self, reporter: &Reporter, drain_timeout: Duration) -> DuotrackResult<i64> {
        self.encoder
            .as_mut()
            .ok_or_else(|| DuotrackError::encoder("encoder released"))?
            .signal_end_of_input()?;
        self.drain(reporter, Some(Instant::now() + drain_timeout))?;
        if let Some(track) = self.track.as_mut() {
            track.finish()?;
        }
        Ok(self.timeline.duration_us())
    }

    fn release(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        if let Some(mut encoder) = self.encoder.take() {
            encoder.release();
        }
        if let Some(track) = self.track.as_mut() {
            track.release();
        }
        tracing::debug!(samples = self.samples_written(), "Video session released");
    }
}

struct VideoActor {
    backend: Arc<dyn MediaBackend>,
    reporter: Reporter,
    drain_timeout: Duration,
    status: Arc<Mutex<PipelineStatus>>,
    session: Option<VideoSession>,
}

impl VideoActor {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<VideoCommand>) {
        tracing::debug!(session = %self.reporter.session(), "Video pipeline started");
        while let Some(command) = rx.blocking_recv() {
            match command {
                VideoCommand::Start(params) => self.handle_start(params),
                VideoCommand::FrameAvailable {
                    texture,
                    timestamp_ns,
                } => {
                    if let Err(e) = self.handle_frame(texture, timestamp_ns) {
                        self.abort(e);
                        return;
                    }
                }
                VideoCommand::Stop => {
                    self.handle_stop();
                    return;
                }
                VideoCommand::Shutdown { ack } => {
                    self.release();
                    let _ = ack.send(());
                    return;
                }
            }
        }
        self.release();
    }

    fn handle_start(&mut self, params: VideoParams) {
        if self.session.is_some() {
            tracing::warn!("Video pipeline already started");
            return;
        }
        match VideoSession::open(self.backend.as_ref(), &params, &mut self.session) {
            Ok(()) => {
                self.status.lock().running = true;
                tracing::info!(path = %params.output_path.display(), "Video recording started");
                self.reporter.report(PipelineEvent::Started {
                    track: TrackType::Video,
                });
            }
            Err(error) => {
                tracing::error!(error = %error, "Video encoder configuration failed");
                self.release();
                self.reporter.report(PipelineEvent::StartFailed {
                    track: TrackType::Video,
                    error,
                });
            }
        }
    }

    fn handle_frame(&mut self, texture: TextureId, timestamp_ns: i64) -> DuotrackResult<()> {
        let Some(session) = self.session.as_mut() else {
            tracing::trace!("Frame before start, dropped");
            return Ok(());
        };
        session.render(texture, timestamp_ns)?;
        session.drain(&self.reporter, None)
    }

    fn handle_stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            tracing::debug!("Video pipeline stopped before it started");
            self.reporter.report(PipelineEvent::Finished {
                track: TrackType::Video,
                info: None,
            });
            return;
        };
        let result = session.finish(&self.reporter, self.drain_timeout);
        session.release();
        self.status.lock().running = false;
        let info = match result {
            Ok(_) if session.samples_written() == 0 => {
                tracing::warn!(path = %session.output_path.display(), "Video track is empty");
                None
            }
            Ok(duration_us) => {
                tracing::info!(
                    path = %session.output_path.display(),
                    duration_us,
                    samples = session.samples_written(),
                    "Video recording finished"
                );
                Some(RecordInfo {
                    file_path: session.output_path,
                    duration_us,
                    track_type: TrackType::Video,
                    failed: false,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Video drain failed, resources force-released");
                Some(failed_info(session.output_path))
            }
        };
        self.reporter.report(PipelineEvent::Finished {
            track: TrackType::Video,
            info,
        });
    }

    fn abort(&mut self, error: DuotrackError) {
        tracing::error!(error = %error, "Video pipeline aborted");
        let path = self.session.as_ref().map(|s| s.output_path.clone());
        self.release();
        if let Some(path) = path {
            self.reporter.report(PipelineEvent::Finished {
                track: TrackType::Video,
                info: Some(failed_info(path)),
            });
        }
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
        self.status.lock().running = false;
    }
}

fn failed_info(file_path: PathBuf) -> RecordInfo {
    RecordInfo {
        file_path,
        duration_us: 0,
        track_type: TrackType::Video,
        failed: true,
    }
}

/// Frame interval at the encoder frame rate, in microseconds.
pub fn frame_interval_us() -> i64 {
    MICROS_PER_SEC / FRAME_RATE as i64
}

/// Renderer timestamp of frame `index` from a steady source starting at `start_ns`.
pub fn frame_timestamp_ns(start_ns: i64, index: u64) -> i64 {
    start_ns + us_to_ns(index as i64 * frame_interval_us())
}
