//! Audio encode pipeline.
//!
//! An actor that owns the microphone capture loop. PCM goes through the
//! speed transcoder into a buffer-input AAC encoder; timestamps are derived
//! from the number of bytes handed to the encoder, never from the clock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duotrack_common::clock::MICROS_PER_SEC;
use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    AudioFormat, Encoder, MediaBackend, MicrophoneConfig, MicrophoneSource, SampleFlags,
    TrackFormat, TrackType, MIME_AUDIO_AAC,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc;

use crate::actor::{spawn_actor, Ack, ActorHandle, PipelineStatus};
use crate::event::{PipelineEvent, Reporter};
use crate::session::{AudioParams, RecordInfo};
use crate::track::TrackWriter;
use crate::transcoder::SpeedTranscoder;

/// Smallest encoder input buffer.
pub const MIN_INPUT_BUFFER: usize = 8192;

/// Yield after a capture iteration that read or produced nothing.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Bytes read from the microphone per iteration: 20 ms of 16-bit stereo.
pub fn min_buffer_size(sample_rate: u32) -> usize {
    (sample_rate as f64 * 4.0 * 0.02) as usize
}

/// Encoder input buffer size, sized for the transcoder's worst-case output.
pub fn input_buffer_size(sample_rate: u32, speed: f64) -> usize {
    let scaled = (min_buffer_size(sample_rate) as f64 / speed * 2.0) as usize;
    scaled.max(MIN_INPUT_BUFFER)
}

/// Presentation time of the first sample after `bytes` of 16-bit PCM.
pub fn pcm_pts_us(bytes: u64, channels: u16, sample_rate: u32) -> i64 {
    let frames = bytes / channels as u64 / 2;
    (MICROS_PER_SEC as u64 * frames / sample_rate as u64) as i64
}

pub(crate) enum AudioCommand {
    Start(AudioParams),
    Stop,
    Shutdown { ack: Ack },
}

/// Handle to a running audio pipeline actor.
pub(crate) struct AudioPipeline {
    actor: ActorHandle<AudioCommand>,
    status: Arc<Mutex<PipelineStatus>>,
}

impl AudioPipeline {
    /// Spawn the actor, wait until its loop is live, then post `Start`.
    pub fn start_record(
        backend: Arc<dyn MediaBackend>,
        params: AudioParams,
        reporter: Reporter,
        drain_timeout: Duration,
    ) -> DuotrackResult<Self> {
        let status = Arc::new(Mutex::new(PipelineStatus::default()));
        let actor_status = status.clone();
        let actor = spawn_actor("duotrack-audio", move |rx| {
            AudioActor {
                backend,
                reporter,
                drain_timeout,
                status: actor_status,
                session: None,
            }
            .run(rx)
        })?;
        status.lock().ready = true;
        actor.send(AudioCommand::Start(params));
        Ok(Self { actor, status })
    }

    pub fn stop_record(&self) {
        self.actor.send(AudioCommand::Stop);
    }

    pub fn is_running(&self) -> bool {
        self.status.lock().running
    }

    pub fn shutdown(&mut self) {
        self.actor
            .shutdown_with(|ack| AudioCommand::Shutdown { ack });
        self.status.lock().ready = false;
    }

    pub fn join(&mut self) {
        self.actor.join();
        self.status.lock().ready = false;
    }
}

struct AudioSession {
    output_path: PathBuf,
    sample_rate: u32,
    channels: u16,
    max_input_size: usize,
    microphone: Option<Box<dyn MicrophoneSource>>,
    encoder: Option<Box<dyn Encoder>>,
    track: Option<TrackWriter>,
    transcoder: SpeedTranscoder,
    read_buf: Vec<u8>,
    pending: Vec<u8>,
    bytes_encoded: u64,
}

impl AudioSession {
    fn prepare(
        backend: &dyn MediaBackend,
        params: &AudioParams,
        session: &mut Option<AudioSession>,
    ) -> DuotrackResult<()> {
        let speed = params.speed_mode.factor();
        let channels = params.channels.channel_count();
        let read_size = min_buffer_size(params.sample_rate);
        let buffer_size = input_buffer_size(params.sample_rate, speed);
        tracing::info!(
            sample_rate = params.sample_rate,
            channels,
            bit_rate = params.bit_rate,
            speed,
            buffer_size,
            "Configuring audio encoder"
        );
        let transcoder = SpeedTranscoder::new(params.sample_rate, channels, speed)?;
        let this = session.insert(AudioSession {
            output_path: params.output_path.clone(),
            sample_rate: params.sample_rate,
            channels,
            max_input_size: buffer_size,
            microphone: None,
            encoder: None,
            track: None,
            transcoder,
            read_buf: vec![0; read_size.max(channels as usize * 2)],
            pending: Vec::with_capacity(buffer_size),
            bytes_encoded: 0,
        });

        this.microphone = Some(backend.open_microphone(&MicrophoneConfig {
            sample_rate: params.sample_rate,
            channels: params.channels,
            buffer_size,
        })?);
        let format = TrackFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: params.sample_rate,
            channel_count: channels,
            bit_rate: params.bit_rate,
            max_input_size: buffer_size,
            codec_config: Vec::new(),
        });
        this.encoder
            .insert(backend.create_encoder(&format)?)
            .start()?;
        this.track = Some(TrackWriter::new(
            TrackType::Audio,
            params.output_path.clone(),
            backend.create_writer(&params.output_path)?,
        ));
        if let Some(microphone) = this.microphone.as_mut() {
            microphone.start()?;
        }
        Ok(())
    }

    /// One pass of the capture loop. Returns false when the loop should
    /// yield: no PCM was read or the transcoder had nothing ready.
    fn capture_step(&mut self) -> DuotrackResult<bool> {
        let microphone = self
            .microphone
            .as_mut()
            .ok_or_else(|| DuotrackError::audio("microphone released"))?;
        let read = microphone.read(&mut self.read_buf)?;
        if read > 0 {
            self.transcoder.queue_input(&self.read_buf[..read])?;
        }
        let fed = self.feed_encoder()?;
        self.drain(None)?;
        Ok(read > 0 && fed)
    }

    fn next_pts(&self) -> i64 {
        pcm_pts_us(self.bytes_encoded, self.channels, self.sample_rate)
    }

    /// Hand all transcoder output to the encoder in `max_input_size` pieces.
    fn feed_encoder(&mut self) -> DuotrackResult<bool> {
        self.transcoder.get_output(&mut self.pending);
        if self.pending.is_empty() {
            return Ok(false);
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| DuotrackError::encoder("encoder released"))?;
        let mut offset = 0;
        while offset < self.pending.len() {
            let len = (self.pending.len() - offset).min(self.max_input_size);
            let pts = pcm_pts_us(self.bytes_encoded, self.channels, self.sample_rate);
            encoder.queue_input(&self.pending[offset..offset + len], pts, SampleFlags::NONE)?;
            self.bytes_encoded += len as u64;
            offset += len;
        }
        self.pending.clear();
        Ok(true)
    }

    /// Move encoder output into the writer with timestamps untouched.
    fn drain(&mut self, until_eos: Option<Instant>) -> DuotrackResult<bool> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| DuotrackError::encoder("encoder released"))?;
        self.track
            .as_mut()
            .ok_or_else(|| DuotrackError::container("writer released"))?
            .drain(encoder.as_mut(), until_eos, |pts_us| pts_us)
    }

    fn samples_written(&self) -> u64 {
        self.track.as_ref().map_or(0, TrackWriter::samples_written)
    }

    /// Flush the transcoder, end the encoder input and finalize the file.
    fn finish(&mut self, drain_timeout: Duration) -> DuotrackResult<i64> {
        self.transcoder.end_of_stream()?;
        self.feed_encoder()?;
        let pts = self.next_pts();
        self.encoder
            .as_mut()
            .ok_or_else(|| DuotrackError::encoder("encoder released"))?
            .queue_input(&[], pts, SampleFlags::END_OF_STREAM)?;
        self.drain(Some(Instant::now() + drain_timeout))?;
        let track = self
            .track
            .as_mut()
            .ok_or_else(|| DuotrackError::container("writer released"))?;
        track.finish()?;
        Ok(track.duration_us())
    }

    fn release(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            microphone.release();
        }
        if let Some(mut encoder) = self.encoder.take() {
            encoder.release();
        }
        if let Some(track) = self.track.as_mut() {
            track.release();
        }
        self.transcoder.flush();
        tracing::debug!(
            samples = self.samples_written(),
            bytes = self.bytes_encoded,
            "Audio session released"
        );
    }
}

struct AudioActor {
    backend: Arc<dyn MediaBackend>,
    reporter: Reporter,
    drain_timeout: Duration,
    status: Arc<Mutex<PipelineStatus>>,
    session: Option<AudioSession>,
}

impl AudioActor {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<AudioCommand>) {
        tracing::debug!(session = %self.reporter.session(), "Audio pipeline started");
        loop {
            let command = if self.session.is_some() {
                match rx.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match rx.blocking_recv() {
                    Some(command) => Some(command),
                    None => break,
                }
            };

            match command {
                Some(AudioCommand::Start(params)) => self.handle_start(params),
                Some(AudioCommand::Stop) => {
                    self.handle_stop();
                    return;
                }
                Some(AudioCommand::Shutdown { ack }) => {
                    self.release();
                    let _ = ack.send(());
                    return;
                }
                None => {}
            }

            if let Some(session) = self.session.as_mut() {
                match session.capture_step() {
                    Ok(true) => {}
                    Ok(false) => std::thread::sleep(IDLE_SLEEP),
                    Err(e) => {
                        self.abort(e);
                        return;
                    }
                }
            }
        }
        self.release();
    }

    fn handle_start(&mut self, params: AudioParams) {
        if self.session.is_some() {
            tracing::warn!("Audio pipeline already started");
            return;
        }
        match AudioSession::prepare(self.backend.as_ref(), &params, &mut self.session) {
            Ok(()) => {
                self.status.lock().running = true;
                tracing::info!(path = %params.output_path.display(), "Audio recording started");
                self.reporter.report(PipelineEvent::Started {
                    track: TrackType::Audio,
                });
            }
            Err(error) => {
                tracing::error!(error = %error, "Audio pipeline preparation failed");
                self.release();
                self.reporter.report(PipelineEvent::StartFailed {
                    track: TrackType::Audio,
                    error,
                });
            }
        }
    }

    fn handle_stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            tracing::debug!("Audio pipeline stopped before it started");
            self.reporter.report(PipelineEvent::Finished {
                track: TrackType::Audio,
                info: None,
            });
            return;
        };
        let result = session.finish(self.drain_timeout);
        session.release();
        self.status.lock().running = false;
        let info = match result {
            Ok(_) if session.samples_written() == 0 => {
                tracing::warn!(path = %session.output_path.display(), "Audio track is empty");
                None
            }
            Ok(duration_us) => {
                tracing::info!(
                    path = %session.output_path.display(),
                    duration_us,
                    samples = session.samples_written(),
                    "Audio recording finished"
                );
                Some(RecordInfo {
                    file_path: session.output_path,
                    duration_us,
                    track_type: TrackType::Audio,
                    failed: false,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Audio drain failed, resources force-released");
                Some(failed_info(session.output_path))
            }
        };
        self.reporter.report(PipelineEvent::Finished {
            track: TrackType::Audio,
            info,
        });
    }

    fn abort(&mut self, error: DuotrackError) {
        tracing::error!(error = %error, "Audio pipeline aborted");
        let path = self.session.as_ref().map(|s| s.output_path.clone());
        self.release();
        if let Some(path) = path {
            self.reporter.report(PipelineEvent::Finished {
                track: TrackType::Audio,
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
        track_type: TrackType::Audio,
        failed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duotrack_media_core::ChannelLayout;
    use duotrack_media_soft::{FaultPlan, MicrophoneSignal, SoftwareBackend};

    use crate::session::{SessionId, SpeedMode};

    #[test]
    fn buffer_sizing() {
        assert_eq!(min_buffer_size(44_100), 3528);
        assert_eq!(input_buffer_size(44_100, 1.0), 8192);
        assert_eq!(input_buffer_size(44_100, 0.5), 14_112);
        assert_eq!(input_buffer_size(44_100, 1.0 / 3.0), 21_168);
        assert_eq!(input_buffer_size(48_000, 3.0), 8192);
    }

    #[test]
    fn pts_follows_encoded_bytes() {
        assert_eq!(pcm_pts_us(0, 2, 44_100), 0);
        assert_eq!(pcm_pts_us(176_400, 2, 44_100), 1_000_000);
        assert_eq!(pcm_pts_us(88_200, 1, 44_100), 1_000_000);
        assert_eq!(pcm_pts_us(3528, 2, 44_100), 20_000);
    }

    fn params(path: PathBuf, speed_mode: SpeedMode) -> AudioParams {
        AudioParams {
            sample_rate: 44_100,
            channels: ChannelLayout::Stereo,
            bit_rate: 128_000,
            max_duration_us: 0,
            speed_mode,
            output_path: path,
        }
    }

    fn record(backend: Arc<SoftwareBackend>, params: AudioParams) -> Vec<PipelineEvent> {
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        let reporter = Reporter::new(SessionId(1), move |_, event| {
            let _ = tx.lock().send(event);
        });
        let mut pipeline =
            AudioPipeline::start_record(backend, params, reporter, Duration::from_secs(5)).unwrap();
        let mut events = Vec::new();
        match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
            PipelineEvent::Started { track } => {
                assert_eq!(track, TrackType::Audio);
                // Let the unpaced microphone run dry.
                std::thread::sleep(Duration::from_millis(300));
                assert!(pipeline.is_running());
            }
            other => events.push(other),
        }
        pipeline.stop_record();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
            let done = matches!(event, PipelineEvent::Finished { .. });
            events.push(event);
            if done {
                break;
            }
        }
        pipeline.join();
        events
    }

    fn finished_info(events: &[PipelineEvent]) -> RecordInfo {
        events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Finished { info, .. } => info.clone(),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn capture_step_yields_once_the_microphone_runs_dry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SoftwareBackend::new().with_microphone(MicrophoneSignal::silence(100_000));
        let mut session = None;
        AudioSession::prepare(
            &backend,
            &params(dir.path().join("audio.tmp"), SpeedMode::Normal),
            &mut session,
        )
        .unwrap();
        let mut session = session.unwrap();

        assert!(session.capture_step().unwrap());
        let mut busy_steps = 1;
        while session.capture_step().unwrap() {
            busy_steps += 1;
            assert!(busy_steps < 100, "capture loop never yielded");
        }
        assert!(!session.capture_step().unwrap());

        let started = Instant::now();
        let duration_us = session.finish(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!((duration_us - 100_000).abs() <= 25_000, "{duration_us}");
        session.release();
        assert!(backend.ledger().snapshot().all_released());
    }

    #[test]
    fn records_one_second_of_silence() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            Arc::new(SoftwareBackend::new().with_microphone(MicrophoneSignal::silence(1_000_000)));
        let path = dir.path().join("audio.tmp");
        let events = record(backend.clone(), params(path.clone(), SpeedMode::Normal));

        let info = finished_info(&events);
        assert!(!info.failed);
        assert_eq!(info.file_path, path);
        assert!((info.duration_us - 1_000_000).abs() <= 25_000, "{}", info.duration_us);
        assert!(backend.ledger().snapshot().all_released());
    }

    #[test]
    fn fast_mode_halves_recorded_duration() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            Arc::new(SoftwareBackend::new().with_microphone(MicrophoneSignal::silence(2_000_000)));
        let events = record(
            backend.clone(),
            params(dir.path().join("audio.tmp"), SpeedMode::Fast),
        );

        let info = finished_info(&events);
        assert!((info.duration_us - 1_000_000).abs() <= 25_000, "{}", info.duration_us);
    }

    #[test]
    fn unavailable_microphone_is_a_start_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SoftwareBackend::new().with_faults(FaultPlan {
            microphone_unavailable: true,
            ..FaultPlan::default()
        }));
        let events = record(
            backend.clone(),
            params(dir.path().join("audio.tmp"), SpeedMode::Normal),
        );
        assert!(matches!(
            events.first(),
            Some(PipelineEvent::StartFailed {
                track: TrackType::Audio,
                ..
            })
        ));
        assert!(backend.ledger().snapshot().all_released());
    }
}
