//! Record a session from the synthetic renderer and a microphone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use duotrack_common::clock::us_to_secs;
use duotrack_common::config::AppConfig;
use duotrack_media_core::{LocalFileStore, TextureId};
use duotrack_record_engine::{
    frame_interval_us, frame_timestamp_ns, AudioParams, MediaInfo, MediaRecorder, RecordInfo,
    RecorderEvent, SpeedMode, VideoParams, FRAME_RATE,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::backend::{self, BackendChoice, MicrophoneChoice};

/// Renderer clock value of the first synthetic frame.
const FIRST_FRAME_NS: i64 = 1_000_000_000;

pub struct RecordOptions {
    pub output: Option<PathBuf>,
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub speed: SpeedMode,
    pub audio: bool,
    pub backend: BackendChoice,
    pub microphone: MicrophoneChoice,
}

pub async fn run(config: AppConfig, options: RecordOptions) -> anyhow::Result<()> {
    anyhow::ensure!(
        options.duration_secs > 0.0,
        "duration must be positive, got {}",
        options.duration_secs
    );
    let mut defaults = config.recording.clone();
    if let Some(width) = options.width {
        defaults.width = width;
    }
    if let Some(height) = options.height {
        defaults.height = height;
    }
    defaults.audio_enabled = options.audio;
    let output_dir = options.output.unwrap_or(config.output_dir);
    std::fs::create_dir_all(&output_dir)?;

    let backend::Recording { backend, graphics } =
        backend::for_recording(options.backend, options.microphone)?;

    println!("Starting recording");
    println!("  Backend: {}", backend.name());
    println!("  Output: {}", output_dir.display());
    println!("  Size: {}x{}", defaults.width, defaults.height);
    println!("  Duration: {:.1}s", options.duration_secs);
    println!("  Speed: {:?}", options.speed);
    println!("  Audio: {}", options.audio);
    println!();

    let store = Arc::new(LocalFileStore::new(
        &output_dir,
        defaults.file_prefix.clone(),
        defaults.file_suffix.clone(),
    ));
    let (recorder, mut events) = MediaRecorder::new(backend, store, &defaults)?;

    let stamp = chrono::Utc::now().timestamp_millis();
    let mut video = VideoParams::from_defaults(
        &defaults,
        graphics,
        output_dir.join(format!(".{stamp}_video.tmp")),
    );
    video.speed_mode = options.speed;
    let mut audio =
        AudioParams::from_defaults(&defaults, output_dir.join(format!(".{stamp}_audio.tmp")));
    audio.speed_mode = options.speed;

    recorder.start_recording(video, audio);
    let outcome = drive(&recorder, &mut events, options.duration_secs).await;

    // Release joins actor threads; keep it off the async workers.
    tokio::task::spawn_blocking(move || {
        let mut recorder = recorder;
        recorder.release();
    })
    .await?;

    let media = outcome?;
    println!();
    println!("Recording saved to: {}", media.file_path.display());
    println!("  Duration: {:.3}s", us_to_secs(media.duration_us));
    Ok(())
}

async fn drive(
    recorder: &MediaRecorder,
    events: &mut UnboundedReceiver<RecorderEvent>,
    duration_secs: f64,
) -> anyhow::Result<MediaInfo> {
    loop {
        match events.recv().await {
            Some(RecorderEvent::Started) => break,
            Some(RecorderEvent::Failed(failure)) => anyhow::bail!("{failure}"),
            Some(_) => {}
            None => anyhow::bail!("recorder stopped unexpectedly"),
        }
    }
    println!("Recording... press Ctrl+C to stop early");

    let frames = (duration_secs * FRAME_RATE as f64).round() as u64;
    let mut ticker = tokio::time::interval(Duration::from_micros(frame_interval_us() as u64));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut index = 0;
    while index < frames {
        tokio::select! {
            _ = ticker.tick() => {
                let texture = TextureId((index % 8) as u32 + 1);
                recorder.on_frame_available(texture, frame_timestamp_ns(FIRST_FRAME_NS, index));
                index += 1;
            }
            event = events.recv() => {
                if let Some(media) = handle_event(event)? {
                    return Ok(media);
                }
            }
            _ = &mut ctrl_c => {
                println!("Stopping...");
                break;
            }
        }
    }

    recorder.stop_recording();
    loop {
        if let Some(media) = handle_event(events.recv().await)? {
            return Ok(media);
        }
    }
}

/// Print an event. Returns the artifact once the session is complete.
fn handle_event(event: Option<RecorderEvent>) -> anyhow::Result<Option<MediaInfo>> {
    match event {
        Some(RecorderEvent::Progress { duration_us }) => {
            tracing::debug!(duration_us, "Progress");
            Ok(None)
        }
        Some(RecorderEvent::TrackFinished(info)) => {
            print_track(&info);
            Ok(None)
        }
        Some(RecorderEvent::Finished(media)) => Ok(Some(media)),
        Some(RecorderEvent::Failed(failure)) => anyhow::bail!("{failure}"),
        Some(RecorderEvent::Started) => Ok(None),
        None => anyhow::bail!("recorder stopped unexpectedly"),
    }
}

fn print_track(info: &RecordInfo) {
    if info.failed {
        println!("  {} track failed: {}", info.track_type, info.file_path.display());
    } else {
        println!(
            "  {} track: {} ({:.3}s)",
            info.track_type,
            info.file_path.display(),
            us_to_secs(info.duration_us)
        );
    }
}
