//! Audio/video remuxing.

use std::path::Path;
use std::time::Instant;

use duotrack_common::clock::MICROS_PER_SEC;
use duotrack_common::error::{codes, DuotrackError, DuotrackResult};
use duotrack_media_core::{
    ContainerReader, ContainerWriter, MediaBackend, SampleInfo, TrackFormat, TrackType,
};

/// Counters for a completed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    pub audio_samples: u64,
    pub video_samples: u64,
    /// Presentation time of the last video sample written.
    pub video_end_us: i64,
    pub elapsed_ms: u64,
}

/// Open handles of one merge. Everything still held is released on drop.
#[derive(Default)]
struct MergeHandles {
    video: Option<Box<dyn ContainerReader>>,
    audio: Option<Box<dyn ContainerReader>>,
    muxer: Option<Box<dyn ContainerWriter>>,
}

impl Drop for MergeHandles {
    fn drop(&mut self) {
        if let Some(mut muxer) = self.muxer.take() {
            if muxer.is_started() {
                if let Err(e) = muxer.stop() {
                    tracing::warn!(error = %e, "Failed to finalize merge output");
                }
            }
            muxer.release();
        }
        if let Some(mut reader) = self.audio.take() {
            reader.release();
        }
        if let Some(mut reader) = self.video.take() {
            reader.release();
        }
    }
}

/// Merge the video track of `video_path` and the audio track of
/// `audio_path` into `output_path`.
///
/// Returns [`codes::OK`] on success, [`codes::MERGE_MISSING_AUDIO`] or
/// [`codes::MERGE_MISSING_VIDEO`] when an input lacks its track, and
/// [`codes::MERGE_IO`] for any demux, mux or file failure.
pub fn merge(
    backend: &dyn MediaBackend,
    video_path: &Path,
    audio_path: &Path,
    output_path: &Path,
) -> i32 {
    match try_merge(backend, video_path, audio_path, output_path) {
        Ok(stats) => {
            tracing::info!(
                output = %output_path.display(),
                audio_samples = stats.audio_samples,
                video_samples = stats.video_samples,
                elapsed_ms = stats.elapsed_ms,
                "Merge finished"
            );
            codes::OK
        }
        Err(e) => {
            let code = merge_code(&e);
            tracing::error!(error = %e, code, output = %output_path.display(), "Merge failed");
            code
        }
    }
}

/// Like [`merge`], but returns the failure itself. Errors are always
/// [`DuotrackError::Merge`] carrying the numeric code.
pub fn try_merge(
    backend: &dyn MediaBackend,
    video_path: &Path,
    audio_path: &Path,
    output_path: &Path,
) -> DuotrackResult<MergeStats> {
    let started = Instant::now();
    let result = {
        let mut handles = MergeHandles::default();
        remux(
            backend,
            &mut handles,
            video_path,
            audio_path,
            output_path,
        )
    };
    match result {
        Ok(mut stats) => {
            stats.elapsed_ms = started.elapsed().as_millis() as u64;
            Ok(stats)
        }
        Err(e) => {
            if output_path.exists() {
                let _ = std::fs::remove_file(output_path);
            }
            Err(DuotrackError::merge(merge_code(&e), e.to_string()))
        }
    }
}

fn merge_code(error: &DuotrackError) -> i32 {
    match error {
        DuotrackError::Merge { code, .. } => *code,
        _ => codes::MERGE_IO,
    }
}

fn remux(
    backend: &dyn MediaBackend,
    handles: &mut MergeHandles,
    video_path: &Path,
    audio_path: &Path,
    output_path: &Path,
) -> DuotrackResult<MergeStats> {
    let muxer = handles.muxer.insert(backend.create_writer(output_path)?);

    let audio = handles.audio.insert(backend.open_reader(audio_path)?);
    let (audio_index, audio_format) = find_track(&**audio, TrackType::Audio).ok_or_else(|| {
        DuotrackError::merge(
            codes::MERGE_MISSING_AUDIO,
            format!("no audio track in {}", audio_path.display()),
        )
    })?;

    let video = handles.video.insert(backend.open_reader(video_path)?);
    let (video_index, video_format) = find_track(&**video, TrackType::Video).ok_or_else(|| {
        DuotrackError::merge(
            codes::MERGE_MISSING_VIDEO,
            format!("no video track in {}", video_path.display()),
        )
    })?;
    let frame_rate = video_format
        .as_video()
        .map(|v| v.frame_rate)
        .filter(|&rate| rate > 0)
        .ok_or_else(|| DuotrackError::container("video track has no frame rate"))?;

    let audio_track = muxer.add_track(&audio_format)?;
    let video_track = muxer.add_track(&video_format)?;
    muxer.start()?;

    let mut stats = MergeStats::default();
    let mut buf = Vec::new();

    // Audio keeps its source timestamps.
    copy_track(&mut **audio, audio_index, &mut buf, |data, info| {
        muxer.write_sample(audio_track, data, &info)?;
        stats.audio_samples += 1;
        Ok(())
    })?;

    // Video is retimed at a fixed interval, first sample one interval in.
    let interval_us = MICROS_PER_SEC / frame_rate as i64;
    let mut pts_us = 0i64;
    copy_track(&mut **video, video_index, &mut buf, |data, info| {
        pts_us += interval_us;
        let retimed = SampleInfo { pts_us, ..info };
        muxer.write_sample(video_track, data, &retimed)?;
        stats.video_samples += 1;
        Ok(())
    })?;
    stats.video_end_us = pts_us;

    muxer.stop()?;
    if let Some(mut muxer) = handles.muxer.take() {
        muxer.release();
    }
    Ok(stats)
}

fn find_track(reader: &dyn ContainerReader, wanted: TrackType) -> Option<(usize, TrackFormat)> {
    (0..reader.track_count()).find_map(|i| {
        reader
            .track_format(i)
            .filter(|f| f.track_type() == Some(wanted))
            .map(|f| (i, f.clone()))
    })
}

/// Feed every non-empty sample of track `index` to `write`. Only the end
/// of data ends the copy.
fn copy_track(
    reader: &mut dyn ContainerReader,
    index: usize,
    buf: &mut Vec<u8>,
    mut write: impl FnMut(&[u8], SampleInfo) -> DuotrackResult<()>,
) -> DuotrackResult<()> {
    reader.select_track(index)?;
    while let Some(info) = reader.read_sample(buf)? {
        if info.size > 0 {
            write(buf.as_slice(), info)?;
        } else {
            tracing::debug!(track = index, pts_us = info.pts_us, "Skipping empty sample");
        }
        if !reader.advance() {
            break;
        }
    }
    reader.unselect_track(index);
    Ok(())
}
