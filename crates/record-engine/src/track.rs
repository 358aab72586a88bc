//! Encoder output to container, shared by both pipelines.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    ContainerWriter, Encoder, EncoderOutput, SampleFlags, SampleInfo, TrackType,
};

/// Encoder poll timeout while waiting for end-of-stream.
pub(crate) const DRAIN_POLL: Duration = Duration::from_millis(10);

/// The single-track container a pipeline writes, plus what it has written.
pub(crate) struct TrackWriter {
    track_type: TrackType,
    output_path: PathBuf,
    writer: Option<Box<dyn ContainerWriter>>,
    track: Option<usize>,
    stopped: bool,
    samples_written: u64,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
}

impl TrackWriter {
    pub fn new(track_type: TrackType, output_path: PathBuf, writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            track_type,
            output_path,
            writer: Some(writer),
            track: None,
            stopped: false,
            samples_written: 0,
            first_pts_us: None,
            last_pts_us: None,
        }
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Last written minus first written timestamp.
    pub fn duration_us(&self) -> i64 {
        match (self.first_pts_us, self.last_pts_us) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    /// Move encoder output into the container, timestamping each sample
    /// with `stamp`. Without a deadline this returns as soon as the encoder
    /// has nothing ready; with one it keeps polling until end-of-stream and
    /// fails once the deadline passes. Returns whether anything was written.
    pub fn drain(
        &mut self,
        encoder: &mut dyn Encoder,
        until_eos: Option<Instant>,
        mut stamp: impl FnMut(i64) -> i64,
    ) -> DuotrackResult<bool> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DuotrackError::container("writer released"))?;
        let timeout = if until_eos.is_some() {
            DRAIN_POLL
        } else {
            Duration::ZERO
        };
        let mut written = false;

        loop {
            match encoder.dequeue_output(timeout)? {
                EncoderOutput::TryAgainLater => match until_eos {
                    None => return Ok(written),
                    Some(deadline) if Instant::now() >= deadline => {
                        return Err(DuotrackError::encoder(
                            "encoder did not reach end-of-stream before the drain timeout",
                        ));
                    }
                    Some(_) => {}
                },
                EncoderOutput::FormatChanged(format) => {
                    if self.track.is_some() {
                        return Err(DuotrackError::encoder(format!(
                            "{} format changed twice",
                            self.track_type
                        )));
                    }
                    self.track = Some(writer.add_track(&format)?);
                    writer.start()?;
                    tracing::debug!(
                        track = %self.track_type,
                        path = %self.output_path.display(),
                        "Muxer started"
                    );
                }
                EncoderOutput::Chunk(chunk) => {
                    if chunk.is_codec_config() {
                        tracing::trace!(bytes = chunk.data.len(), "Skipping codec config");
                    } else if chunk.info.size > 0 {
                        let track = self.track.ok_or_else(|| {
                            DuotrackError::container(format!(
                                "{} muxer hasn't started",
                                self.track_type
                            ))
                        })?;
                        let info = SampleInfo {
                            pts_us: stamp(chunk.info.pts_us),
                            size: chunk.info.size,
                            flags: chunk.info.flags.remove(SampleFlags::END_OF_STREAM),
                        };
                        writer.write_sample(track, &chunk.data, &info)?;
                        self.first_pts_us.get_or_insert(info.pts_us);
                        self.last_pts_us = Some(info.pts_us);
                        self.samples_written += 1;
                        written = true;
                    }
                    if chunk.is_end_of_stream() {
                        if until_eos.is_none() {
                            tracing::warn!(track = %self.track_type, "Encoder ended the stream unexpectedly");
                        }
                        return Ok(written);
                    }
                }
            }
        }
    }

    /// Finalize the file if the muxer ever started.
    pub fn finish(&mut self) -> DuotrackResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            if writer.is_started() && !self.stopped {
                writer.stop()?;
                self.stopped = true;
            }
        }
        Ok(())
    }

    /// Free the writer, finalizing what was written if nobody did.
    pub fn release(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(track = %self.track_type, error = %e, "Failed to finalize file");
        }
        if let Some(mut writer) = self.writer.take() {
            writer.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duotrack_media_core::{AudioFormat, MediaBackend, TrackFormat, MIME_AUDIO_AAC};
    use duotrack_media_soft::SoftwareBackend;

    fn audio_format() -> TrackFormat {
        TrackFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 8_000,
            channel_count: 1,
            bit_rate: 64_000,
            max_input_size: 64,
            codec_config: Vec::new(),
        })
    }

    #[test]
    fn drains_until_end_of_stream_and_tracks_the_span() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SoftwareBackend::new();
        let path = dir.path().join("a.tmp");
        let mut encoder = backend.create_encoder(&audio_format()).unwrap();
        encoder.start().unwrap();
        let mut track = TrackWriter::new(
            TrackType::Audio,
            path.clone(),
            backend.create_writer(&path).unwrap(),
        );
        for pts in [0, 4_000, 8_000] {
            encoder.queue_input(&[1; 64], pts, SampleFlags::NONE).unwrap();
        }
        assert!(track.drain(encoder.as_mut(), None, |pts| pts).unwrap());
        encoder.queue_input(&[], 12_000, SampleFlags::END_OF_STREAM).unwrap();
        let deadline = Some(Instant::now() + Duration::from_secs(1));
        assert!(!track.drain(encoder.as_mut(), deadline, |pts| pts).unwrap());

        assert_eq!(track.samples_written(), 3);
        assert_eq!(track.duration_us(), 8_000);
        track.finish().unwrap();
        track.release();
        encoder.release();
        assert!(backend.ledger().snapshot().all_released());
    }

    #[test]
    fn missing_end_of_stream_fails_at_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SoftwareBackend::new();
        let path = dir.path().join("a.tmp");
        let mut encoder = backend.create_encoder(&audio_format()).unwrap();
        encoder.start().unwrap();
        let mut track = TrackWriter::new(
            TrackType::Audio,
            path.clone(),
            backend.create_writer(&path).unwrap(),
        );
        let started = Instant::now();
        let deadline = Some(started + Duration::from_millis(50));
        assert!(track.drain(encoder.as_mut(), deadline, |pts| pts).is_err());
        assert!(started.elapsed() < Duration::from_millis(50) + DRAIN_POLL * 5);
        track.release();
    }
}
