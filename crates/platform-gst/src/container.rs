//! MP4 muxing and demuxing through GStreamer.
//!
//! The writer only builds its pipeline at `start`, once every track is
//! known: one appsrc per track feeding `mp4mux`. The reader runs
//! `filesrc ! qtdemux` to end-of-stream up front, collecting every H.264
//! and AAC access unit in file order, then serves them with the same cursor
//! semantics as any other [`ContainerReader`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    ContainerReader, ContainerWriter, SampleFlags, SampleInfo, TrackFormat, TrackType,
};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;

use crate::caps::{format_from_caps, track_caps};
use crate::pipeline::{clock_from_us, escape_path, timed_buffer, LaunchedPipeline, EOS_TIMEOUT};

fn container_error(message: String) -> DuotrackError {
    DuotrackError::container(message)
}

/// `mp4mux` launch string with one named appsrc per track.
pub fn writer_launch(path: &Path, tracks: &[TrackType]) -> String {
    let mut launch = format!(
        "mp4mux name=mux ! filesink location=\"{}\"",
        escape_path(path)
    );
    let (mut videos, mut audios) = (0, 0);
    for (index, track) in tracks.iter().enumerate() {
        let pad = match track {
            TrackType::Video => {
                videos += 1;
                format!("video_{}", videos - 1)
            }
            TrackType::Audio => {
                audios += 1;
                format!("audio_{}", audios - 1)
            }
        };
        launch.push_str(&format!(
            " appsrc name=track{index} format=time ! queue ! mux.{pad}"
        ));
    }
    launch
}

pub struct Mp4Writer {
    path: PathBuf,
    formats: Vec<TrackFormat>,
    pipeline: Option<LaunchedPipeline>,
    sources: Vec<gst_app::AppSrc>,
    stopped: bool,
    released: bool,
}

impl Mp4Writer {
    pub fn create(path: &Path) -> DuotrackResult<Self> {
        // Truncate now so a stale file never outlives a failed session.
        std::fs::File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            formats: Vec::new(),
            pipeline: None,
            sources: Vec::new(),
            stopped: false,
            released: false,
        })
    }

    fn ensure_live(&self) -> DuotrackResult<()> {
        if self.released {
            return Err(DuotrackError::container("writer released"));
        }
        Ok(())
    }
}

impl ContainerWriter for Mp4Writer {
    fn add_track(&mut self, format: &TrackFormat) -> DuotrackResult<usize> {
        self.ensure_live()?;
        if self.pipeline.is_some() {
            return Err(DuotrackError::container("cannot add a track after start"));
        }
        format
            .track_type()
            .ok_or_else(|| DuotrackError::container(format!("unknown mime {}", format.mime())))?;
        track_caps(format)?;
        self.formats.push(format.clone());
        Ok(self.formats.len() - 1)
    }

    fn start(&mut self) -> DuotrackResult<()> {
        self.ensure_live()?;
        if self.pipeline.is_some() {
            return Err(DuotrackError::container("writer already started"));
        }
        if self.formats.is_empty() {
            return Err(DuotrackError::container("no tracks to write"));
        }
        let kinds: Vec<TrackType> = self
            .formats
            .iter()
            .filter_map(TrackFormat::track_type)
            .collect();
        let pipeline = LaunchedPipeline::from_launch(
            "muxer",
            &writer_launch(&self.path, &kinds),
            container_error,
        )?;
        let mut sources = Vec::with_capacity(self.formats.len());
        for (index, format) in self.formats.iter().enumerate() {
            let appsrc = pipeline.element::<gst_app::AppSrc>(&format!("track{index}"))?;
            appsrc.set_caps(Some(&track_caps(format)?));
            sources.push(appsrc);
        }
        pipeline.play()?;
        tracing::debug!(path = %self.path.display(), tracks = kinds.len(), "MP4 muxer started");
        self.sources = sources;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.pipeline.is_some()
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> DuotrackResult<()> {
        self.ensure_live()?;
        if self.stopped {
            return Err(DuotrackError::container("writer already stopped"));
        }
        let appsrc = self
            .sources
            .get(track)
            .ok_or_else(|| DuotrackError::container(format!("unknown track {track}")))?;
        let key = info.flags.contains(SampleFlags::KEY_FRAME)
            || matches!(self.formats.get(track), Some(TrackFormat::Audio(_)));
        let payload = data.get(..info.size).unwrap_or(data);
        appsrc
            .push_buffer(timed_buffer(payload, clock_from_us(info.pts_us), key))
            .map_err(|e| DuotrackError::container(format!("Sample rejected: {e:?}")))?;
        Ok(())
    }

    fn stop(&mut self) -> DuotrackResult<()> {
        self.ensure_live()?;
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Err(DuotrackError::container("writer never started"));
        };
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        for appsrc in &self.sources {
            appsrc
                .end_of_stream()
                .map_err(|e| DuotrackError::container(format!("End of track rejected: {e:?}")))?;
        }
        let drained = pipeline.await_eos(EOS_TIMEOUT);
        pipeline.shut_down();
        drained?;
        tracing::debug!(path = %self.path.display(), "MP4 file finalized");
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sources.clear();
            if let Some(mut pipeline) = self.pipeline.take() {
                pipeline.shut_down();
            }
        }
    }
}

impl Drop for Mp4Writer {
    fn drop(&mut self) {
        self.release();
    }
}

struct DemuxedSample {
    track: usize,
    info: SampleInfo,
    data: Vec<u8>,
}

#[derive(Default)]
struct Demuxed {
    formats: Vec<TrackFormat>,
    samples: Vec<DemuxedSample>,
}

fn sample_record(track: usize, sample: &gst::Sample) -> Option<DemuxedSample> {
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    let flags = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
        SampleFlags::NONE
    } else {
        SampleFlags::KEY_FRAME
    };
    Some(DemuxedSample {
        track,
        info: SampleInfo {
            pts_us: buffer.pts().map_or(0, |t| t.useconds() as i64),
            size: map.as_slice().len(),
            flags,
        },
        data: map.as_slice().to_vec(),
    })
}

/// Route a new demuxer pad to an appsink recording into `demuxed`, or to a
/// fakesink when it carries neither H.264 nor AAC.
fn attach_pad(
    pipeline: &gst::Pipeline,
    pad: &gst::Pad,
    demuxed: &Arc<Mutex<Demuxed>>,
) -> DuotrackResult<()> {
    let format = pad.current_caps().and_then(|caps| format_from_caps(&caps));
    let sink: gst::Element = match format {
        Some(format) => {
            let track = {
                let mut demuxed = demuxed.lock();
                demuxed.formats.push(format);
                demuxed.formats.len() - 1
            };
            let store = demuxed.clone();
            let appsink = gst_app::AppSink::builder().sync(false).build();
            appsink.set_callbacks(
                gst_app::AppSinkCallbacks::builder()
                    .new_sample(move |sink| {
                        let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                        if let Some(record) = sample_record(track, &sample) {
                            store.lock().samples.push(record);
                        }
                        Ok(gst::FlowSuccess::Ok)
                    })
                    .build(),
            );
            appsink.upcast()
        }
        None => {
            tracing::debug!(pad = %pad.name(), "Ignoring unsupported stream");
            gst::ElementFactory::make("fakesink")
                .property("sync", false)
                .build()
                .map_err(|e| DuotrackError::container(format!("fakesink unavailable: {e}")))?
        }
    };
    pipeline
        .add(&sink)
        .map_err(|e| DuotrackError::container(format!("Failed to add sink: {e}")))?;
    sink.sync_state_with_parent()
        .map_err(|e| DuotrackError::container(format!("Failed to start sink: {e}")))?;
    let sink_pad = sink
        .static_pad("sink")
        .ok_or_else(|| DuotrackError::container("sink has no pad"))?;
    pad.link(&sink_pad)
        .map_err(|e| DuotrackError::container(format!("Failed to link demuxer: {e:?}")))?;
    Ok(())
}

pub struct Mp4Reader {
    formats: Vec<TrackFormat>,
    samples: Vec<DemuxedSample>,
    selected: Vec<bool>,
    cursor: usize,
    released: bool,
}

impl Mp4Reader {
    pub fn open(path: &Path) -> DuotrackResult<Self> {
        if !path.exists() {
            return Err(DuotrackError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let launch = format!(
            "filesrc location=\"{}\" ! qtdemux name=demux",
            escape_path(path)
        );
        let mut pipeline = LaunchedPipeline::from_launch("demuxer", &launch, container_error)?;
        let demuxed = Arc::new(Mutex::new(Demuxed::default()));

        let demux = pipeline.element::<gst::Element>("demux")?;
        let weak = pipeline.pipeline()?.downgrade();
        let store = demuxed.clone();
        demux.connect_pad_added(move |_, pad| {
            let Some(pipeline) = weak.upgrade() else {
                return;
            };
            if let Err(e) = attach_pad(&pipeline, pad, &store) {
                tracing::warn!(error = %e, "Demuxer stream dropped");
            }
        });

        pipeline.play()?;
        let drained = pipeline.await_eos(EOS_TIMEOUT);
        pipeline.shut_down();
        drained?;

        let Demuxed { formats, samples } = std::mem::take(&mut *demuxed.lock());
        tracing::debug!(
            path = %path.display(),
            tracks = formats.len(),
            samples = samples.len(),
            "MP4 file loaded"
        );
        Ok(Self {
            selected: vec![false; formats.len()],
            formats,
            samples,
            cursor: 0,
            released: false,
        })
    }

    fn current(&self) -> Option<usize> {
        (self.cursor..self.samples.len()).find(|&i| self.selected[self.samples[i].track])
    }
}

impl ContainerReader for Mp4Reader {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, index: usize) -> Option<&TrackFormat> {
        self.formats.get(index)
    }

    fn select_track(&mut self, index: usize) -> DuotrackResult<()> {
        let slot = self
            .selected
            .get_mut(index)
            .ok_or_else(|| DuotrackError::container(format!("unknown track {index}")))?;
        *slot = true;
        self.cursor = 0;
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) {
        if let Some(slot) = self.selected.get_mut(index) {
            *slot = false;
        }
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> DuotrackResult<Option<SampleInfo>> {
        if self.released {
            return Err(DuotrackError::container("reader already released"));
        }
        let Some(index) = self.current() else {
            return Ok(None);
        };
        let sample = &self.samples[index];
        buf.clear();
        buf.extend_from_slice(&sample.data);
        Ok(Some(sample.info))
    }

    fn advance(&mut self) -> bool {
        match self.current() {
            Some(index) => {
                self.cursor = index + 1;
                self.current().is_some()
            }
            None => false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.samples = Vec::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_launch_names_one_pad_per_track() {
        let launch = writer_launch(
            Path::new("/tmp/out.mp4"),
            &[TrackType::Audio, TrackType::Video],
        );
        assert_eq!(
            launch,
            "mp4mux name=mux ! filesink location=\"/tmp/out.mp4\" \
             appsrc name=track0 format=time ! queue ! mux.audio_0 \
             appsrc name=track1 format=time ! queue ! mux.video_0"
        );
    }

    #[test]
    fn missing_file_is_reported_as_such() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Mp4Reader::open(&dir.path().join("none.mp4")),
            Err(DuotrackError::FileNotFound { .. })
        ));
    }

    #[test]
    fn writer_refuses_samples_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::create(&dir.path().join("out.mp4")).unwrap();
        let info = SampleInfo {
            pts_us: 0,
            size: 1,
            flags: SampleFlags::KEY_FRAME,
        };
        assert!(writer.write_sample(0, &[0], &info).is_err());
        assert!(!writer.is_started());
        assert!(writer.stop().is_err());
        writer.release();
        assert!(writer.start().is_err());
    }
}
