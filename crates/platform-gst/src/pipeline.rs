//! Launch-string pipelines shared by the encoder, container and microphone
//! wrappers.

use std::path::Path;
use std::time::{Duration, Instant};

use duotrack_common::error::{DuotrackError, DuotrackResult};
use gstreamer as gst;
use gstreamer::prelude::*;

use crate::probe::init_gstreamer;

/// How long `finish` waits for end-of-stream to reach the sinks.
pub(crate) const EOS_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed pipeline that maps its failures to one error kind.
pub(crate) struct LaunchedPipeline {
    name: &'static str,
    pipeline: Option<gst::Pipeline>,
    fail: fn(String) -> DuotrackError,
}

impl LaunchedPipeline {
    pub fn from_launch(
        name: &'static str,
        launch: &str,
        fail: fn(String) -> DuotrackError,
    ) -> DuotrackResult<Self> {
        init_gstreamer()?;
        tracing::debug!(pipeline = name, %launch, "Building pipeline");

        let element = gst::parse::launch(launch)
            .map_err(|e| fail(format!("Failed to build {name} pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| fail(format!("{name} launch string did not produce a pipeline")))?;

        Ok(Self {
            name,
            pipeline: Some(pipeline),
            fail,
        })
    }

    fn inner(&self) -> DuotrackResult<&gst::Pipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| (self.fail)(format!("{} pipeline already shut down", self.name)))
    }

    pub fn pipeline(&self) -> DuotrackResult<&gst::Pipeline> {
        self.inner()
    }

    /// Named element of the pipeline as its concrete type.
    pub fn element<T: IsA<gst::Element>>(&self, name: &str) -> DuotrackResult<T> {
        self.inner()?
            .by_name(name)
            .ok_or_else(|| (self.fail)(format!("{} pipeline has no element {name}", self.name)))?
            .dynamic_cast::<T>()
            .map_err(|_| (self.fail)(format!("{name} has an unexpected element type")))
    }

    pub fn play(&self) -> DuotrackResult<()> {
        self.inner()?
            .set_state(gst::State::Playing)
            .map_err(|e| (self.fail)(format!("Failed to start {} pipeline: {e:?}", self.name)))?;
        tracing::debug!(pipeline = self.name, "Pipeline playing");
        Ok(())
    }

    /// Surface the first error posted on the bus, if any.
    pub fn check_bus(&self) -> DuotrackResult<()> {
        let Some(bus) = self.inner()?.bus() else {
            return Ok(());
        };
        match bus.pop_filtered(&[gst::MessageType::Error]) {
            Some(message) => match message.view() {
                gst::MessageView::Error(e) => Err((self.fail)(format!(
                    "{} pipeline error: {}",
                    self.name,
                    e.error()
                ))),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Wait until end-of-stream reaches the sinks or the pipeline errors.
    pub fn await_eos(&self, timeout: Duration) -> DuotrackResult<()> {
        let Some(bus) = self.inner()?.bus() else {
            return Err((self.fail)(format!("{} pipeline has no bus", self.name)));
        };
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err((self.fail)(format!(
                    "{} pipeline did not drain within {timeout:?}",
                    self.name
                )));
            }
            let wait = gst::ClockTime::from_nseconds(remaining.as_nanos() as u64);
            match bus.timed_pop_filtered(wait, &[gst::MessageType::Eos, gst::MessageType::Error]) {
                Some(message) => match message.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!(pipeline = self.name, "EOS received; pipeline drained");
                        return Ok(());
                    }
                    gst::MessageView::Error(e) => {
                        return Err((self.fail)(format!(
                            "{} pipeline error during drain: {}",
                            self.name,
                            e.error()
                        )));
                    }
                    _ => {}
                },
                None => continue,
            }
        }
    }

    /// Set the pipeline to Null and drop it. Idempotent.
    pub fn shut_down(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(pipeline = self.name, error = ?e, "Failed to stop pipeline");
            }
        }
    }
}

impl Drop for LaunchedPipeline {
    fn drop(&mut self) {
        self.shut_down();
    }
}

pub(crate) fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

pub(crate) fn clock_from_us(pts_us: i64) -> gst::ClockTime {
    gst::ClockTime::from_useconds(pts_us.max(0) as u64)
}

pub(crate) fn clock_from_duration(timeout: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(timeout.as_nanos() as u64)
}

/// Owned buffer stamped with `pts`, flagged as a delta unit unless `key`.
pub(crate) fn timed_buffer(data: &[u8], pts: gst::ClockTime, key: bool) -> gst::Buffer {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    {
        let buffer = buffer.make_mut();
        buffer.set_pts(pts);
        buffer.set_dts(pts);
        if !key {
            buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
        }
    }
    buffer
}
