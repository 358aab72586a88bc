//! Synthetic microphone producing a fixed amount of PCM.

use std::sync::Arc;
use std::time::Instant;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{MicrophoneConfig, MicrophoneSource};

use crate::ResourceLedger;

/// What the synthetic microphone records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicrophoneSignal {
    /// Total captured audio in microseconds; `None` records until released.
    pub duration_us: Option<i64>,
    /// Sine tone frequency; `None` records silence.
    pub tone_hz: Option<f32>,
    /// Deliver PCM no faster than real time.
    pub paced: bool,
}

impl Default for MicrophoneSignal {
    fn default() -> Self {
        Self {
            duration_us: None,
            tone_hz: None,
            paced: true,
        }
    }
}

impl MicrophoneSignal {
    /// Silence of a fixed length, delivered as fast as it is read.
    pub fn silence(duration_us: i64) -> Self {
        Self {
            duration_us: Some(duration_us),
            tone_hz: None,
            paced: false,
        }
    }
}

pub struct SyntheticMicrophone {
    config: MicrophoneConfig,
    signal: MicrophoneSignal,
    frames_produced: u64,
    total_frames: Option<u64>,
    started_at: Option<Instant>,
    released: bool,
    ledger: Arc<ResourceLedger>,
}

impl SyntheticMicrophone {
    pub(crate) fn open(
        config: &MicrophoneConfig,
        signal: MicrophoneSignal,
        ledger: Arc<ResourceLedger>,
    ) -> DuotrackResult<Self> {
        if config.sample_rate == 0 || config.buffer_size == 0 {
            return Err(DuotrackError::audio(format!(
                "invalid microphone configuration: {} Hz, {} byte buffer",
                config.sample_rate, config.buffer_size
            )));
        }
        ledger.microphone_opened();
        let total_frames = signal
            .duration_us
            .map(|us| (us.max(0) as u64 * config.sample_rate as u64) / 1_000_000);
        Ok(Self {
            config: *config,
            signal,
            frames_produced: 0,
            total_frames,
            started_at: None,
            released: false,
            ledger,
        })
    }

    fn bytes_per_frame(&self) -> usize {
        2 * self.config.channels.channel_count() as usize
    }

    fn sample_at(&self, frame: u64) -> i16 {
        match self.signal.tone_hz {
            Some(hz) => {
                let t = frame as f32 / self.config.sample_rate as f32;
                ((t * hz * std::f32::consts::TAU).sin() * i16::MAX as f32 * 0.25) as i16
            }
            None => 0,
        }
    }
}

impl MicrophoneSource for SyntheticMicrophone {
    fn start(&mut self) -> DuotrackResult<()> {
        if self.released {
            return Err(DuotrackError::audio("microphone released"));
        }
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DuotrackResult<usize> {
        let Some(started_at) = self.started_at else {
            return Err(DuotrackError::audio("microphone not started"));
        };
        if self.released {
            return Err(DuotrackError::audio("microphone released"));
        }
        let frame_bytes = self.bytes_per_frame();
        let mut frames = (buf.len() / frame_bytes) as u64;
        if let Some(total) = self.total_frames {
            frames = frames.min(total.saturating_sub(self.frames_produced));
        }
        if self.signal.paced {
            let due = (started_at.elapsed().as_micros() as u64 * self.config.sample_rate as u64)
                / 1_000_000;
            frames = frames.min(due.saturating_sub(self.frames_produced));
        }

        let channels = self.config.channels.channel_count() as usize;
        for i in 0..frames as usize {
            let sample = self.sample_at(self.frames_produced + i as u64).to_le_bytes();
            for c in 0..channels {
                let at = i * frame_bytes + c * 2;
                buf[at..at + 2].copy_from_slice(&sample);
            }
        }
        self.frames_produced += frames;
        Ok(frames as usize * frame_bytes)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.ledger.microphone_released();
        }
    }
}

impl Drop for SyntheticMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duotrack_media_core::ChannelLayout;

    #[test]
    fn produces_exactly_the_requested_duration() {
        let config = MicrophoneConfig {
            sample_rate: 44_100,
            channels: ChannelLayout::Stereo,
            buffer_size: 3528,
        };
        let mut mic = SyntheticMicrophone::open(
            &config,
            MicrophoneSignal::silence(1_000_000),
            Arc::new(ResourceLedger::default()),
        )
        .unwrap();
        mic.start().unwrap();

        let mut buf = vec![0u8; 3528];
        let mut total = 0;
        loop {
            let n = mic.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 44_100 * 4);
    }

    #[test]
    fn read_before_start_fails() {
        let config = MicrophoneConfig {
            sample_rate: 48_000,
            channels: ChannelLayout::Mono,
            buffer_size: 1920,
        };
        let mut mic = SyntheticMicrophone::open(
            &config,
            MicrophoneSignal::default(),
            Arc::new(ResourceLedger::default()),
        )
        .unwrap();
        assert!(mic.read(&mut [0u8; 64]).is_err());
    }
}
