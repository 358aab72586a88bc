//! Show tracks of a container file.

use std::path::PathBuf;

use duotrack_common::clock::us_to_secs;
use duotrack_media_core::TrackFormat;

use crate::backend::{self, BackendChoice};

pub fn run(choice: BackendChoice, path: PathBuf) -> anyhow::Result<()> {
    let backend = backend::for_file(choice, &path)?;
    let mut reader = backend
        .open_reader(&path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;

    println!("File: {} ({})", path.display(), backend.name());
    println!("Tracks: {}", reader.track_count());

    let mut buf = Vec::new();
    for index in 0..reader.track_count() {
        let Some(format) = reader.track_format(index).cloned() else {
            continue;
        };
        match &format {
            TrackFormat::Video(v) => println!(
                "  #{index} {}: {}x{} @ {}fps, {} bps, {:?} level {:?}",
                v.mime, v.width, v.height, v.frame_rate, v.bit_rate, v.profile, v.level
            ),
            TrackFormat::Audio(a) => println!(
                "  #{index} {}: {} Hz x{}, {} bps",
                a.mime, a.sample_rate, a.channel_count, a.bit_rate
            ),
        }

        reader.select_track(index)?;
        let mut samples = 0u64;
        let mut bytes = 0usize;
        let mut first_pts = None;
        let mut last_pts = 0i64;
        while let Some(sample) = reader.read_sample(&mut buf)? {
            samples += 1;
            bytes += sample.size;
            first_pts.get_or_insert(sample.pts_us);
            last_pts = sample.pts_us;
            if !reader.advance() {
                break;
            }
        }
        reader.unselect_track(index);
        let span = last_pts - first_pts.unwrap_or(last_pts);
        println!(
            "     {samples} samples, {bytes} bytes, {:.3}s span",
            us_to_secs(span)
        );
    }

    reader.release();
    Ok(())
}
