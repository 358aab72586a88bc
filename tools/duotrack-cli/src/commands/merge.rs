//! Merge a video-only and an audio-only intermediate.

use std::path::PathBuf;

use duotrack_merge_engine::try_merge;

use crate::backend::{self, BackendChoice};

pub fn run(
    choice: BackendChoice,
    video: PathBuf,
    audio: PathBuf,
    output: PathBuf,
) -> anyhow::Result<()> {
    // The video intermediate decides the container of the output too.
    let backend = backend::for_file(choice, &video)?;
    let stats = try_merge(backend.as_ref(), &video, &audio, &output).map_err(|e| {
        anyhow::anyhow!("Merge failed with code {}: {e}", e.code())
    })?;

    println!("Merged into: {}", output.display());
    println!("  Audio samples: {}", stats.audio_samples);
    println!("  Video samples: {}", stats.video_samples);
    println!("  Video ends at: {}us", stats.video_end_us);
    println!("  Took: {}ms", stats.elapsed_ms);
    Ok(())
}
