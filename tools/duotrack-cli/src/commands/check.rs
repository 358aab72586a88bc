//! Probe encoders and print the effective configuration.

use duotrack_common::config::AppConfig;
use duotrack_media_core::TrackType;
use duotrack_platform_gst::probe_encoders;

pub fn run(config: AppConfig, write_config: bool) -> anyhow::Result<()> {
    println!("duotrack System Check");
    println!("{}", "=".repeat(50));

    match probe_encoders() {
        Ok(report) => {
            println!("[OK] GStreamer: {}", report.gstreamer_version);
            for encoder in &report.encoders {
                println!(
                    "     {:<14} {:<6} {:<18} {}",
                    encoder.element,
                    encoder.track.to_string(),
                    encoder.api,
                    if encoder.hardware { "(hardware)" } else { "" }
                );
            }
            for track in [TrackType::Video, TrackType::Audio] {
                match report.preferred(track) {
                    Some(encoder) => println!("[OK] Preferred {track} encoder: {}", encoder.element),
                    None => println!("[WARN] No {track} encoder found"),
                }
            }
            if !report.has_hardware_video() {
                println!("[WARN] No hardware H.264 encoder; video would be encoded in software");
            }
        }
        Err(e) => println!("[WARN] GStreamer unavailable: {e}"),
    }

    println!();
    println!("Configuration ({}):", AppConfig::path().display());
    println!("{}", serde_json::to_string_pretty(&config)?);

    if write_config {
        config.save()?;
        println!();
        println!("Configuration written to {}", AppConfig::path().display());
    }
    Ok(())
}
