//! Encode, mux and demux through real GStreamer elements. Skipped on hosts
//! without the plugins.

use std::time::Duration;

use duotrack_media_core::{
    AvcLevel, AvcProfile, ContainerReader, ContainerWriter, Encoder, EncoderOutput,
    GraphicsContext, TextureId, TrackFormat, VideoFormat, MIME_VIDEO_AVC,
};
use duotrack_platform_gst::{GstEncoder, Mp4Reader, Mp4Writer, RasterGraphics};

fn plugins_present(elements: &[&str]) -> bool {
    gstreamer::init().is_ok()
        && elements
            .iter()
            .all(|e| gstreamer::ElementFactory::find(e).is_some())
}

fn small_video() -> TrackFormat {
    TrackFormat::Video(VideoFormat {
        mime: MIME_VIDEO_AVC.to_string(),
        width: 64,
        height: 48,
        bit_rate: 500_000,
        frame_rate: 30,
        i_frame_interval: 1,
        profile: AvcProfile::High,
        level: AvcLevel::Level31,
        codec_config: Vec::new(),
    })
}

#[test]
fn encoded_frames_survive_mp4_round_trip() {
    if !plugins_present(&[
        "appsrc", "appsink", "videoconvert", "x264enc", "h264parse", "mp4mux", "qtdemux",
    ]) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");

    let mut encoder = GstEncoder::configure("x264enc", &small_video()).unwrap();
    let input = encoder.create_input_surface().unwrap();
    encoder.start().unwrap();
    let mut surface = RasterGraphics.create_window_surface(&input).unwrap();
    for i in 0..30u32 {
        surface.make_current().unwrap();
        surface.draw_texture(TextureId(i % 4 + 1)).unwrap();
        surface.set_presentation_time(i as i64 * 33_333_333);
        surface.swap_buffers().unwrap();
    }
    encoder.signal_end_of_input().unwrap();

    let mut writer = Mp4Writer::create(&path).unwrap();
    let mut track = None;
    let mut written = 0;
    loop {
        match encoder.dequeue_output(Duration::from_secs(5)).unwrap() {
            EncoderOutput::TryAgainLater => panic!("encoder stalled"),
            EncoderOutput::FormatChanged(format) => {
                assert!(!format.as_video().unwrap().codec_config.is_empty());
                track = Some(writer.add_track(&format).unwrap());
                writer.start().unwrap();
            }
            EncoderOutput::Chunk(chunk) if chunk.is_end_of_stream() => break,
            EncoderOutput::Chunk(chunk) if chunk.is_codec_config() => {}
            EncoderOutput::Chunk(chunk) => {
                writer
                    .write_sample(track.unwrap(), &chunk.data, &chunk.info)
                    .unwrap();
                written += 1;
            }
        }
    }
    writer.stop().unwrap();
    writer.release();
    surface.release();
    encoder.release();
    assert_eq!(written, 30);

    let mut reader = Mp4Reader::open(&path).unwrap();
    assert_eq!(reader.track_count(), 1);
    let format = reader.track_format(0).unwrap().as_video().unwrap().clone();
    assert_eq!((format.width, format.height), (64, 48));
    reader.select_track(0).unwrap();
    let mut buf = Vec::new();
    let mut samples = Vec::new();
    while let Some(info) = reader.read_sample(&mut buf).unwrap() {
        samples.push(info);
        if !reader.advance() {
            break;
        }
    }
    assert_eq!(samples.len(), 30);
    assert!(samples[0]
        .flags
        .contains(duotrack_media_core::SampleFlags::KEY_FRAME));
    reader.release();
}
