use std::path::PathBuf;
use std::time::Duration;

use atlascap::{
    CaptureConfig, CaptureSession, EncoderCodec, EncoderSettings, InMemoryHost, SinkSpec,
    SourceConfig, TickOutcome, encoder_on_path,
};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "atlascap_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn fast_settings() -> EncoderSettings {
    EncoderSettings {
        codec: EncoderCodec::Software {
            crf: 30,
            preset: "veryfast".into(),
        },
        ..EncoderSettings::default()
    }
}

#[test]
fn two_sources_stream_into_nonempty_mp4s() {
    if !encoder_on_path("ffmpeg") {
        return;
    }
    let root = temp_dir("smoke_mp4");
    let cam_out = root.join("cam.mp4");
    let screen_out = root.join("screen.mp4");

    let cfg = CaptureConfig {
        sources: vec![
            SourceConfig {
                name: "cam".into(),
                width: 64,
                height: 64,
                sink: SinkSpec::Encoder {
                    out_path: cam_out.clone(),
                    settings: fast_settings(),
                    fallback_dir: None,
                },
            },
            SourceConfig {
                name: "screen".into(),
                width: 32,
                height: 32,
                sink: SinkSpec::Encoder {
                    out_path: screen_out.clone(),
                    settings: fast_settings(),
                    fallback_dir: None,
                },
            },
        ],
        pending_ceiling: 64,
        shutdown_grace: Duration::from_secs(10),
        ..CaptureConfig::default()
    };

    let mut host = InMemoryHost::new();
    let mut session = CaptureSession::start(cfg, &mut host).unwrap();
    for _ in 0..12 {
        assert!(matches!(
            session.tick(&mut host).unwrap(),
            TickOutcome::Frame {
                transfer_issued: true,
                ..
            }
        ));
    }

    let stats = session.shutdown(&mut host);
    assert_eq!(stats.ticks, 12);
    assert_eq!(stats.frames_dispatched, 24);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.write_failures, 0);

    let cam_len = std::fs::metadata(&cam_out).unwrap().len();
    let screen_len = std::fs::metadata(&screen_out).unwrap().len();
    assert!(cam_len > 0, "cam.mp4 is empty");
    assert!(screen_len > 0, "screen.mp4 is empty");

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn missing_encoder_falls_back_to_png_files() {
    let root = temp_dir("smoke_fallback");
    let fallback = root.join("frames");

    let cfg = CaptureConfig {
        sources: vec![SourceConfig {
            name: "cam".into(),
            width: 4,
            height: 2,
            sink: SinkSpec::Encoder {
                out_path: root.join("cam.mp4"),
                settings: EncoderSettings {
                    program: "definitely-not-an-encoder-binary".into(),
                    ..fast_settings()
                },
                fallback_dir: Some(fallback.clone()),
            },
        }],
        ..CaptureConfig::default()
    };

    let mut host = InMemoryHost::new();
    let mut session = CaptureSession::start(cfg, &mut host).unwrap();
    session.tick(&mut host).unwrap();
    session.tick(&mut host).unwrap();
    let stats = session.shutdown(&mut host);

    assert_eq!(stats.frames_dispatched, 2);
    assert!(fallback.join("cam_000000.png").is_file());
    assert!(fallback.join("cam_000001.png").is_file());
    assert!(!root.join("cam.mp4").exists());

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn a_dead_encoder_does_not_take_other_sources_down() {
    let root = temp_dir("smoke_disabled");
    let hud_dir = root.join("hud");

    let cfg = CaptureConfig {
        sources: vec![
            SourceConfig {
                name: "cam".into(),
                width: 4,
                height: 2,
                sink: SinkSpec::Encoder {
                    out_path: root.join("cam.mp4"),
                    settings: EncoderSettings {
                        program: "definitely-not-an-encoder-binary".into(),
                        ..fast_settings()
                    },
                    fallback_dir: None,
                },
            },
            SourceConfig {
                name: "hud".into(),
                width: 4,
                height: 2,
                sink: SinkSpec::Files {
                    dir: hud_dir.clone(),
                },
            },
        ],
        ..CaptureConfig::default()
    };

    let mut host = InMemoryHost::new();
    let mut session = CaptureSession::start(cfg, &mut host).unwrap();
    session.tick(&mut host).unwrap();
    session.tick(&mut host).unwrap();
    let stats = session.shutdown(&mut host);

    // Only the healthy lane counts dispatches; the disabled one discards.
    assert_eq!(stats.frames_dispatched, 2);
    assert!(hud_dir.join("hud_000001.png").is_file());
    assert!(!root.join("cam.mp4").exists());

    std::fs::remove_dir_all(&root).ok();
}
