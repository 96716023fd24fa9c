use atlascap::{
    CaptureConfig, CaptureSession, EncoderCodec, EncoderSettings, InMemoryHost, SinkSpec,
    SourceConfig, encoder_on_path,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let out = std::env::temp_dir().join("atlascap_demo");
    if encoder_on_path("ffmpeg") {
        println!("ffmpeg found, screen goes to mp4");
    } else {
        println!("no ffmpeg, screen falls back to PNG files");
    }

    let cfg = CaptureConfig {
        sources: vec![
            SourceConfig {
                name: "cam".into(),
                width: 64,
                height: 48,
                sink: SinkSpec::Files {
                    dir: out.join("cam"),
                },
            },
            SourceConfig {
                name: "screen".into(),
                width: 128,
                height: 96,
                sink: SinkSpec::Encoder {
                    out_path: out.join("screen.mp4"),
                    settings: EncoderSettings {
                        codec: EncoderCodec::Software {
                            crf: 28,
                            preset: "veryfast".into(),
                        },
                        ..EncoderSettings::default()
                    },
                    fallback_dir: Some(out.join("screen")),
                },
            },
        ],
        ..CaptureConfig::default()
    };

    let mut host = InMemoryHost::new();
    let mut session = CaptureSession::start(cfg, &mut host)?;
    let layout = session.layout();
    println!(
        "composite {}x{}, {} sources in a {}x{} grid",
        layout.width,
        layout.height,
        layout.source_count(),
        layout.columns,
        layout.rows
    );

    for _ in 0..30 {
        session.tick(&mut host)?;
    }

    let stats = session.shutdown(&mut host);
    println!(
        "{} ticks, {} frames dispatched, {} dropped, {} write failures",
        stats.ticks, stats.frames_dispatched, stats.frames_dropped, stats.write_failures
    );
    println!("output under {}", out.display());

    Ok(())
}
