use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::RecvTimeoutError;
use reelcam::{
    CameraEngine, EngineConfig, ErrorKind, LensFacing, QualityPreset, RecordingResult, SyntheticBackend,
};

fn main() -> anyhow::Result<()> {
    reelcam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: reelcam-cli <record|state> [options]");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "record" => cmd_record(&args[2..]),
        "state" => cmd_state(&args[2..]),
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }
}

struct RecordOptions {
    lens: LensFacing,
    quality: QualityPreset,
    duration_ms: Option<u64>,
    max_duration_ms: Option<u64>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
}

fn parse_record_options(args: &[String]) -> anyhow::Result<RecordOptions> {
    let mut options = RecordOptions {
        lens: LensFacing::Back,
        quality: QualityPreset::Hd,
        duration_ms: None,
        max_duration_ms: None,
        output: None,
        config: None,
        json: false,
    };

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .ok_or_else(|| anyhow!("{} needs a value", flag))
        };
        match flag.as_str() {
            "--lens" => options.lens = LensFacing::from_host(value()?),
            "--quality" => options.quality = value()?.parse()?,
            "--duration-ms" => options.duration_ms = Some(value()?.parse()?),
            "--max-duration-ms" => options.max_duration_ms = Some(value()?.parse()?),
            "--output" => options.output = Some(PathBuf::from(value()?)),
            "--config" => options.config = Some(PathBuf::from(value()?)),
            "--json" => options.json = true,
            other => bail!("unknown option: {}", other),
        }
    }
    Ok(options)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::load_or_default()),
    }
}

fn cmd_record(args: &[String]) -> anyhow::Result<()> {
    let options = parse_record_options(args)?;
    let mut config = load_config(options.config.as_ref())?;
    if let Some(dir) = &options.output {
        config.output.directory = dir.to_string_lossy().into_owned();
    }

    let (done_tx, done_rx) = crossbeam_channel::bounded::<Option<RecordingResult>>(2);
    let auto_tx = done_tx.clone();
    let engine = CameraEngine::builder()
        .backend(Arc::new(SyntheticBackend::new()))
        .config(config)
        .on_recording_auto_stopped(move |result| {
            let _ = auto_tx.try_send(Some(result.clone()));
        })
        .build()?;

    ctrlc::set_handler(move || {
        let _ = done_tx.try_send(None);
    })
    .context("installing Ctrl-C handler")?;

    let state = engine.initialize(options.lens, options.quality)?;
    log::info!(
        "Camera ready: {} zoom {:.1}-{:.1}",
        state.lens,
        state.min_zoom_level,
        state.max_zoom_level
    );

    let session = engine.start_recording(options.max_duration_ms)?;
    if !options.json {
        println!("Recording to {} (Ctrl-C to stop)", session.output.display());
    }

    let wait = options.duration_ms.map(Duration::from_millis);
    let finished = match wait {
        Some(limit) => match done_rx.recv_timeout(limit) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        },
        None => done_rx.recv().ok().flatten(),
    };

    let result = match finished {
        Some(result) => result,
        None => match engine.stop_recording() {
            Ok(result) => result,
            // The timer got there first.
            Err(e) if e.kind() == ErrorKind::NotRecording => done_rx
                .recv_timeout(Duration::from_secs(5))
                .ok()
                .flatten()
                .ok_or(e)?,
            Err(e) => return Err(e.into()),
        },
    };
    engine.release();

    if options.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!(
            "Saved {} ({}x{}, {} ms)",
            result.file_path, result.width, result.height, result.duration_ms
        );
        if let Some(stats) = engine.last_recording_stats() {
            println!(
                "  {} video frames, {} audio frames, {} dropped, {} bytes",
                stats.video_frames,
                stats.audio_frames,
                stats.video_dropped + stats.audio_dropped,
                stats.bytes_written
            );
        }
    }
    Ok(())
}

fn cmd_state(args: &[String]) -> anyhow::Result<()> {
    let engine = CameraEngine::builder()
        .backend(Arc::new(SyntheticBackend::new()))
        .build()?;
    if args.iter().any(|a| a == "--init") {
        engine.initialize(LensFacing::Back, QualityPreset::Fhd)?;
    }
    println!("{}", serde_json::to_string_pretty(&engine.get_state())?);
    Ok(())
}
