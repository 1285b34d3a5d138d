use anyhow::{bail, Context, Result};
use burner::{
    scan::collect_jobs,
    sidecar::preview_path,
    AppConfig, AudioMode, BatchController, BatchSummary, BurnEvent, EncodePreset, EncodeSettings,
    EventSink, FfmpegCommandBuilder, FinishAction, LogSink, SubtitleColor, SystemMonitor,
};
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::io::BufRead;
use tokio::process::Command;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Burn subtitles into a batch of videos with ffmpeg
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video files or folders to process
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Subtitle font family
    #[arg(long, default_value = "Arial")]
    font: String,

    /// Subtitle font size
    #[arg(long, default_value_t = 24)]
    size: u32,

    /// Subtitle colour: white, yellow, cyan, green or an ASS literal like &H00FFFF&
    #[arg(long, default_value = "white")]
    color: String,

    #[arg(long, value_enum, default_value_t = PresetArg::Balanced)]
    preset: PresetArg,

    #[arg(long, value_enum, default_value_t = AudioArg::Copy)]
    audio: AudioArg,

    /// What to do once the batch is over
    #[arg(long, value_enum, default_value_t = FinishArg::None)]
    finish: FinishArg,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Render a short preview of the first job instead of running the batch
    #[arg(long)]
    preview: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Fast,
    Balanced,
    Best,
}

impl From<PresetArg> for EncodePreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Fast => EncodePreset::Fast,
            PresetArg::Balanced => EncodePreset::Balanced,
            PresetArg::Best => EncodePreset::Best,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AudioArg {
    Copy,
    Reencode,
    Normalize,
}

impl From<AudioArg> for AudioMode {
    fn from(arg: AudioArg) -> Self {
        match arg {
            AudioArg::Copy => AudioMode::Copy,
            AudioArg::Reencode => AudioMode::ReEncode,
            AudioArg::Normalize => AudioMode::Normalize,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FinishArg {
    None,
    Notify,
    Close,
    Shutdown,
}

impl From<FinishArg> for FinishAction {
    fn from(arg: FinishArg) -> Self {
        match arg {
            FinishArg::None => FinishAction::None,
            FinishArg::Notify => FinishAction::Notify,
            FinishArg::Close => FinishAction::CloseApp,
            FinishArg::Shutdown => FinishAction::ShutdownHost,
        }
    }
}

fn parse_color(value: &str) -> SubtitleColor {
    match value.to_ascii_lowercase().as_str() {
        "white" => SubtitleColor::White,
        "yellow" => SubtitleColor::Yellow,
        "cyan" => SubtitleColor::Cyan,
        "green" => SubtitleColor::Green,
        _ => SubtitleColor::Custom(value.to_string()),
    }
}

impl Args {
    fn settings(&self) -> EncodeSettings {
        EncodeSettings {
            font_name: self.font.clone(),
            font_size: self.size,
            color: parse_color(&self.color),
            preset: self.preset.into(),
            audio_mode: self.audio.into(),
            finish_action: self.finish.into(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Use RUST_LOG when set, otherwise info (debug with --verbose)
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });
    }
    builder.format_timestamp_secs().init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether every job succeeded
async fn run(args: Args) -> Result<bool> {
    let cfg = AppConfig::load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let settings = args.settings();
    settings.validate().map_err(anyhow::Error::msg).context("Invalid encode settings")?;

    info!("Subtitle burner starting");
    debug!("Configuration: {:?}", cfg);

    let jobs = collect_jobs(&args.inputs, &cfg.output_dir_name)?;
    if jobs.is_empty() {
        bail!("No media files found in the given inputs");
    }
    info!("Collected {} job(s)", jobs.len());

    if args.preview {
        return run_preview(&cfg, &jobs[0], &settings).await;
    }

    if let Some(output_dir) = jobs[0].output_path.parent() {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    }

    let (tx, events) = unbounded_channel();
    let sink: Arc<dyn EventSink> = Arc::new(tx);
    let controller = Arc::new(BatchController::from_config(&cfg, sink.clone()));
    let (monitor, _readings) = SystemMonitor::new(&cfg).spawn(sink);

    controller.start(jobs, settings.clone())?;
    info!("Type 'pause', 'resume' or 'cancel' and press enter to control the batch");

    let commands = tokio::spawn(read_commands(controller.clone()));
    let interrupt = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling batch");
                if let Err(e) = controller.cancel() {
                    debug!("Cancel on interrupt ignored: {}", e);
                }
            }
        })
    };

    let summary = report_events(events, args.json, settings.finish_action).await;
    monitor.abort();
    commands.abort();
    interrupt.abort();

    let summary = match summary {
        Some(summary) => summary,
        None => controller.wait_finished().await,
    };
    Ok(summary.all_succeeded)
}

/// Render one preview clip next to the first source and wait for ffmpeg
async fn run_preview(cfg: &AppConfig, job: &burner::JobDescriptor, settings: &EncodeSettings) -> Result<bool> {
    let output = preview_path(&job.source_path);
    let cmd = FfmpegCommandBuilder::new(cfg).preview_command(job, settings, &output);
    info!("Rendering preview {}", output.display());
    debug!("Command: {}", cmd);

    let status = Command::new(&cmd.program)
        .args(&cmd.args)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", cmd.program.display()))?;
    if status.success() {
        info!("Preview written to {}", output.display());
    } else {
        warn!("Preview failed with exit code {:?}", status.code());
    }
    Ok(status.success())
}

/// Console lines from a detached thread, so a blocked read never holds up shutdown
fn console_lines() -> UnboundedReceiver<String> {
    let (tx, rx) = unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read command: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Map console lines onto controller commands
async fn read_commands(controller: Arc<BatchController>) {
    let mut lines = console_lines();
    while let Some(line) = lines.recv().await {
        let result = match line.trim() {
            "" => continue,
            "pause" | "p" => controller.pause(),
            "resume" | "r" => controller.resume(),
            "cancel" | "c" => controller.cancel(),
            "status" | "s" => {
                let run = controller.snapshot();
                info!(
                    "State {:?}, job {:?}, progress {:.1}%",
                    run.run_state,
                    run.active_index.map(|i| i + 1),
                    run.current_progress * 100.0
                );
                Ok(())
            }
            other => {
                warn!("Unknown command: {}", other);
                continue;
            }
        };
        if let Err(e) = result {
            warn!("{}", e);
        }
    }
}

/// Print events until the batch and its finish action are done
async fn report_events(
    mut events: UnboundedReceiver<BurnEvent>,
    json: bool,
    finish_action: FinishAction,
) -> Option<BatchSummary> {
    let mut summary = None;
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
        } else if let BurnEvent::MonitorSample { reading } = &event {
            debug!("GPU: {}", reading);
        } else {
            LogSink.emit(event.clone());
        }

        match event {
            BurnEvent::BatchFinished { summary: s, .. } => {
                summary = Some(s);
                if finish_action == FinishAction::None {
                    break;
                }
            }
            BurnEvent::FinishRequested { action } => {
                match action {
                    FinishAction::Notify => info!("All jobs processed"),
                    FinishAction::CloseApp => info!("Closing as requested"),
                    FinishAction::ShutdownHost => info!("Host shutdown scheduled"),
                    FinishAction::None => {}
                }
                break;
            }
            _ => {}
        }
    }
    summary
}
