use std::io::BufRead;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use snow_timelapse::{
    CancelToken, CaptureSession, CaptureSessionConfig, DEFAULT_FRAME_RATE, find_window_by_title,
    timestamp::MAX_FRAME_RATE,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

struct Args {
    title: String,
    frame_rate: u32,
}

fn usage(program: &str) {
    eprintln!("usage: {program} <window-title-substring> [frameRate={DEFAULT_FRAME_RATE}]");
    eprintln!("  frameRate must be between 1 and {MAX_FRAME_RATE}");
    eprintln!("  press Enter while capturing to stop");
}

fn parse_args(args: &[String]) -> Option<Args> {
    let title = args.get(1).filter(|title| !title.is_empty())?.clone();
    let frame_rate = match args.get(2) {
        None => DEFAULT_FRAME_RATE,
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|rate| (1..=MAX_FRAME_RATE).contains(rate))?,
    };
    Some(Args { title, frame_rate })
}

fn program_name(args: &[String]) -> String {
    args.first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

/// Cancel `token` once a line arrives on `input`. EOF or a read error
/// leaves the run going.
fn spawn_line_watcher<R>(input: R, token: CancelToken) -> Result<std::thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("snow-timelapse-stdin".to_string())
        .spawn(move || watch_for_line(input, &token))
        .context("failed to spawn stdin watcher thread")
}

fn watch_for_line<R: BufRead>(mut input: R, token: &CancelToken) {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(read) if read > 0 => {
            info!("stop requested");
            token.cancel();
        }
        Ok(_) => debug!("stdin closed, stop with Ctrl+C"),
        Err(error) => debug!(%error, "stdin unreadable, stop with Ctrl+C"),
    }
}

fn run(args: Args, program: &str) -> Result<ExitCode> {
    let Some(window) = find_window_by_title(&args.title, Some(program))? else {
        eprintln!("no visible window title contains `{}`", args.title);
        return Ok(ExitCode::SUCCESS);
    };

    let config = CaptureSessionConfig::from_env()?;
    let mut session = CaptureSession::builder()
        .with_config(config)
        .frame_rate(args.frame_rate)
        .region(window.client_area)
        .build()
        .context("failed to set up capture")?;

    let cancel = CancelToken::new();
    spawn_line_watcher(std::io::BufReader::new(std::io::stdin()), cancel.clone())?;
    info!(
        window = %window.title,
        output_dir = %session.output_dir().display(),
        "capturing, press Enter to stop"
    );

    let summary = session.run(&cancel).context("capture failed")?;
    info!(
        ticks = summary.ticks,
        saved = summary.worker.frames_saved,
        failed = summary.worker.frames_failed,
        "done"
    );
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = program_name(&args);
    let Some(parsed) = parse_args(&args) else {
        usage(&program);
        return ExitCode::FAILURE;
    };

    match run(parsed, &program) {
        Ok(code) => code,
        Err(error) => {
            tracing::error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}
