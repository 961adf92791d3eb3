use anyhow::Result;
use clap::Parser;
use prompt_shorts::config::Config;
use prompt_shorts::init;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.json";

#[derive(Parser, Debug)]
#[command(name = "prompt-shorts")]
#[command(about = "Turn text prompts into narrated vertical videos and upload them to Google Drive")]
struct Args {
    /// Settings file (JSON). Defaults to ./config.json when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of prompts to process in this run
    #[arg(short, long)]
    limit: Option<usize>,

    /// Keep going after a prompt fails instead of stopping the run
    #[arg(long)]
    continue_on_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config_path = args.config.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG);
        default.exists().then_some(default)
    });
    let mut cfg = Config::load(config_path.as_deref()).await?;
    if let Some(limit) = args.limit {
        cfg.videos_per_run = limit;
    }
    if args.continue_on_error {
        cfg.continue_on_error = true;
    }
    cfg.validate()?;

    if !init::check_ffmpeg().await {
        eprintln!("[WARN] ffmpeg/ffprobe not found in PATH. Rendering will fail.");
    }

    let report = prompt_shorts::run(&cfg).await?;
    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
