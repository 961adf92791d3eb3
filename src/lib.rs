use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod api;
pub mod caption;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod pipeline;
pub mod prompts;

use anyhow::{Context, Result};
use api::drive::DriveUploader;
use api::telegram::TelegramNotifier;
use api::tts::GoogleTts;
use config::Config;
use ffmpeg::FfmpegRenderer;
use pipeline::{Pipeline, RunReport};
use prompts::PromptSource;

pub type PipelineLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<PipelineLogHook>>> = Lazy::new(|| Mutex::new(None));

/// Mirrors every progress line to `hook` in addition to stderr.
pub fn set_log_hook(hook: Option<PipelineLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

pub(crate) fn logv(tag: &str, message: &str) {
    eprintln!("[{}] {}", tag, message);

    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

/// Builds the production adapters from `cfg` and executes one run.
///
/// Drive authentication happens before any prompt is touched, so bad
/// credentials abort the run before synthesis or rendering starts.
pub async fn run(cfg: &Config) -> Result<RunReport> {
    init::ensure_directories(cfg).await?;

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let uploader = DriveUploader::connect(client.clone(), &cfg.drive).await?;
    let synthesizer = GoogleTts::new(client.clone());
    let renderer = FfmpegRenderer::new(cfg.render.clone(), cfg.music_path.clone());
    let notifier = TelegramNotifier::new(client, cfg.telegram.clone());
    let source = PromptSource::from_config(cfg);

    Pipeline::new(cfg, source, &synthesizer, &renderer, &uploader, &notifier)
        .run()
        .await
}
