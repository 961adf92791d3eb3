use crate::api::drive::{FolderRef, UploadedFile};
use crate::config::Config;
use crate::error::{Stage, StageError};
use crate::prompts::{Prompt, PromptSource};
use crate::{logi, logok, logw};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Writes spoken `text` to `output` as an audio file.
    async fn synthesize(&self, text: &str, language: &str, output: &Path) -> Result<()>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders the captioned video and returns its duration in seconds.
    async fn render(&self, text: &str, narration: &Path, output: &Path) -> Result<f64>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Called once per run, before the first upload.
    async fn resolve_folder(&self) -> Result<Option<FolderRef>>;

    async fn upload(&self, folder: Option<&FolderRef>, path: &Path) -> Result<UploadedFile>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub prompt: PathBuf,
    pub archived_to: PathBuf,
    pub video: PathBuf,
    pub duration: f64,
    pub file: UploadedFile,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub selected: usize,
    pub folder: Option<FolderRef>,
    pub uploaded: Vec<UploadRecord>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<StageError>,
}

impl RunReport {
    /// Videos that reached Drive, including ones whose prompt failed to archive.
    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len() + self.failed.iter().filter(|e| e.uploaded.is_some()).count()
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "All videos processed: {} uploaded, {} skipped",
            self.uploaded_count(),
            self.skipped.len()
        );
        if !self.failed.is_empty() {
            text.push_str(&format!(", {} failed", self.failed.len()));
        }
        text
    }
}

pub struct Pipeline<'a> {
    cfg: &'a Config,
    source: PromptSource,
    synthesizer: &'a dyn Synthesizer,
    renderer: &'a dyn Renderer,
    uploader: &'a dyn Uploader,
    notifier: &'a dyn Notifier,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        cfg: &'a Config,
        source: PromptSource,
        synthesizer: &'a dyn Synthesizer,
        renderer: &'a dyn Renderer,
        uploader: &'a dyn Uploader,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            cfg,
            source,
            synthesizer,
            renderer,
            uploader,
            notifier,
        }
    }

    /// Processes up to `videos_per_run` prompts in file name order.
    ///
    /// Unless `continue_on_error` is set, the first failing prompt ends the
    /// run and its error is returned after a failure notification.
    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        let selected = self.source.select()?;
        if selected.is_empty() {
            let message = format!("No prompt files found in {}", self.source.dir().display());
            logi(&message);
            self.notify(&message).await;
            return Ok(report);
        }
        report.selected = selected.len();
        logi(format!("Selected {} prompt(s) for this run", selected.len()));

        let folder = self.uploader.resolve_folder().await?;
        if let Some(folder) = &folder {
            logok(format!("Upload folder: {} ({})", folder.name, folder.id));
        }
        report.folder = folder.clone();

        for (idx, path) in selected.iter().enumerate() {
            match self.process(idx + 1, path, folder.as_ref()).await {
                Ok(Some(record)) => report.uploaded.push(record),
                Ok(None) => report.skipped.push(path.clone()),
                Err(err) => {
                    logw(format!("FAILED: {}", err));
                    self.notify(&format!("❌ {}", err)).await;
                    if !self.cfg.continue_on_error {
                        return Err(err.into());
                    }
                    report.failed.push(err);
                }
            }
        }

        let summary = report.summary();
        logok(&summary);
        self.notify(&summary).await;
        Ok(report)
    }

    async fn process(
        &self,
        seq: usize,
        path: &Path,
        folder: Option<&FolderRef>,
    ) -> Result<Option<UploadRecord>, StageError> {
        let fail = |stage: Stage| move |err: anyhow::Error| StageError::new(stage, path, err);

        let prompt: Prompt = match self.source.load(path).await.map_err(fail(Stage::Read))? {
            Some(prompt) => prompt,
            None => {
                logw(format!("Skipping empty prompt: {}", path.display()));
                return Ok(None);
            }
        };

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let audio = self
            .cfg
            .output_dir
            .join(format!("{}_{}_{}.mp3", self.cfg.audio_prefix, stamp, seq));
        let video = self
            .cfg
            .output_dir
            .join(format!("{}_{}_{}.mp4", self.cfg.video_prefix, stamp, seq));

        logi(format!("Synthesizing narration: {}", prompt.file_name()));
        self.synthesizer
            .synthesize(&prompt.text, &self.cfg.language, &audio)
            .await
            .map_err(fail(Stage::Synthesize))?;

        logi(format!("Rendering video: {}", video.display()));
        let duration = self
            .renderer
            .render(&prompt.text, &audio, &video)
            .await
            .map_err(fail(Stage::Render))?;
        logok(format!("Rendered {} ({:.2}s)", video.display(), duration));
        if self.cfg.cleanup_artifacts {
            remove_artifact(&audio).await;
        }

        logi("Uploading to Google Drive");
        let file = self
            .uploader
            .upload(folder, &video)
            .await
            .map_err(fail(Stage::Upload))?;
        logok(format!("Uploaded {}: {}", file.name, file.view_url));
        self.notify(&format!("✅ Video uploaded: {}\n{}", file.name, file.view_url))
            .await;

        let archived_to = match self.source.archive(&prompt).await {
            Ok(archived_to) => archived_to,
            Err(err) => {
                let err = err.context(format!(
                    "{} is already on Drive ({}) but the prompt is still pending",
                    file.name, file.view_url
                ));
                return Err(StageError::new(Stage::Archive, path, err).with_upload(file));
            }
        };
        logok(format!("Archived prompt -> {}", archived_to.display()));
        if self.cfg.cleanup_artifacts {
            remove_artifact(&video).await;
        }

        Ok(Some(UploadRecord {
            prompt: prompt.path,
            archived_to,
            video,
            duration,
            file,
        }))
    }

    async fn notify(&self, message: &str) {
        if let Err(err) = self.notifier.send(message).await {
            logw(format!("Notification failed: {:#}", err));
            debug!(error = ?err, "notification error swallowed");
        }
    }
}

async fn remove_artifact(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        logw(format!("Failed to remove {}: {}", path.display(), err));
    }
}
