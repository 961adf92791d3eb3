use crate::config::Config;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// One prompt file and its trimmed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub path: PathBuf,
    pub text: String,
}

impl Prompt {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct PromptSource {
    dir: PathBuf,
    done_dir: PathBuf,
    limit: usize,
}

impl PromptSource {
    pub fn new(dir: impl Into<PathBuf>, done_dir: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            dir: dir.into(),
            done_dir: done_dir.into(),
            limit,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.prompts_dir.clone(), cfg.done_dir(), cfg.videos_per_run)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All `*.txt` files directly in the prompts directory, sorted by file name.
    pub fn list_pending(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry =
                entry.with_context(|| format!("Failed to list {}", self.dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(OsStr::to_str) == Some("txt") {
                out.push(entry.into_path());
            }
        }

        Ok(out)
    }

    /// The first `limit` pending files.
    pub fn select(&self) -> Result<Vec<PathBuf>> {
        let mut pending = self.list_pending()?;
        pending.truncate(self.limit);
        Ok(pending)
    }

    /// Reads a prompt. Blank files yield `None` and stay where they are.
    pub async fn load(&self, path: &Path) -> Result<Option<Prompt>> {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt {}", path.display()))?;
        let text = raw.trim();
        if text.is_empty() {
            return Ok(None);
        }

        Ok(Some(Prompt {
            path: path.to_path_buf(),
            text: text.to_string(),
        }))
    }

    /// Moves the prompt file into the done directory and returns its new path.
    pub async fn archive(&self, prompt: &Prompt) -> Result<PathBuf> {
        fs::create_dir_all(&self.done_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.done_dir.display()))?;

        let file_name = prompt
            .path
            .file_name()
            .with_context(|| format!("Prompt path has no file name: {}", prompt.path.display()))?;
        let target = self.done_dir.join(file_name);

        fs::rename(&prompt.path, &target).await.with_context(|| {
            format!(
                "Failed to move {} -> {}",
                prompt.path.display(),
                target.display()
            )
        })?;

        Ok(target)
    }
}
