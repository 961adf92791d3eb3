use crate::api::drive::UploadedFile;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal setup problems. A run never starts processing prompts after one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("{var} is not valid credentials JSON: {reason}")]
    InvalidCredentials { var: &'static str, reason: String },

    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("credentials rejected by {endpoint} (HTTP {status}): {body}")]
    CredentialsRejected {
        endpoint: String,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Synthesize,
    Render,
    Upload,
    Archive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Synthesize => "synthesize",
            Stage::Render => "render",
            Stage::Upload => "upload",
            Stage::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// A pipeline step that failed for one prompt.
#[derive(Debug, Error)]
#[error("{stage} failed for {}: {source:#}", .prompt.display())]
pub struct StageError {
    pub stage: Stage,
    pub prompt: PathBuf,
    #[source]
    pub source: anyhow::Error,
    /// Set when the video reached Drive before the step failed.
    pub uploaded: Option<UploadedFile>,
}

impl StageError {
    pub fn new(stage: Stage, prompt: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Self {
            stage,
            prompt: prompt.into(),
            source,
            uploaded: None,
        }
    }

    pub fn with_upload(mut self, file: UploadedFile) -> Self {
        self.uploaded = Some(file);
        self
    }
}
