use crate::api::drive::Credentials;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_CREDENTIALS: &str = "GDRIVE_CREDENTIALS";
pub const ENV_FOLDER_ID: &str = "GDRIVE_FOLDER_ID";
pub const ENV_FOLDER_NAME: &str = "GDRIVE_FOLDER_NAME";
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_VIDEOS_PER_RUN: &str = "VIDEOS_PER_RUN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_done_dir_name")]
    pub done_dir_name: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_music_path")]
    pub music_path: PathBuf,
    #[serde(default = "default_videos_per_run")]
    pub videos_per_run: usize,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub cleanup_artifacts: bool,
    #[serde(default = "default_video_prefix")]
    pub video_prefix: String,
    #[serde(default = "default_audio_prefix")]
    pub audio_prefix: String,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub drive: DriveSettings,
    #[serde(skip)]
    pub telegram: TelegramSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default)]
    pub font_file: Option<PathBuf>,
    #[serde(default = "default_wrap_width")]
    pub wrap_width: usize,
    #[serde(default = "default_margin")]
    pub margin: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_music_volume")]
    pub music_volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveSettings {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_folder_name")]
    pub folder_name: String,
    #[serde(default = "default_true")]
    pub create_missing_folder: bool,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramSettings {
    /// Both values present and non-empty.
    pub fn is_configured(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.bot_token) && filled(&self.chat_id)
    }
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_done_dir_name() -> String {
    "done".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_music_path() -> PathBuf {
    PathBuf::from("assets/music.mp3")
}

fn default_videos_per_run() -> usize {
    2
}

fn default_language() -> String {
    "id".to_string()
}

fn default_video_prefix() -> String {
    "lifehack".to_string()
}

fn default_audio_prefix() -> String {
    "voice".to_string()
}

fn default_width() -> u32 {
    1080
}

fn default_height() -> u32 {
    1920
}

fn default_font_size() -> u32 {
    70
}

fn default_font_color() -> String {
    "white".to_string()
}

fn default_background() -> String {
    "black".to_string()
}

fn default_font() -> String {
    "DejaVu Sans".to_string()
}

fn default_wrap_width() -> usize {
    40
}

fn default_margin() -> u32 {
    100
}

fn default_fps() -> u32 {
    30
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_music_volume() -> f64 {
    0.2
}

fn default_folder_name() -> String {
    "Prompt Shorts".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            font_size: default_font_size(),
            font_color: default_font_color(),
            background: default_background(),
            font: default_font(),
            font_file: None,
            wrap_width: default_wrap_width(),
            margin: default_margin(),
            fps: default_fps(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            music_volume: default_music_volume(),
        }
    }
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            folder_id: None,
            folder_name: default_folder_name(),
            create_missing_folder: true,
            credentials: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            done_dir_name: default_done_dir_name(),
            output_dir: default_output_dir(),
            music_path: default_music_path(),
            videos_per_run: default_videos_per_run(),
            language: default_language(),
            continue_on_error: false,
            cleanup_artifacts: false,
            video_prefix: default_video_prefix(),
            audio_prefix: default_audio_prefix(),
            render: RenderSettings::default(),
            drive: DriveSettings::default(),
            telegram: TelegramSettings::default(),
        }
    }
}

impl Config {
    /// Reads the optional settings file, then layers the process environment on top.
    pub async fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let content = fs::read_to_string(&path).await.with_context(|| {
                    format!("Failed to read config: {}", path.as_ref().display())
                })?;
                serde_json::from_str(&content).with_context(|| {
                    format!("Failed to parse config: {}", path.as_ref().display())
                })?
            }
            None => Config::default(),
        };

        Ok(Self::from_lookup(base, |key| std::env::var(key).ok())?)
    }

    /// Applies environment values from `lookup` to `base` and validates the result.
    pub fn from_lookup<F>(mut base: Config, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw = get(ENV_CREDENTIALS).ok_or(ConfigError::MissingVar(ENV_CREDENTIALS))?;
        let credentials = Credentials::from_json(&raw).map_err(|err| {
            ConfigError::InvalidCredentials {
                var: ENV_CREDENTIALS,
                reason: err.to_string(),
            }
        })?;
        base.drive.credentials = Some(credentials);

        if let Some(id) = get(ENV_FOLDER_ID) {
            base.drive.folder_id = Some(id.trim().to_string());
        }
        if let Some(name) = get(ENV_FOLDER_NAME) {
            base.drive.folder_name = name;
        }

        base.telegram = TelegramSettings {
            bot_token: get(ENV_BOT_TOKEN),
            chat_id: get(ENV_CHAT_ID),
        };

        if let Some(count) = get(ENV_VIDEOS_PER_RUN) {
            base.videos_per_run =
                count
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSetting {
                        field: "videos_per_run",
                        reason: format!("{ENV_VIDEOS_PER_RUN}={count} is not a number"),
                    })?;
        }

        base.validate()?;
        Ok(base)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::InvalidSetting {
                field,
                reason: reason.to_string(),
            })
        };

        if self.videos_per_run == 0 {
            return invalid("videos_per_run", "must be at least 1");
        }
        if self.render.width == 0 || self.render.height == 0 {
            return invalid("render.width/height", "must be non-zero");
        }
        if self.render.fps == 0 {
            return invalid("render.fps", "must be non-zero");
        }
        if self.render.font_size == 0 {
            return invalid("render.font_size", "must be non-zero");
        }
        if self.render.wrap_width == 0 {
            return invalid("render.wrap_width", "must be non-zero");
        }
        if self.render.margin >= self.render.width {
            return invalid("render.margin", "must be smaller than the frame width");
        }
        if self.done_dir_name.trim().is_empty() {
            return invalid("done_dir_name", "must not be empty");
        }
        Ok(())
    }

    pub fn done_dir(&self) -> PathBuf {
        self.prompts_dir.join(&self.done_dir_name)
    }
}
