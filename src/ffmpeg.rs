use crate::caption::{self, CaptionLayout};
use crate::config::RenderSettings;
use crate::pipeline::Renderer;
use crate::{logi, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

// amix divides every input by the input count; this restores the narration level.
const NARRATION_GAIN: f64 = 2.0;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let status = cmd.status().await.context("Command execution failed")?;
    if !status.success() {
        return Err(anyhow::anyhow!("Command failed: {:?}", args));
    }

    Ok(())
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!(
            "Invalid duration '{}' for {}",
            text,
            path.display()
        ));
    }
    Ok(duration)
}

/// Escapes a filter option value for both the option parser and the filtergraph parser.
pub fn escape_filter_value(value: &str) -> String {
    let mut option_level = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(ch);
    }

    let mut graph_level = String::with_capacity(option_level.len());
    for ch in option_level.chars() {
        if matches!(ch, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(ch);
    }
    graph_level
}

/// Inputs for a single render, resolved on disk.
#[derive(Debug, Clone)]
pub struct RenderJob<'a> {
    pub duration: f64,
    pub caption: &'a CaptionLayout,
    /// One text file per caption line, same order as `caption.lines`.
    pub line_files: &'a [PathBuf],
    pub narration: &'a Path,
    pub music: Option<&'a Path>,
    pub output: &'a Path,
}

fn drawtext_chain(settings: &RenderSettings, job: &RenderJob<'_>) -> String {
    if job.line_files.is_empty() {
        return "[0:v]null[v]".to_string();
    }

    let face = match &settings.font_file {
        Some(file) => format!("fontfile={}", escape_filter_value(&file.display().to_string())),
        None => format!("font={}", escape_filter_value(&settings.font)),
    };

    let filters: Vec<String> = job
        .line_files
        .iter()
        .enumerate()
        .map(|(idx, file)| {
            format!(
                "drawtext={}:textfile={}:expansion=none:fontsize={}:fontcolor={}:x=(w-text_w)/2:y={}",
                face,
                escape_filter_value(&file.display().to_string()),
                settings.font_size,
                escape_filter_value(&settings.font_color),
                job.caption.line_y(idx)
            )
        })
        .collect();

    format!("[0:v]{}[v]", filters.join(","))
}

pub fn build_render_args(settings: &RenderSettings, job: &RenderJob<'_>) -> Vec<String> {
    let duration = format!("{:.3}", job.duration);
    let background = format!(
        "color=c={}:s={}x{}:r={}:d={}",
        settings.background, settings.width, settings.height, settings.fps, duration
    );

    let mut args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        background,
        "-i".to_string(),
        job.narration.display().to_string(),
    ];

    if let Some(music) = job.music {
        args.extend([
            "-stream_loop".to_string(),
            "-1".to_string(),
            "-i".to_string(),
            music.display().to_string(),
        ]);
    }

    let mut graph = drawtext_chain(settings, job);
    if job.music.is_some() {
        graph.push_str(&format!(
            ";[1:a]volume={:.2}[a0];[2:a]volume={:.2}[a1];[a0][a1]amix=inputs=2:duration=first:dropout_transition=2[a]",
            NARRATION_GAIN, settings.music_volume
        ));
    }

    let audio_map = if job.music.is_some() { "[a]" } else { "1:a" };

    args.extend([
        "-filter_complex".to_string(),
        graph,
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        audio_map.to_string(),
        "-c:v".to_string(),
        settings.video_codec.clone(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        settings.fps.to_string(),
        "-c:a".to_string(),
        settings.audio_codec.clone(),
        "-b:a".to_string(),
        settings.audio_bitrate.clone(),
        "-t".to_string(),
        duration,
        "-movflags".to_string(),
        "+faststart".to_string(),
        job.output.display().to_string(),
    ]);

    args
}

pub struct FfmpegRenderer {
    settings: RenderSettings,
    music_path: PathBuf,
}

impl FfmpegRenderer {
    pub fn new(settings: RenderSettings, music_path: PathBuf) -> Self {
        Self {
            settings,
            music_path,
        }
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(&self, text: &str, narration: &Path, output: &Path) -> Result<f64> {
        let duration = ffprobe_duration_seconds(narration)
            .await
            .with_context(|| format!("Bad narration {}", narration.display()))?;

        let s = &self.settings;
        let layout =
            caption::layout_caption(text, s.wrap_width, s.width, s.height, s.margin, s.font_size);

        // Removed when `scratch` drops, including on error.
        let scratch = tempfile::Builder::new()
            .prefix("captions")
            .tempdir()
            .context("Failed to create caption scratch dir")?;
        let mut line_files = Vec::with_capacity(layout.lines.len());
        for (idx, line) in layout.lines.iter().enumerate() {
            let path = scratch.path().join(format!("line_{}.txt", idx + 1));
            fs::write(&path, line)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            line_files.push(path);
        }

        let music = if self.music_path.is_file() {
            logi(format!("Mixing background music: {}", self.music_path.display()));
            Some(self.music_path.as_path())
        } else {
            None
        };

        let job = RenderJob {
            duration,
            caption: &layout,
            line_files: &line_files,
            narration,
            music,
            output,
        };
        let args = build_render_args(s, &job);
        debug!(?args, "ffmpeg render");

        if let Err(err) = run_cmd(&args).await {
            logw(format!("Render failed: {}", err));
            return Err(err.context(format!("Failed to render {}", output.display())));
        }
        if !output.exists() {
            anyhow::bail!("ffmpeg reported success but {} is missing", output.display());
        }

        Ok(duration)
    }
}
