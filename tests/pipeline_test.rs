//! Orchestrator behaviour with in-process fakes for every external service.

use anyhow::Result;
use async_trait::async_trait;
use prompt_shorts::api::drive::{FolderRef, UploadedFile};
use prompt_shorts::api::telegram::TelegramNotifier;
use prompt_shorts::config::{Config, TelegramSettings};
use prompt_shorts::error::{Stage, StageError};
use prompt_shorts::pipeline::{Notifier, Pipeline, Renderer, Synthesizer, Uploader};
use prompt_shorts::prompts::PromptSource;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct FakeSynth {
    fail_on: Option<String>,
    calls: Mutex<Vec<(String, String, PathBuf)>>,
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str, language: &str, output: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), language.to_string(), output.to_path_buf()));
        if self.fail_on.as_deref() == Some(text) {
            anyhow::bail!("tts service unavailable");
        }
        std::fs::write(output, b"ID3")?;
        Ok(())
    }
}

#[derive(Default)]
struct FakeRenderer {
    calls: Mutex<Vec<(String, PathBuf, PathBuf)>>,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, text: &str, narration: &Path, output: &Path) -> Result<f64> {
        assert!(narration.exists(), "narration must exist before rendering");
        self.calls.lock().unwrap().push((
            text.to_string(),
            narration.to_path_buf(),
            output.to_path_buf(),
        ));
        std::fs::write(output, b"mp4")?;
        Ok(4.5)
    }
}

#[derive(Default)]
struct FakeUploader {
    resolves: Mutex<usize>,
    uploads: Mutex<Vec<(Option<FolderRef>, PathBuf)>>,
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn resolve_folder(&self) -> Result<Option<FolderRef>> {
        *self.resolves.lock().unwrap() += 1;
        Ok(Some(FolderRef {
            id: "created-folder".into(),
            name: "Prompt Shorts".into(),
        }))
    }

    async fn upload(&self, folder: Option<&FolderRef>, path: &Path) -> Result<UploadedFile> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((folder.cloned(), path.to_path_buf()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        Ok(UploadedFile::new(format!("file-{}", uploads.len()), name))
    }
}

#[derive(Default)]
struct FakeNotifier {
    fail: bool,
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            anyhow::bail!("401 Unauthorized");
        }
        Ok(())
    }
}

struct Fixture {
    _tmp: TempDir,
    cfg: Config,
}

impl Fixture {
    fn new(prompts: &[(&str, &str)], videos_per_run: usize) -> Self {
        let tmp = TempDir::new().unwrap();
        let cfg = Config {
            prompts_dir: tmp.path().join("prompts"),
            output_dir: tmp.path().join("output"),
            music_path: tmp.path().join("assets/music.mp3"),
            videos_per_run,
            ..Config::default()
        };
        std::fs::create_dir_all(&cfg.prompts_dir).unwrap();
        std::fs::create_dir_all(&cfg.output_dir).unwrap();
        for (name, text) in prompts {
            std::fs::write(cfg.prompts_dir.join(name), text).unwrap();
        }
        Self { _tmp: tmp, cfg }
    }

    fn prompt(&self, name: &str) -> PathBuf {
        self.cfg.prompts_dir.join(name)
    }

    fn done(&self, name: &str) -> PathBuf {
        self.cfg.done_dir().join(name)
    }
}

fn pipeline<'a>(
    cfg: &'a Config,
    synth: &'a FakeSynth,
    renderer: &'a FakeRenderer,
    uploader: &'a FakeUploader,
    notifier: &'a dyn Notifier,
) -> Pipeline<'a> {
    Pipeline::new(
        cfg,
        PromptSource::from_config(cfg),
        synth,
        renderer,
        uploader,
        notifier,
    )
}

#[tokio::test]
async fn processes_min_of_pending_and_limit_in_name_order() {
    let fx = Fixture::new(
        &[
            ("c.txt", "third"),
            ("a.txt", "first"),
            ("b.txt", "second"),
        ],
        2,
    );
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    let spoken: Vec<String> = synth.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect();
    assert_eq!(spoken, vec!["first", "second"]);
    assert_eq!(report.selected, 2);
    assert_eq!(report.uploaded.len(), 2);
    assert!(fx.prompt("c.txt").exists());
    assert!(!fx.done("c.txt").exists());
}

#[tokio::test]
async fn processed_prompt_is_archived_byte_identical() {
    let original = "  Tip: freeze grapes\ninstead of ice cubes.\n";
    let fx = Fixture::new(&[("tip.txt", original)], 2);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert!(!fx.prompt("tip.txt").exists());
    assert_eq!(std::fs::read_to_string(fx.done("tip.txt")).unwrap(), original);
    assert_eq!(report.uploaded[0].archived_to, fx.done("tip.txt"));

    let calls = synth.calls.lock().unwrap();
    assert_eq!(calls[0].0, "Tip: freeze grapes\ninstead of ice cubes.");
    assert_eq!(calls[0].1, "id");
}

#[tokio::test]
async fn blank_prompt_is_skipped_and_left_in_place() {
    let fx = Fixture::new(&[("a.txt", " \n\t "), ("b.txt", "real text")], 2);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert_eq!(report.skipped, vec![fx.prompt("a.txt")]);
    assert!(fx.prompt("a.txt").exists());
    assert!(!fx.done("a.txt").exists());
    assert_eq!(synth.calls.lock().unwrap().len(), 1);
    assert_eq!(renderer.calls.lock().unwrap().len(), 1);
    assert_eq!(uploader.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_directory_notifies_no_work() {
    let fx = Fixture::new(&[], 2);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert_eq!(report.selected, 0);
    assert_eq!(*uploader.resolves.lock().unwrap(), 0);
    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("No prompt files found"));
}

#[tokio::test]
async fn folder_is_resolved_once_and_used_for_every_upload() {
    let fx = Fixture::new(&[("1.txt", "one"), ("2.txt", "two"), ("3.txt", "three")], 3);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert_eq!(*uploader.resolves.lock().unwrap(), 1);
    let uploads = uploader.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 3);
    assert!(
        uploads
            .iter()
            .all(|(folder, _)| folder.as_ref().map(|f| f.id.as_str()) == Some("created-folder"))
    );
    assert_eq!(report.folder.map(|f| f.id), Some("created-folder".to_string()));
}

#[tokio::test]
async fn artifacts_are_unique_per_prompt() {
    let fx = Fixture::new(&[("1.txt", "one"), ("2.txt", "two")], 2);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    let calls = renderer.calls.lock().unwrap();
    assert_ne!(calls[0].1, calls[1].1);
    assert_ne!(calls[0].2, calls[1].2);
    for (_, audio, video) in calls.iter() {
        assert!(audio.starts_with(&fx.cfg.output_dir));
        assert!(audio.extension().is_some_and(|e| e == "mp3"));
        assert!(video.extension().is_some_and(|e| e == "mp4"));
        // Retained by default.
        assert!(audio.exists() && video.exists());
    }
}

#[tokio::test]
async fn cleanup_removes_artifacts_when_enabled() {
    let mut fx = Fixture::new(&[("1.txt", "one")], 1);
    fx.cfg.cleanup_artifacts = true;
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    let calls = renderer.calls.lock().unwrap();
    assert!(!calls[0].1.exists());
    assert!(!report.uploaded[0].video.exists());
}

#[tokio::test]
async fn failure_stops_the_run_by_default() {
    let fx = Fixture::new(&[("1.txt", "boom"), ("2.txt", "fine")], 2);
    let synth = FakeSynth {
        fail_on: Some("boom".into()),
        ..Default::default()
    };
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let err = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap_err();

    let stage = err.downcast_ref::<StageError>().expect("stage error");
    assert_eq!(stage.stage, Stage::Synthesize);
    assert_eq!(stage.prompt, fx.prompt("1.txt"));

    assert_eq!(synth.calls.lock().unwrap().len(), 1);
    assert!(renderer.calls.lock().unwrap().is_empty());
    assert!(fx.prompt("1.txt").exists());
    assert!(fx.prompt("2.txt").exists());

    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("synthesize failed"));
}

#[tokio::test]
async fn continue_on_error_records_failure_and_proceeds() {
    let mut fx = Fixture::new(&[("1.txt", "boom"), ("2.txt", "fine")], 2);
    fx.cfg.continue_on_error = true;
    let synth = FakeSynth {
        fail_on: Some("boom".into()),
        ..Default::default()
    };
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.uploaded.len(), 1);
    assert!(fx.prompt("1.txt").exists());
    assert!(fx.done("2.txt").exists());

    let messages = notifier.messages.lock().unwrap();
    assert!(messages.last().unwrap().contains("1 uploaded, 0 skipped, 1 failed"));
}

#[tokio::test]
async fn notification_failures_never_abort_the_run() {
    let fx = Fixture::new(&[("1.txt", "one"), ("2.txt", "two")], 2);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier {
        fail: true,
        ..Default::default()
    };

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert_eq!(report.uploaded.len(), 2);
    // Two per-prompt messages plus the completion summary.
    assert_eq!(notifier.messages.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn unreachable_bot_endpoint_does_not_abort_the_run() {
    let fx = Fixture::new(&[("1.txt", "one")], 2);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = TelegramNotifier::with_api_base(
        reqwest::Client::new(),
        TelegramSettings {
            bot_token: Some("000:invalid".into()),
            chat_id: Some("1".into()),
        },
        "http://127.0.0.1:9",
    );

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert_eq!(report.uploaded.len(), 1);
    assert!(fx.done("1.txt").exists());
}

#[tokio::test]
async fn success_message_carries_the_viewer_link() {
    let fx = Fixture::new(&[("1.txt", "one")], 1);
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    let messages = notifier.messages.lock().unwrap();
    assert!(messages[0].contains("https://drive.google.com/file/d/file-1/view"));
    assert_eq!(messages[1], "All videos processed: 1 uploaded, 0 skipped");
}

#[tokio::test]
async fn archive_failure_after_upload_still_counts_the_upload() {
    let mut fx = Fixture::new(&[("1.txt", "one")], 1);
    fx.cfg.continue_on_error = true;
    // A plain file where the done directory should go makes archiving fail.
    std::fs::write(fx.cfg.done_dir(), b"not a directory").unwrap();
    let synth = FakeSynth::default();
    let renderer = FakeRenderer::default();
    let uploader = FakeUploader::default();
    let notifier = FakeNotifier::default();

    let report = pipeline(&fx.cfg, &synth, &renderer, &uploader, &notifier)
        .run()
        .await
        .unwrap();

    assert!(report.uploaded.is_empty());
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.stage, Stage::Archive);
    assert_eq!(failure.uploaded.as_ref().map(|f| f.id.as_str()), Some("file-1"));
    assert_eq!(report.uploaded_count(), 1);
    assert!(fx.prompt("1.txt").exists());

    let messages = notifier.messages.lock().unwrap();
    assert!(messages[1].contains("archive failed"));
    assert!(messages[1].contains("already on Drive"));
    assert_eq!(
        messages.last().unwrap(),
        "All videos processed: 1 uploaded, 0 skipped, 1 failed"
    );
}
