use crate::pipeline::Synthesizer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

const TTS_URL: &str = "https://translate.google.com/translate_tts";
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

/// The endpoint rejects longer requests.
pub const MAX_CHUNK_CHARS: usize = 100;

fn sentence_regex() -> Result<&'static Regex> {
    static SENTENCE_RE: OnceCell<Regex> = OnceCell::new();
    SENTENCE_RE.get_or_try_init(|| {
        Regex::new(r"(?s).+?(?:[.!?;:,…。！？]+\s|[.!?;:,…。！？]*$)")
            .context("failed to compile sentence regex")
    })
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Packs words into pieces of at most `max_chars`, hard-cutting oversized words.
fn pack_words(piece: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    for word in piece.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            out.push(word.iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() { word.len() } else { word.len() + 1 };
        if char_len(&current) + needed > max_chars {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word.iter());
    }
    if !current.is_empty() {
        out.push(current);
    }
}

/// Splits narration into request-sized chunks.
///
/// Cuts prefer sentence punctuation followed by a space, then word
/// boundaries; neighbouring pieces are merged while they fit.
pub fn split_for_tts(text: &str, max_chars: usize) -> Result<Vec<String>> {
    let max_chars = max_chars.max(1);
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Ok(Vec::new());
    }

    let mut pieces = Vec::new();
    for m in sentence_regex()?.find_iter(&normalized) {
        let piece = m.as_str().trim();
        if piece.is_empty() {
            continue;
        }
        if char_len(piece) <= max_chars {
            pieces.push(piece.to_string());
        } else {
            pack_words(piece, max_chars, &mut pieces);
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    for piece in pieces {
        match chunks.last_mut() {
            Some(last) if char_len(last) + 1 + char_len(&piece) <= max_chars => {
                last.push(' ');
                last.push_str(&piece);
            }
            _ => chunks.push(piece),
        }
    }

    Ok(chunks)
}

/// Narration through the Google Translate speech endpoint.
pub struct GoogleTts {
    client: Client,
    endpoint: String,
}

impl GoogleTts {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, TTS_URL)
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: &str,
        language: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>> {
        let params = [
            ("ie", "UTF-8".to_string()),
            ("q", chunk.to_string()),
            ("tl", language.to_string()),
            ("total", total.to_string()),
            ("idx", idx.to_string()),
            ("textlen", char_len(chunk).to_string()),
            ("client", "tw-ob".to_string()),
        ];

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .header("User-Agent", USER_AGENT)
            .header("Referer", "https://translate.google.com/")
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("TTS request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!(
                "TTS chunk {}/{} failed HTTP {}",
                idx + 1,
                total,
                status.as_u16()
            );
        }

        let bytes = resp.bytes().await.context("TTS response read failed")?;
        if bytes.is_empty() {
            anyhow::bail!("TTS chunk {}/{} returned no audio", idx + 1, total);
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Synthesizer for GoogleTts {
    async fn synthesize(&self, text: &str, language: &str, output: &Path) -> Result<()> {
        let chunks = split_for_tts(text, MAX_CHUNK_CHARS)?;
        if chunks.is_empty() {
            anyhow::bail!("Nothing to synthesize");
        }

        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            debug!(chunk = idx + 1, total = chunks.len(), "requesting TTS chunk");
            audio.extend(self.fetch_chunk(chunk, language, idx, chunks.len()).await?);
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(output, &audio)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;

        Ok(())
    }
}
