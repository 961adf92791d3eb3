//! Caption layout for the rendered frame.
//!
//! Text is greedily wrapped on whitespace. Runs of whitespace (newlines
//! included) collapse into single spaces and words longer than the line
//! width are broken across lines.

/// Average glyph advance of a sans-serif face, as a fraction of the font size.
const GLYPH_WIDTH_RATIO: f64 = 0.55;

/// Line pitch as a multiple of the font size.
const LINE_HEIGHT_RATIO: f64 = 1.25;

pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        if current_len > 0 && current_len + 1 + word.len() <= width {
            current.push(' ');
            current.extend(word.iter());
            current_len += 1 + word.len();
            continue;
        }

        if current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }

        while word.len() > width {
            let rest = word.split_off(width);
            lines.push(word.iter().collect());
            word = rest;
        }

        current.extend(word.iter());
        current_len = word.len();
    }

    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Where each caption line goes on the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub lines: Vec<String>,
    pub line_height: u32,
    /// Top edge of the first line, in pixels.
    pub top: i64,
}

impl CaptionLayout {
    pub fn line_y(&self, index: usize) -> i64 {
        self.top + (index as i64) * self.line_height as i64
    }
}

/// Characters per line that fit inside `usable_width` at `font_size`, capped at `wrap_width`.
pub fn effective_wrap_width(wrap_width: usize, usable_width: u32, font_size: u32) -> usize {
    let glyph = (font_size as f64 * GLYPH_WIDTH_RATIO).max(1.0);
    let fit = (usable_width as f64 / glyph).floor() as usize;
    wrap_width.min(fit).max(1)
}

/// Wraps `text` to the margin-adjusted frame width and centers the block vertically.
pub fn layout_caption(
    text: &str,
    wrap_width: usize,
    frame_width: u32,
    frame_height: u32,
    margin: u32,
    font_size: u32,
) -> CaptionLayout {
    let usable = frame_width.saturating_sub(margin);
    let width = effective_wrap_width(wrap_width, usable, font_size);
    let lines = wrap_text(text, width);

    let line_height = (font_size as f64 * LINE_HEIGHT_RATIO).round() as u32;
    let block = lines.len() as i64 * line_height as i64;
    let top = (frame_height as i64 - block) / 2;

    CaptionLayout {
        lines,
        line_height,
        top,
    }
}
