pub mod drive;
pub mod telegram;
pub mod tts;
