/// Normalizer: text -> hiragana external collaborator
///
/// Pure, deterministic, process-wide singleton (spec §5, §6). No real-world
/// NLP dependency in the corpus covers kana conversion, so the default
/// implementation is a from-scratch deterministic Unicode codepoint shift —
/// still shaped as an "external collaborator" trait seam per
/// `whisper_wrapper.rs`'s mock/real split, since a richer morphological
/// normalizer is a plausible drop-in later.
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizerError {
    #[error("normalization failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn to_hiragana(&self, text: &str) -> Result<String, NormalizerError>;
}

/// Katakana block (U+30A1-U+30F6) shifted down to hiragana (U+3041-U+3096);
/// every other codepoint passes through unchanged.
pub struct KanaNormalizer;

impl KanaNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn shift_char(c: char) -> char {
        const KATAKANA_START: u32 = 0x30A1;
        const KATAKANA_END: u32 = 0x30F6;
        const OFFSET: u32 = 0x60;

        let code = c as u32;
        if (KATAKANA_START..=KATAKANA_END).contains(&code) {
            char::from_u32(code - OFFSET).unwrap_or(c)
        } else {
            c
        }
    }
}

impl Default for KanaNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Normalizer for KanaNormalizer {
    async fn to_hiragana(&self, text: &str) -> Result<String, NormalizerError> {
        Ok(text.chars().map(Self::shift_char).collect())
    }
}
