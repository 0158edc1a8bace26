/// Per-connection session state
///
/// Field shape and `Arc<RwLock<..>>` ownership follow the teacher's
/// `streaming.rs` `StreamingState`; the `options` idempotent-override rule
/// ("last value wins, unknown keys ignored") follows
/// `other_examples/90d1e192_..._stream.rs.rs`'s `ClientMessage` handling.
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::buffer::CumulativeBuffer;
use crate::differ::TextDiffer;

/// Client-controlled processing options (spec §6 `options` message).
/// Overrides are idempotent: the last value received for a field wins.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub enable_hiragana: bool,
    pub enable_translation: bool,
    pub enable_summary: bool,
    pub raw_pcm: bool,
}

impl SessionOptions {
    /// Merge an incoming partial update; fields present in `update` overwrite
    /// the current value, matching `rename_all` wire field presence.
    pub fn apply(&mut self, update: &SessionOptionsUpdate) {
        if let Some(v) = update.enable_hiragana {
            self.enable_hiragana = v;
        }
        if let Some(v) = update.enable_translation {
            self.enable_translation = v;
        }
        if let Some(v) = update.enable_summary {
            self.enable_summary = v;
        }
        if let Some(v) = update.raw_pcm {
            self.raw_pcm = v;
        }
    }
}

/// A partial options update as parsed off the wire; absent fields are left
/// untouched by `SessionOptions::apply`.
#[derive(Debug, Clone, Default)]
pub struct SessionOptionsUpdate {
    pub enable_hiragana: Option<bool>,
    pub enable_translation: Option<bool>,
    pub enable_summary: Option<bool>,
    pub raw_pcm: Option<bool>,
}

/// One append to session history: emitted each time the confirmed prefix
/// grows. Append-only; released on session destroy.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp_sec: f64,
    pub text: String,
    pub hiragana: Option<String>,
    pub translation: Option<String>,
}

pub struct SessionState {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    last_activity: Instant,

    pub options: SessionOptions,
    pub buffer: CumulativeBuffer,
    pub differ: TextDiffer,

    pub confirmed_hiragana: String,
    pub confirmed_translation: String,

    pub sequence: u64,
    pub history: Vec<HistoryEntry>,
    pub ended: bool,

    /// Length (in chars) of `confirmed` already covered by a post-processing
    /// pass; used to compute the incremental growth for the next pass
    /// (spec §4.2, §9 open question iii).
    pub post_processed_confirmed_chars: usize,
}

impl SessionState {
    pub fn new(max_audio_bytes: usize, overlap_bytes: usize, prompt_max_chars: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
            options: SessionOptions::default(),
            buffer: CumulativeBuffer::new(max_audio_bytes, overlap_bytes, prompt_max_chars),
            differ: TextDiffer::new(),
            confirmed_hiragana: String::new(),
            confirmed_translation: String::new(),
            sequence: 0,
            history: Vec::new(),
            ended: false,
            post_processed_confirmed_chars: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Text newly confirmed since the last post-processing pass.
    pub fn incremental_confirmed_growth(&self) -> &str {
        let confirmed = self.differ.confirmed();
        let chars: Vec<char> = confirmed.chars().collect();
        let start = self.post_processed_confirmed_chars.min(chars.len());
        // Safe: `start` is a char count, but we need a byte index for
        // slicing; recompute via char_indices to stay UTF-8 safe.
        match confirmed.char_indices().nth(start) {
            Some((byte_idx, _)) => &confirmed[byte_idx..],
            None => "",
        }
    }

    /// Advance the post-processing cursor to `new_cursor` chars into
    /// `confirmed`. The caller passes the exact length covered by the
    /// growth it just applied (not the full current `confirmed` length) so
    /// that an overlapping, still-pending earlier pass cannot later be
    /// mistaken for having been applied.
    pub fn advance_post_processed_cursor(&mut self, new_cursor: usize) {
        self.post_processed_confirmed_chars = new_cursor;
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> SessionState {
        SessionState::new(30 * 16_000 * 2, 5 * 16_000 * 2, 224)
    }

    #[test]
    fn test_options_apply_last_value_wins() {
        let mut opts = SessionOptions::default();
        opts.apply(&SessionOptionsUpdate {
            enable_translation: Some(true),
            ..Default::default()
        });
        assert!(opts.enable_translation);
        assert!(!opts.enable_hiragana);

        opts.apply(&SessionOptionsUpdate {
            enable_translation: Some(false),
            ..Default::default()
        });
        assert!(!opts.enable_translation);
    }

    #[test]
    fn test_sequence_increments_monotonically() {
        let mut session = new_session();
        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);
        assert_eq!(session.next_sequence(), 3);
    }

    #[test]
    fn test_incremental_confirmed_growth() {
        let mut session = new_session();
        session.differ.update("こんにちは。");
        let growth_chars = session.incremental_confirmed_growth().chars().count();
        assert_eq!(session.incremental_confirmed_growth(), "こんにちは。");
        session.advance_post_processed_cursor(growth_chars);
        assert_eq!(session.incremental_confirmed_growth(), "");

        session.differ.update("こんにちは。さようなら。");
        assert_eq!(session.incremental_confirmed_growth(), "さようなら。");
    }

    #[test]
    fn test_new_session_has_unique_id() {
        let a = new_session();
        let b = new_session();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_advance_post_processed_cursor_is_explicit_not_full_length() {
        let mut session = new_session();
        session.differ.update("あいう。えおか。");
        // Advance only past the first sentence (4 chars: あいう。), as a task
        // covering just that growth would, leaving the rest for the next
        // pass to pick up.
        session.advance_post_processed_cursor(4);
        assert_eq!(session.incremental_confirmed_growth(), "えおか。");
    }
}
