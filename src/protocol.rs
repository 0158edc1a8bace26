/// Wire protocol: JSON control-plane messages over the streaming endpoint
///
/// `#[serde(tag = "type", rename_all = "lowercase")]` tagged enums, following
/// `other_examples/90d1e192_..._stream.rs.rs`'s `ClientMessage`/
/// `ServerMessage` split, generalized to the exact shapes in spec §6.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client -> server text frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Options {
        #[serde(default, rename = "enableHiragana")]
        enable_hiragana: Option<bool>,
        #[serde(default, rename = "enableTranslation")]
        enable_translation: Option<bool>,
        #[serde(default, rename = "enableSummary")]
        enable_summary: Option<bool>,
        #[serde(default, rename = "rawPcm")]
        raw_pcm: Option<bool>,
    },
    End,
}

/// `transcription_update`/`session_end`'s nested `{confirmed, tentative}` pair.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TextPair {
    pub confirmed: String,
    pub tentative: String,
}

/// `transcription_update`/`session_end`'s nested `{confirmed}` pair for
/// hiragana/translation, which are only ever reported as a confirmed value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfirmedOnly {
    pub confirmed: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Performance {
    #[serde(rename = "transcriptionMs")]
    pub transcription_ms: u64,
    #[serde(rename = "normalizationMs", skip_serializing_if = "Option::is_none")]
    pub normalization_ms: Option<u64>,
    #[serde(rename = "translationMs", skip_serializing_if = "Option::is_none")]
    pub translation_ms: Option<u64>,
    #[serde(rename = "totalMs")]
    pub total_ms: u64,
    #[serde(rename = "audioSec")]
    pub audio_sec: f64,
    #[serde(
        rename = "finalizationTimedOut",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub finalization_timed_out: bool,
}

/// Step reported by `progress` events.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    Decoding,
    Transcribing,
    Normalizing,
    Translating,
}

/// Server -> client text frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    Progress {
        step: ProgressStep,
        message: String,
    },
    Accumulating {
        #[serde(rename = "chunkId")]
        chunk_id: u64,
        #[serde(rename = "durationSec")]
        duration_sec: f64,
        #[serde(rename = "sessionElapsedSec")]
        session_elapsed_sec: f64,
        #[serde(rename = "chunksUntilNextTranscription")]
        chunks_until_next_transcription: u32,
    },
    TranscriptionUpdate {
        sequence: u64,
        #[serde(rename = "isFinal")]
        is_final: bool,
        transcription: TextPair,
        #[serde(skip_serializing_if = "Option::is_none")]
        hiragana: Option<ConfirmedOnly>,
        #[serde(skip_serializing_if = "Option::is_none")]
        translation: Option<ConfirmedOnly>,
        performance: Performance,
    },
    Error {
        code: &'static str,
        message: String,
    },
    SessionEnd {
        sequence: u64,
        #[serde(rename = "isFinal")]
        is_final: bool,
        transcription: TextPair,
        #[serde(skip_serializing_if = "Option::is_none")]
        hiragana: Option<ConfirmedOnly>,
        #[serde(skip_serializing_if = "Option::is_none")]
        translation: Option<ConfirmedOnly>,
        performance: Performance,
    },
}
