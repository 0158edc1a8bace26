/// Error taxonomy
///
/// One `thiserror` enum per module plus an umbrella `PipelineError` that the
/// endpoint layer maps onto the wire `error{code,message}` shape (spec §7).
use thiserror::Error;

use crate::audio::DecodeError;
use crate::buffer::BufferError;
use crate::normalizer::NormalizerError;
use crate::transcriber::TranscriberError;
use crate::translator::TranslatorError;

/// The `code` field of a wire `error` message (§6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Decode,
    ModelTransient,
    ModelFatal,
    Protocol,
    SessionNotFound,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Decode => "decode",
            ErrorCode::ModelTransient => "model_transient",
            ErrorCode::ModelFatal => "model_fatal",
            ErrorCode::Protocol => "protocol",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::Timeout => "timeout",
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("transcriber error: {0}")]
    Transcriber(#[from] TranscriberError),

    #[error("normalizer error: {0}")]
    Normalizer(#[from] NormalizerError),

    #[error("translator error: {0}")]
    Translator(#[from] TranslatorError),

    #[error("unknown session: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("malformed protocol message: {0}")]
    Protocol(String),

    #[error("finalization deadline exceeded")]
    FinalizationTimeout,
}

impl PipelineError {
    /// Map this error onto the wire error code taxonomy (spec §7).
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Decode(_) => ErrorCode::Decode,
            PipelineError::Buffer(_) => ErrorCode::Decode,
            PipelineError::Transcriber(e) if e.is_fatal() => ErrorCode::ModelFatal,
            PipelineError::Transcriber(_) => ErrorCode::ModelTransient,
            PipelineError::Normalizer(_) => ErrorCode::ModelTransient,
            PipelineError::Translator(_) => ErrorCode::ModelTransient,
            PipelineError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            PipelineError::Protocol(_) => ErrorCode::Protocol,
            PipelineError::FinalizationTimeout => ErrorCode::Timeout,
        }
    }
}
