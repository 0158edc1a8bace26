/// Cumulative-buffer streaming speech-to-text
///
/// Pipeline: `StreamEndpoint -> AudioDecoder -> CumulativeBuffer ->
/// PipelineScheduler -> Transcriber -> TextDiffer -> (Normalizer /
/// Translator) -> StreamEndpoint`.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod differ;
pub mod endpoint;
pub mod error;
pub mod normalizer;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transcriber;
pub mod translator;

pub use buffer::CumulativeBuffer;
pub use config::AppConfig;
pub use differ::TextDiffer;
pub use endpoint::{stream_transcribe, AppServices};
pub use error::{ErrorCode, PipelineError};
pub use normalizer::{KanaNormalizer, Normalizer};
pub use registry::SessionRegistry;
pub use scheduler::PipelineScheduler;
pub use session::SessionState;
pub use transcriber::{StubTranscriber, Transcriber, WhisperConfig, WhisperTranscriber};
pub use translator::{StubTranslator, Translator};
#[cfg(feature = "remote-translate")]
pub use translator::RemoteTranslator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
