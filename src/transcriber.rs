/// Transcriber: the acoustic model external collaborator
///
/// `PCM -> (fullText, segments, languageDetected)`. Real implementation
/// bound to whisper.cpp via `whisper-rs`, compiled in behind the `whisper`
/// feature; otherwise a dependency-free mock. Split follows the teacher's
/// `whisper_wrapper.rs` `real_impl`/`mock_impl` module pattern exactly,
/// generalized to the trait seam this spec requires so the scheduler can
/// hold a `dyn Transcriber` instead of a concrete `WhisperProcessor`.
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscriberError {
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),
}

impl TranscriberError {
    /// Fatal errors close the session (spec §7 kind 3); everything else is
    /// transient and the scheduler simply retries on the next trigger.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TranscriberError::ModelNotLoaded(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    /// Heuristic per-segment confidence, kept internal (not part of the
    /// wire protocol) for parity with the teacher's `estimate_confidence`.
    pub confidence: f32,
}

/// Heuristic confidence in the absence of a model-reported score: longer,
/// non-empty segments are scored higher, matching the teacher's
/// `estimate_confidence`'s length-based heuristic.
fn estimate_confidence(text: &str) -> f32 {
    if text.trim().is_empty() {
        return 0.0;
    }
    (0.5 + (text.chars().count() as f32 / 40.0).min(0.45)).min(0.95)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOutcome {
    pub full_text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language_detected: String,
}

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    pub language: String,
    pub num_threads: usize,
    pub use_gpu: bool,
    pub beam_size: i32,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: "ja".to_string(),
            num_threads: num_cpus::get(),
            use_gpu: true,
            beam_size: 3,
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        pcm: &[u8],
        initial_prompt: Option<&str>,
        language: &str,
        beam_size: i32,
    ) -> Result<TranscriptionOutcome, TranscriberError>;
}

#[cfg(feature = "whisper")]
mod real_impl {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing::{debug, info};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    pub struct WhisperTranscriber {
        context: Arc<Mutex<WhisperContext>>,
        config: WhisperConfig,
    }

    impl WhisperTranscriber {
        pub fn new(config: WhisperConfig) -> Result<Self, TranscriberError> {
            if !config.model_path.exists() {
                return Err(TranscriberError::ModelNotLoaded(format!(
                    "model file not found: {:?}",
                    config.model_path
                )));
            }

            info!("loading Whisper model: {:?}", config.model_path);
            let ctx_params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(
                config
                    .model_path
                    .to_str()
                    .ok_or_else(|| TranscriberError::ModelNotLoaded("non-utf8 path".into()))?,
                ctx_params,
            )
            .map_err(|e| TranscriberError::ModelNotLoaded(e.to_string()))?;

            Ok(Self {
                context: Arc::new(Mutex::new(context)),
                config,
            })
        }

        fn pcm_to_f32(pcm: &[u8]) -> Vec<f32> {
            pcm.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
                .collect()
        }
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(
            &self,
            pcm: &[u8],
            initial_prompt: Option<&str>,
            language: &str,
            beam_size: i32,
        ) -> Result<TranscriptionOutcome, TranscriberError> {
            if pcm.is_empty() {
                return Err(TranscriberError::InvalidAudio("empty PCM buffer".into()));
            }

            let samples = Self::pcm_to_f32(pcm);
            let context = self.context.clone();
            let num_threads = self.config.num_threads as i32;
            let language = language.to_string();
            let prompt = initial_prompt.map(|s| s.to_string());

            tokio::task::spawn_blocking(move || {
                let mut params = FullParams::new(SamplingStrategy::BeamSearch {
                    beam_size,
                    patience: -1.0,
                });
                params.set_language(Some(&language));
                params.set_n_threads(num_threads);
                params.set_print_progress(false);
                params.set_print_special(false);
                params.set_print_realtime(false);
                if let Some(ref p) = prompt {
                    params.set_initial_prompt(p);
                }

                let mut ctx = context.lock();
                ctx.full(params, &samples)
                    .map_err(|e| TranscriberError::Inference(e.to_string()))?;

                let num_segments = ctx
                    .full_n_segments()
                    .map_err(|e| TranscriberError::Inference(e.to_string()))?;

                let mut segments = Vec::new();
                let mut full_text = String::new();
                for i in 0..num_segments {
                    let text = ctx
                        .full_get_segment_text(i)
                        .map_err(|e| TranscriberError::Inference(e.to_string()))?;
                    let t0 = ctx
                        .full_get_segment_t0(i)
                        .map_err(|e| TranscriberError::Inference(e.to_string()))?;
                    let t1 = ctx
                        .full_get_segment_t1(i)
                        .map_err(|e| TranscriberError::Inference(e.to_string()))?;
                    let trimmed = text.trim().to_string();
                    segments.push(TranscriptSegment {
                        start_sec: t0 as f64 / 100.0,
                        end_sec: t1 as f64 / 100.0,
                        confidence: estimate_confidence(&trimmed),
                        text: trimmed,
                    });
                    full_text.push_str(&text);
                }

                debug!("transcription complete: {} segments", segments.len());

                Ok(TranscriptionOutcome {
                    full_text: full_text.trim().to_string(),
                    segments,
                    language_detected: language,
                })
            })
            .await
            .map_err(|e| TranscriberError::Inference(e.to_string()))?
        }
    }
}

#[cfg(not(feature = "whisper"))]
mod mock_impl {
    use super::*;
    use tracing::warn;

    /// Dependency-free placeholder used whenever `whisper` isn't compiled in.
    /// Echoes back a single synthetic segment so integration tests exercising
    /// the pipeline end-to-end have something non-empty to diff.
    pub struct WhisperTranscriber {
        config: WhisperConfig,
    }

    impl WhisperTranscriber {
        pub fn new(config: WhisperConfig) -> Result<Self, TranscriberError> {
            warn!("using MOCK transcriber (whisper feature not enabled)");
            Ok(Self { config })
        }
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(
            &self,
            pcm: &[u8],
            _initial_prompt: Option<&str>,
            language: &str,
            _beam_size: i32,
        ) -> Result<TranscriptionOutcome, TranscriberError> {
            if pcm.is_empty() {
                return Err(TranscriberError::InvalidAudio("empty PCM buffer".into()));
            }
            let duration_sec = pcm.len() as f64 / 2.0 / 16_000.0;
            let text = format!("[mock transcription, {:.1}s audio]", duration_sec);
            Ok(TranscriptionOutcome {
                full_text: text.clone(),
                segments: vec![TranscriptSegment {
                    start_sec: 0.0,
                    end_sec: duration_sec,
                    confidence: estimate_confidence(&text),
                    text,
                }],
                language_detected: language.to_string(),
            })
        }
    }

    impl WhisperTranscriber {
        #[allow(dead_code)]
        pub fn config(&self) -> &WhisperConfig {
            &self.config
        }
    }
}

#[cfg(feature = "whisper")]
pub use real_impl::WhisperTranscriber;

#[cfg(not(feature = "whisper"))]
pub use mock_impl::WhisperTranscriber;

/// Deterministic stub keyed by cumulative PCM bytes, used by integration
/// tests that assert exact `confirmed`/`tentative` text for a given
/// recognizer output (spec §8 end-to-end scenarios).
pub struct StubTranscriber {
    fixtures: parking_lot::Mutex<std::collections::HashMap<Vec<u8>, String>>,
    delay: Option<std::time::Duration>,
}

impl StubTranscriber {
    pub fn new() -> Self {
        Self {
            fixtures: parking_lot::Mutex::new(std::collections::HashMap::new()),
            delay: None,
        }
    }

    /// Simulate a slow transcription pass (used by the finalization-timeout
    /// scenario).
    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            fixtures: parking_lot::Mutex::new(std::collections::HashMap::new()),
            delay: Some(delay),
        }
    }

    pub fn register(&self, pcm_fingerprint: impl Into<Vec<u8>>, text: impl Into<String>) {
        self.fixtures
            .lock()
            .insert(pcm_fingerprint.into(), text.into());
    }
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for StubTranscriber {
    async fn transcribe(
        &self,
        pcm: &[u8],
        _initial_prompt: Option<&str>,
        language: &str,
        _beam_size: i32,
    ) -> Result<TranscriptionOutcome, TranscriberError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self
            .fixtures
            .lock()
            .get(pcm)
            .cloned()
            .unwrap_or_default();
        Ok(TranscriptionOutcome {
            full_text: text.clone(),
            segments: vec![TranscriptSegment {
                start_sec: 0.0,
                end_sec: pcm.len() as f64 / 2.0 / 16_000.0,
                confidence: estimate_confidence(&text),
                text,
            }],
            language_detected: language.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_confidence_empty_is_zero() {
        assert_eq!(estimate_confidence(""), 0.0);
        assert_eq!(estimate_confidence("   "), 0.0);
    }

    #[test]
    fn test_estimate_confidence_grows_with_length_and_caps() {
        let short = estimate_confidence("あ");
        let long = estimate_confidence(&"あ".repeat(100));
        assert!(short > 0.0);
        assert!(long > short);
        assert!(long <= 0.95);
    }

    #[tokio::test]
    async fn test_stub_transcriber_returns_registered_text() {
        let stub = StubTranscriber::new();
        let fingerprint = vec![1u8, 2, 3, 4];
        stub.register(fingerprint.clone(), "こんにちは。");
        let result = stub
            .transcribe(&fingerprint, None, "ja", 3)
            .await
            .unwrap();
        assert_eq!(result.full_text, "こんにちは。");
    }

    #[tokio::test]
    async fn test_stub_transcriber_unregistered_fingerprint_is_empty() {
        let stub = StubTranscriber::new();
        let result = stub.transcribe(&[9, 9, 9, 9], None, "ja", 3).await.unwrap();
        assert_eq!(result.full_text, "");
    }

    #[tokio::test]
    async fn test_stub_transcriber_respects_delay() {
        let stub = StubTranscriber::with_delay(std::time::Duration::from_millis(20));
        let start = std::time::Instant::now();
        stub.transcribe(&[1, 2], None, "ja", 3).await.unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(20));
    }

    #[cfg(not(feature = "whisper"))]
    #[tokio::test]
    async fn test_mock_whisper_rejects_empty_pcm() {
        let t = WhisperTranscriber::new(WhisperConfig::default()).unwrap();
        let err = t.transcribe(&[], None, "ja", 3).await.unwrap_err();
        assert!(matches!(err, TranscriberError::InvalidAudio(_)));
    }

    #[cfg(not(feature = "whisper"))]
    #[tokio::test]
    async fn test_mock_whisper_nonempty_pcm() {
        let t = WhisperTranscriber::new(WhisperConfig::default()).unwrap();
        let pcm = vec![0u8; 32_000]; // 1s of silence
        let result = t.transcribe(&pcm, None, "ja", 3).await.unwrap();
        assert!(!result.full_text.is_empty());
        assert_eq!(result.language_detected, "ja");
    }
}
