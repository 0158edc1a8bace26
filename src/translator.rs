/// Translator: JA -> EN external collaborator
///
/// Default implementation is a dependency-free stub (useful for tests and
/// when no translation backend is configured); the real HTTP-backed client
/// behind `remote-translate` follows `subwin-backend`'s and
/// `vdt4534-KagiNote-App`'s `reqwest` usage for calling an external model
/// service. Retry/backoff (spec §6: "retried at most twice with exponential
/// backoff 100ms/500ms") is owned by `PipelineScheduler`, not this module —
/// a single `translate_ja_en` call either succeeds or fails once.
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("translation request failed: {0}")]
    RequestFailed(String),

    #[error("translation backend unavailable")]
    Unavailable,
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_ja_en(&self, text: &str) -> Result<String, TranslatorError>;
}

/// Dependency-free default: wraps the source text to make translation
/// presence visible in tests/demos without calling out to any service.
pub struct StubTranslator;

impl StubTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for StubTranslator {
    async fn translate_ja_en(&self, text: &str) -> Result<String, TranslatorError> {
        if text.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("[en] {}", text))
    }
}

#[cfg(feature = "remote-translate")]
pub use remote::RemoteTranslator;

#[cfg(feature = "remote-translate")]
mod remote {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    #[derive(Serialize)]
    struct TranslateRequest<'a> {
        text: &'a str,
        source: &'a str,
        target: &'a str,
    }

    #[derive(Deserialize)]
    struct TranslateResponse {
        translated_text: String,
    }

    pub struct RemoteTranslator {
        client: reqwest::Client,
        endpoint: String,
    }

    impl RemoteTranslator {
        pub fn new(endpoint: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
            }
        }
    }

    #[async_trait]
    impl Translator for RemoteTranslator {
        async fn translate_ja_en(&self, text: &str) -> Result<String, TranslatorError> {
            if text.is_empty() {
                return Ok(String::new());
            }

            let body = TranslateRequest {
                text,
                source: "ja",
                target: "en",
            };

            debug!("translating {} chars via {}", text.chars().count(), self.endpoint);

            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| TranslatorError::RequestFailed(e.to_string()))?;

            if !response.status().is_success() {
                return Err(TranslatorError::RequestFailed(format!(
                    "status {}",
                    response.status()
                )));
            }

            let parsed: TranslateResponse = response
                .json()
                .await
                .map_err(|e| TranslatorError::RequestFailed(e.to_string()))?;

            Ok(parsed.translated_text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_translator_wraps_text() {
        let t = StubTranslator::new();
        let out = t.translate_ja_en("こんにちは").await.unwrap();
        assert_eq!(out, "[en] こんにちは");
    }

    #[tokio::test]
    async fn test_stub_translator_empty_input() {
        let t = StubTranslator::new();
        assert_eq!(t.translate_ja_en("").await.unwrap(), "");
    }
}
