/// Service configuration
///
/// Env-overridable settings enumerated in spec §6. Follows the teacher's
/// `load_whisper_config` idiom: one `std::env::var` per setting, parsed with
/// a fallback default, no config-file layer.
use std::time::Duration;

/// Default sample rate for the acoustic model and all internal PCM math (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per PCM sample (16-bit signed little-endian).
pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `WHISPER_MODEL_SIZE` — affects external Transcriber init, not core logic.
    pub whisper_model_size: String,

    /// `WHISPER_BEAM_SIZE` (default 3).
    pub whisper_beam_size: i32,

    /// `CUMULATIVE_MAX_AUDIO_SECONDS` (default 30).
    pub max_audio_seconds: f64,

    /// `CUMULATIVE_TRANSCRIPTION_INTERVAL` (default 1, chunks).
    pub transcription_interval: u32,

    /// `CUMULATIVE_MIN_AUDIO_SECONDS` (default 1.0).
    pub min_audio_seconds: f64,

    /// `CUMULATIVE_OVERLAP_SECONDS` (default 5.0).
    pub overlap_seconds: f64,

    /// `SESSION_IDLE_TTL_SECONDS` (default 1800).
    pub session_idle_ttl: Duration,

    /// `END_FINALIZATION_TIMEOUT_SECONDS` (default 20).
    pub finalization_timeout: Duration,

    /// `PROMPT_MAX_CHARS` (default 224 code points).
    pub prompt_max_chars: usize,

    /// `TRANSCRIBER_CONCURRENCY` (default 1) — bounds concurrent model
    /// invocations across all sessions (spec §5's "bounded semaphore whose
    /// capacity equals the desired concurrency").
    pub transcriber_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            whisper_model_size: "base".to_string(),
            whisper_beam_size: 3,
            max_audio_seconds: 30.0,
            transcription_interval: 1,
            min_audio_seconds: 1.0,
            overlap_seconds: 5.0,
            session_idle_ttl: Duration::from_secs(1800),
            finalization_timeout: Duration::from_secs(20),
            prompt_max_chars: 224,
            transcriber_concurrency: 1,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to spec defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            whisper_model_size: std::env::var("WHISPER_MODEL_SIZE")
                .unwrap_or(defaults.whisper_model_size),

            whisper_beam_size: env_parsed("WHISPER_BEAM_SIZE", defaults.whisper_beam_size),

            max_audio_seconds: env_parsed(
                "CUMULATIVE_MAX_AUDIO_SECONDS",
                defaults.max_audio_seconds,
            ),

            transcription_interval: env_parsed(
                "CUMULATIVE_TRANSCRIPTION_INTERVAL",
                defaults.transcription_interval,
            ),

            min_audio_seconds: env_parsed(
                "CUMULATIVE_MIN_AUDIO_SECONDS",
                defaults.min_audio_seconds,
            ),

            overlap_seconds: env_parsed("CUMULATIVE_OVERLAP_SECONDS", defaults.overlap_seconds),

            session_idle_ttl: Duration::from_secs(env_parsed(
                "SESSION_IDLE_TTL_SECONDS",
                defaults.session_idle_ttl.as_secs(),
            )),

            finalization_timeout: Duration::from_secs(env_parsed(
                "END_FINALIZATION_TIMEOUT_SECONDS",
                defaults.finalization_timeout.as_secs(),
            )),

            prompt_max_chars: env_parsed("PROMPT_MAX_CHARS", defaults.prompt_max_chars),

            transcriber_concurrency: env_parsed(
                "TRANSCRIBER_CONCURRENCY",
                defaults.transcriber_concurrency,
            ),
        }
    }

    /// `maxAudioBytes = maxAudioSeconds * sampleRate * 2` (spec §3).
    pub fn max_audio_bytes(&self) -> usize {
        (self.max_audio_seconds * SAMPLE_RATE as f64) as usize * BYTES_PER_SAMPLE
    }

    /// Overlap tail size in bytes.
    pub fn overlap_bytes(&self) -> usize {
        (self.overlap_seconds * SAMPLE_RATE as f64) as usize * BYTES_PER_SAMPLE
    }

    /// Minimum buffered duration before a transcription pass is allowed.
    pub fn min_audio_bytes(&self) -> usize {
        (self.min_audio_seconds * SAMPLE_RATE as f64) as usize * BYTES_PER_SAMPLE
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_audio_seconds, 30.0);
        assert_eq!(cfg.overlap_seconds, 5.0);
        assert_eq!(cfg.min_audio_seconds, 1.0);
        assert_eq!(cfg.prompt_max_chars, 224);
        assert_eq!(cfg.session_idle_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.finalization_timeout, Duration::from_secs(20));
        assert_eq!(cfg.transcriber_concurrency, 1);
    }

    #[test]
    fn test_max_audio_bytes_derivation() {
        let cfg = AppConfig::default();
        // 30s * 16000Hz * 2 bytes/sample
        assert_eq!(cfg.max_audio_bytes(), 30 * 16_000 * 2);
    }

    #[test]
    fn test_overlap_bytes_derivation() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.overlap_bytes(), 5 * 16_000 * 2);
    }
}
