/// Cumulative PCM buffer
///
/// A rolling window of PCM chunks fed whole to each recognition pass. Trims
/// by evicting whole chunks from the head while preserving an overlap tail,
/// mirroring the teacher's `StreamingState` (`VecDeque<AudioSample>` +
/// byte-budget eviction) generalized with the `other_examples` session
/// overlap/prompt-chaining behavior.
use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("odd-length chunk: {0} bytes (not 16-bit aligned)")]
    OddLengthChunk(usize),
}

struct Chunk {
    bytes: Bytes,
}

/// Rolling PCM window for one session.
pub struct CumulativeBuffer {
    chunks: VecDeque<Chunk>,
    total_bytes: usize,
    max_audio_bytes: usize,
    overlap_bytes: usize,
    prompt_max_chars: usize,
    opened_at: Instant,
}

impl CumulativeBuffer {
    pub fn new(max_audio_bytes: usize, overlap_bytes: usize, prompt_max_chars: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            max_audio_bytes,
            overlap_bytes,
            prompt_max_chars,
            opened_at: Instant::now(),
        }
    }

    /// Append one decoded PCM chunk, then enforce the byte cap.
    pub fn append(&mut self, bytes: Vec<u8>) -> Result<(), BufferError> {
        if bytes.len() % 2 != 0 {
            return Err(BufferError::OddLengthChunk(bytes.len()));
        }

        if bytes.len() > self.max_audio_bytes {
            // A single oversized chunk resets the buffer to its own tail.
            let start = bytes.len() - self.max_audio_bytes;
            let tail = Bytes::copy_from_slice(&bytes[start..]);
            self.chunks.clear();
            self.total_bytes = tail.len();
            self.chunks.push_back(Chunk { bytes: tail });
            warn!(
                "incoming chunk ({} bytes) exceeds max_audio_bytes ({}); buffer reset to tail",
                bytes.len(),
                self.max_audio_bytes
            );
            return Ok(());
        }

        self.total_bytes += bytes.len();
        self.chunks.push_back(Chunk {
            bytes: Bytes::from(bytes),
        });
        self.maybe_trim();
        Ok(())
    }

    /// Evict whole chunks from the head until `total_bytes <= max_audio_bytes`,
    /// never evicting past the overlap tail.
    fn maybe_trim(&mut self) {
        while self.total_bytes > self.max_audio_bytes {
            let Some(front_len) = self.chunks.front().map(|c| c.bytes.len()) else {
                break;
            };
            if self.total_bytes - front_len < self.overlap_bytes {
                break;
            }
            self.chunks.pop_front();
            self.total_bytes -= front_len;
            debug!(
                "trimmed chunk ({} bytes), total now {}",
                front_len, self.total_bytes
            );
        }
    }

    /// Concatenated PCM contents for the next recognition pass.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.bytes);
        }
        out
    }

    pub fn duration_sec(&self, sample_rate: u32) -> f64 {
        let samples = self.total_bytes / 2;
        samples as f64 / sample_rate as f64
    }

    pub fn session_elapsed_sec(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Last sentences of `confirmed`, capped at `prompt_max_chars` code points,
    /// used to bias the next recognition pass. `None` when `confirmed` is empty.
    pub fn initial_prompt(&self, confirmed: &str) -> Option<String> {
        if confirmed.is_empty() {
            return None;
        }
        let chars: Vec<char> = confirmed.chars().collect();
        if chars.len() <= self.prompt_max_chars {
            return Some(confirmed.to_string());
        }
        let tail: String = chars[chars.len() - self.prompt_max_chars..].iter().collect();
        Some(tail)
    }
}
