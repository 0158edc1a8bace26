/// PipelineScheduler: decides *when* to transcribe and *what*
/// post-processing to run, one instance per session.
///
/// Trigger/coalescing follows the teacher's `streaming.rs` `process_stream`
/// (spawn off the ingest path, drop the buffer lock before the model call)
/// combined with `other_examples/c206be7d_..._transcription.rs.rs`'s
/// `decoding` single-flight flag and `process_all_sessions` coalescing loop,
/// generalized from "one manager polling many sessions" to "one scheduler
/// per session reacting to its own chunk arrivals".
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, warn};

use crate::config::{AppConfig, SAMPLE_RATE};
use crate::normalizer::Normalizer;
use crate::protocol::{ConfirmedOnly, Performance, ProgressStep, TextPair};
use crate::session::{HistoryEntry, SessionState};
use crate::transcriber::{Transcriber, TranscriberError};
use crate::translator::Translator;

/// Events the scheduler hands back to the endpoint for framing onto the
/// wire; sequence numbers are already assigned under the session lock.
#[derive(Debug)]
pub enum SchedulerEvent {
    Progress {
        step: ProgressStep,
        message: String,
    },
    TranscriptionUpdate {
        sequence: u64,
        transcription: TextPair,
        hiragana: Option<ConfirmedOnly>,
        translation: Option<ConfirmedOnly>,
        performance: Performance,
    },
    SessionEnd {
        sequence: u64,
        transcription: TextPair,
        hiragana: Option<ConfirmedOnly>,
        translation: Option<ConfirmedOnly>,
        performance: Performance,
    },
    /// Transient model error: informational, session continues.
    ModelTransient { message: String },
    /// Fatal model error: the endpoint must close the session.
    ModelFatal { message: String },
}

/// A completed transcription pass. Carries no sequence number: one is only
/// allocated by the caller at the point a result is actually emitted, so a
/// pass whose result is discarded (e.g. the final pass during `finalize`,
/// which re-derives its own emission separately) never burns one.
struct PassResult {
    confirmed: String,
    tentative: String,
    growth: String,
    transcription_ms: u64,
    audio_sec: f64,
}

pub struct PipelineScheduler {
    session: Arc<Mutex<SessionState>>,
    transcriber: Arc<dyn Transcriber>,
    normalizer: Arc<dyn Normalizer>,
    translator: Arc<dyn Translator>,
    config: AppConfig,
    events: mpsc::UnboundedSender<SchedulerEvent>,

    /// Bounds concurrent `Transcriber::transcribe` invocations across every
    /// session sharing this process-wide model singleton (spec §5); shared
    /// across all `PipelineScheduler`s, not per-session.
    transcriber_permits: Arc<Semaphore>,

    chunks_since_last: AtomicU32,
    in_flight: AtomicBool,
    pending_rerun: AtomicBool,
    /// Bumped each time a post-processing task is actually spawned; a
    /// spawned task discards its result if this no longer matches the
    /// generation it was spawned with (spec §4.2 "restart against the
    /// latest confirmed text" single-flight rule).
    post_process_generation: AtomicU64,
}

impl PipelineScheduler {
    pub fn new(
        session: Arc<Mutex<SessionState>>,
        transcriber: Arc<dyn Transcriber>,
        normalizer: Arc<dyn Normalizer>,
        translator: Arc<dyn Translator>,
        config: AppConfig,
        events: mpsc::UnboundedSender<SchedulerEvent>,
        transcriber_permits: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            transcriber,
            normalizer,
            translator,
            config,
            events,
            transcriber_permits,
            chunks_since_last: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
            pending_rerun: AtomicBool::new(false),
            post_process_generation: AtomicU64::new(0),
        })
    }

    /// Chunks remaining before the next arrival is eligible to trigger a
    /// transcription pass (reported in `accumulating` events, spec §6).
    pub fn chunks_until_next_transcription(&self) -> u32 {
        let chunks = self.chunks_since_last.load(Ordering::Acquire);
        self.config.transcription_interval.saturating_sub(chunks)
    }

    /// Call after every successful `buffer.append`. Decides whether this
    /// arrival should trigger a transcription pass, and coalesces if one is
    /// already in flight.
    pub async fn on_chunk_appended(self: &Arc<Self>) {
        let chunks = self.chunks_since_last.fetch_add(1, Ordering::AcqRel) + 1;
        let duration_sec = {
            let session = self.session.lock().await;
            session.buffer.duration_sec(SAMPLE_RATE)
        };

        let ready = chunks >= self.config.transcription_interval
            && duration_sec >= self.config.min_audio_seconds;
        if !ready {
            return;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.chunks_since_last.store(0, Ordering::Release);
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_trigger_loop().await;
            });
        } else {
            // A call is already in flight; coalesce this arrival into a
            // single follow-up once it completes.
            self.pending_rerun.store(true, Ordering::Release);
        }
    }

    async fn run_trigger_loop(self: Arc<Self>) {
        loop {
            self.transcribe_once().await;
            if self
                .pending_rerun
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.chunks_since_last.store(0, Ordering::Release);
                continue;
            }
            self.in_flight.store(false, Ordering::Release);
            break;
        }
    }

    async fn transcribe_once(self: &Arc<Self>) {
        let _ = self.events.send(SchedulerEvent::Progress {
            step: ProgressStep::Transcribing,
            message: "transcribing accumulated audio".to_string(),
        });

        match self.run_transcription_pass().await {
            Ok(Some(pass)) => {
                self.spawn_incremental_post_processing(pass.growth.clone())
                    .await;
                let sequence = self.session.lock().await.next_sequence();
                let performance = Performance {
                    transcription_ms: pass.transcription_ms,
                    normalization_ms: None,
                    translation_ms: None,
                    total_ms: pass.transcription_ms,
                    audio_sec: pass.audio_sec,
                    finalization_timed_out: false,
                };
                let _ = self.events.send(SchedulerEvent::TranscriptionUpdate {
                    sequence,
                    transcription: TextPair {
                        confirmed: pass.confirmed,
                        tentative: pass.tentative,
                    },
                    hiragana: None,
                    translation: None,
                    performance,
                });
            }
            Ok(None) => {
                debug!("empty snapshot, skipping transcription pass");
            }
            Err(e) if e.is_fatal() => {
                let _ = self.events.send(SchedulerEvent::ModelFatal {
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!("transient transcription error: {e}");
                let _ = self.events.send(SchedulerEvent::ModelTransient {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Snapshot the buffer, call the transcriber off the session lock,
    /// then update the differ and history. Returns `Ok(None)` when the
    /// snapshot is empty (the transcriber must not be invoked, spec §4.1).
    /// Does not allocate a sequence number — only the caller that actually
    /// emits a result does that, so a discarded pass (e.g. the speculative
    /// final pass in `finalize`, whose own `session_end` sequence is
    /// assigned separately) never consumes one.
    async fn run_transcription_pass(&self) -> Result<Option<PassResult>, TranscriberError> {
        let (pcm, prompt, audio_sec) = {
            let session = self.session.lock().await;
            let pcm = session.buffer.snapshot();
            let prompt = session.buffer.initial_prompt(session.differ.confirmed());
            let audio_sec = session.buffer.duration_sec(SAMPLE_RATE);
            (pcm, prompt, audio_sec)
        };

        if pcm.is_empty() {
            return Ok(None);
        }

        let permit = self
            .transcriber_permits
            .acquire()
            .await
            .expect("transcriber semaphore never closed");
        let start = Instant::now();
        let outcome = self
            .transcriber
            .transcribe(&pcm, prompt.as_deref(), "ja", self.config.whisper_beam_size)
            .await?;
        let transcription_ms = start.elapsed().as_millis() as u64;
        drop(permit); // release before the session lock + post-processing dispatch below

        let mut session = self.session.lock().await;
        session.differ.update(&outcome.full_text);
        let confirmed = session.differ.confirmed().to_string();
        let tentative = session.differ.tentative().to_string();
        let growth = session.incremental_confirmed_growth().to_string();
        let session_elapsed = session.buffer.session_elapsed_sec();
        drop(session);

        if !growth.is_empty() {
            let mut session = self.session.lock().await;
            session.push_history(HistoryEntry {
                timestamp_sec: session_elapsed,
                text: growth.clone(),
                hiragana: None,
                translation: None,
            });
        }

        Ok(Some(PassResult {
            confirmed,
            tentative,
            growth,
            transcription_ms,
            audio_sec,
        }))
    }

    /// Post-process the newly-grown confirmed substring, restarting against
    /// the latest confirmed text if an earlier pass is still pending (single
    /// -flight per spec §4.2). Returns before spawning anything when neither
    /// hiragana nor translation is enabled, so a no-options session emits
    /// exactly one `transcription_update` per pass.
    async fn spawn_incremental_post_processing(self: &Arc<Self>, growth: String) {
        if growth.is_empty() {
            return;
        }

        let (want_hiragana, want_translation, start_chars) = {
            let session = self.session.lock().await;
            (
                session.options.enable_hiragana,
                session.options.enable_translation,
                session.post_processed_confirmed_chars,
            )
        };

        if !want_hiragana && !want_translation {
            return;
        }

        let my_generation = self.post_process_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let target_chars = start_chars + growth.chars().count();
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let norm_start = Instant::now();
            let hiragana_result = if want_hiragana {
                scheduler.normalizer.to_hiragana(&growth).await.ok()
            } else {
                None
            };
            let normalization_ms = want_hiragana.then(|| norm_start.elapsed().as_millis() as u64);

            let trans_start = Instant::now();
            let translation_result = if want_translation {
                translate_with_retry(scheduler.translator.as_ref(), &growth).await
            } else {
                None
            };
            let translation_ms = want_translation.then(|| trans_start.elapsed().as_millis() as u64);

            // A newer post-processing pass was dispatched while this one was
            // in flight; its result supersedes ours entirely, so discard
            // rather than risk double-applying or clobbering its commit.
            if scheduler.post_process_generation.load(Ordering::Acquire) != my_generation {
                debug!("discarding superseded post-processing result");
                return;
            }

            let mut session_guard = scheduler.session.lock().await;
            if let Some(ref h) = hiragana_result {
                session_guard.confirmed_hiragana.push_str(h);
            }
            if let Some(ref t) = translation_result {
                session_guard.confirmed_translation.push_str(t);
            }
            session_guard.advance_post_processed_cursor(target_chars);

            if let Some(last) = session_guard.history.last_mut() {
                last.hiragana = hiragana_result.clone();
                last.translation = translation_result.clone();
            }

            let sequence = session_guard.next_sequence();
            let confirmed = session_guard.differ.confirmed().to_string();
            let tentative = session_guard.differ.tentative().to_string();
            let audio_sec = session_guard.buffer.duration_sec(SAMPLE_RATE);
            drop(session_guard);

            let performance = Performance {
                transcription_ms: 0,
                normalization_ms,
                translation_ms,
                total_ms: normalization_ms.unwrap_or(0) + translation_ms.unwrap_or(0),
                audio_sec,
                finalization_timed_out: false,
            };

            let _ = scheduler.events.send(SchedulerEvent::TranscriptionUpdate {
                sequence,
                transcription: TextPair {
                    confirmed,
                    tentative,
                },
                hiragana: hiragana_result.map(|confirmed| ConfirmedOnly { confirmed }),
                translation: translation_result.map(|confirmed| ConfirmedOnly { confirmed }),
                performance,
            });
        });
    }

    /// End-of-stream finalization: one last transcription pass (if there's
    /// unsent audio), full-text post-processing, `session_end`. Bounded by
    /// `finalization_timeout`; on expiry, promotes whatever tentative text
    /// exists and reports `finalizationTimedOut=true`.
    pub async fn finalize(&self) {
        let deadline = self.config.finalization_timeout;
        let pass = tokio::time::timeout(deadline, self.run_transcription_pass()).await;

        let timed_out = pass.is_err();
        if timed_out {
            warn!("finalization deadline ({:?}) exceeded", deadline);
        } else if let Ok(Err(e)) = &pass {
            warn!("final transcription pass failed: {e}");
        }

        let mut session = self.session.lock().await;
        let (confirmed, _tentative) = session.differ.finalize();
        session.ended = true;
        let session_elapsed = session.buffer.session_elapsed_sec();
        drop(session);

        let (hiragana_full, translation_full, normalization_ms, translation_ms) = if timed_out {
            (None, None, None, None)
        } else {
            let session = self.session.lock().await;
            let want_hiragana = session.options.enable_hiragana;
            let want_translation = session.options.enable_translation;
            drop(session);

            let norm_start = Instant::now();
            let hiragana_full = if want_hiragana {
                self.normalizer.to_hiragana(&confirmed).await.ok()
            } else {
                None
            };
            let normalization_ms = want_hiragana.then(|| norm_start.elapsed().as_millis() as u64);

            let trans_start = Instant::now();
            let translation_full = if want_translation {
                translate_with_retry(self.translator.as_ref(), &confirmed).await
            } else {
                None
            };
            let translation_ms = want_translation.then(|| trans_start.elapsed().as_millis() as u64);

            (hiragana_full, translation_full, normalization_ms, translation_ms)
        };

        let mut session = self.session.lock().await;
        if let Some(ref h) = hiragana_full {
            session.confirmed_hiragana = h.clone();
        }
        if let Some(ref t) = translation_full {
            session.confirmed_translation = t.clone();
        }
        session.push_history(HistoryEntry {
            timestamp_sec: session_elapsed,
            text: confirmed.clone(),
            hiragana: hiragana_full.clone(),
            translation: translation_full.clone(),
        });
        let sequence = session.next_sequence();
        let audio_sec = session.buffer.duration_sec(SAMPLE_RATE);
        drop(session);

        let performance = Performance {
            transcription_ms: 0,
            normalization_ms,
            translation_ms,
            total_ms: normalization_ms.unwrap_or(0) + translation_ms.unwrap_or(0),
            audio_sec,
            finalization_timed_out: timed_out,
        };

        let _ = self.events.send(SchedulerEvent::SessionEnd {
            sequence,
            transcription: TextPair {
                confirmed,
                tentative: String::new(),
            },
            hiragana: hiragana_full.map(|confirmed| ConfirmedOnly { confirmed }),
            translation: translation_full.map(|confirmed| ConfirmedOnly { confirmed }),
            performance,
        });
    }
}

/// Up to two retries with exponential backoff (100ms, 500ms) per spec §6;
/// `None` once every attempt has failed, which the caller reports as the
/// `translation` field simply being absent rather than a protocol error.
async fn translate_with_retry(translator: &dyn Translator, text: &str) -> Option<String> {
    const DELAYS_MS: [u64; 2] = [100, 500];
    for attempt in 0..=DELAYS_MS.len() {
        match translator.translate_ja_en(text).await {
            Ok(t) => return Some(t),
            Err(e) => {
                if attempt < DELAYS_MS.len() {
                    warn!("translation attempt {attempt} failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_millis(DELAYS_MS[attempt])).await;
                } else {
                    warn!("translation failed after retries: {e}");
                }
            }
        }
    }
    None
}
