/// StreamEndpoint: the `/ws/transcribe-stream-cumulative` axum handler
///
/// Socket split + separate ingest/egress tasks, `tokio::select!` to observe
/// whichever finishes first, deregister on exit — grounded on
/// `other_examples/2babeedb_mmogr-gglib__crates-gglib-axum-src-handlers-voice_ws.rs.rs`.
/// JSON-over-text-frame dispatch against a session-scoped mutex follows
/// `other_examples/90d1e192_..._stream.rs.rs`.
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audio;
use crate::error::ErrorCode;
use crate::normalizer::Normalizer;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::SessionRegistry;
use crate::scheduler::{PipelineScheduler, SchedulerEvent};
use crate::session::{SessionOptionsUpdate, SessionState};
use crate::transcriber::Transcriber;
use crate::translator::Translator;
use crate::config::AppConfig;

/// Process-wide singletons shared by every connection (spec §5).
pub struct AppServices {
    pub config: AppConfig,
    pub transcriber: Arc<dyn Transcriber>,
    pub normalizer: Arc<dyn Normalizer>,
    pub translator: Arc<dyn Translator>,
    pub registry: Arc<SessionRegistry>,
    /// Bounds concurrent `Transcriber` invocations across every session
    /// (spec §5); shared by every `PipelineScheduler` this process creates.
    pub transcriber_permits: Arc<Semaphore>,
}

pub async fn stream_transcribe(
    ws: WebSocketUpgrade,
    State(app): State<Arc<AppServices>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, app))
}

async fn handle_stream(socket: WebSocket, app: Arc<AppServices>) {
    let (ws_sender, ws_receiver) = socket.split();

    let session_state = SessionState::new(
        app.config.max_audio_bytes(),
        app.config.overlap_bytes(),
        app.config.prompt_max_chars,
    );
    let (session_id, session) = app.registry.create(session_state).await;
    info!("session {session_id} connected");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (events_tx, events_rx) = mpsc::unbounded_channel::<SchedulerEvent>();

    let scheduler = PipelineScheduler::new(
        Arc::clone(&session),
        Arc::clone(&app.transcriber),
        Arc::clone(&app.normalizer),
        Arc::clone(&app.translator),
        app.config.clone(),
        events_tx,
        Arc::clone(&app.transcriber_permits),
    );

    let _ = outbound_tx.send(ServerMessage::Connected { session_id });

    let egress = tokio::spawn(egress_task(ws_sender, outbound_rx, events_rx));

    let ingest_scheduler = Arc::clone(&scheduler);
    let ingest_session = Arc::clone(&session);
    let ingest_outbound = outbound_tx.clone();
    let mut ingest = tokio::spawn(async move {
        ingest_task(
            ws_receiver,
            ingest_session,
            ingest_scheduler,
            ingest_outbound,
        )
        .await
    });

    tokio::select! {
        _ = &mut ingest => {}
        _ = &mut egress => {}
    }

    // Drop every remaining handle to the channels so the other task's
    // receive loop observes closure and drains its buffered messages
    // instead of hanging.
    drop(outbound_tx);
    drop(scheduler);
    ingest.abort();

    let _ = egress.await;
    app.registry.destroy(session_id).await;
    info!("session {session_id} destroyed");
}

async fn ingest_task(
    mut ws_receiver: futures::stream::SplitStream<WebSocket>,
    session: crate::registry::SharedSession,
    scheduler: Arc<PipelineScheduler>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut ended = false;
    let mut chunk_id: u64 = 0;

    while let Some(frame) = ws_receiver.next().await {
        let message = match frame {
            Ok(m) => m,
            Err(e) => {
                warn!("websocket receive error: {e}");
                break;
            }
        };

        if ended {
            // Protocol says `end` initiates finalization; further frames
            // are simply ignored while finalization is in progress.
            continue;
        }

        match message {
            Message::Binary(data) => {
                let raw_pcm = { session.lock().await.options.raw_pcm };
                match audio::decode_frame(&data, raw_pcm) {
                    Ok(pcm) => {
                        let append_result = {
                            let mut session = session.lock().await;
                            session.touch();
                            session.buffer.append(pcm)
                        };
                        if let Err(e) = append_result {
                            let _ = outbound.send(ServerMessage::Error {
                                code: ErrorCode::Decode.as_str(),
                                message: e.to_string(),
                            });
                            continue;
                        }

                        chunk_id += 1;
                        let (duration_sec, session_elapsed_sec) = {
                            let session = session.lock().await;
                            (
                                session.buffer.duration_sec(crate::config::SAMPLE_RATE),
                                session.buffer.session_elapsed_sec(),
                            )
                        };
                        scheduler.on_chunk_appended().await;

                        let _ = outbound.send(ServerMessage::Accumulating {
                            chunk_id,
                            duration_sec,
                            session_elapsed_sec,
                            chunks_until_next_transcription: scheduler
                                .chunks_until_next_transcription(),
                        });
                    }
                    Err(e) => {
                        debug!("decode error: {e}");
                        let _ = outbound.send(ServerMessage::Error {
                            code: ErrorCode::Decode.as_str(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Options {
                    enable_hiragana,
                    enable_translation,
                    enable_summary,
                    raw_pcm,
                }) => {
                    let mut session = session.lock().await;
                    session.touch();
                    session.options.apply(&SessionOptionsUpdate {
                        enable_hiragana,
                        enable_translation,
                        enable_summary,
                        raw_pcm,
                    });
                }
                Ok(ClientMessage::End) => {
                    ended = true;
                    scheduler.finalize().await;
                }
                Err(e) => {
                    warn!("malformed protocol message: {e}");
                    let _ = outbound.send(ServerMessage::Error {
                        code: ErrorCode::Protocol.as_str(),
                        message: e.to_string(),
                    });
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn egress_task(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
) {
    loop {
        let (message, fatal) = tokio::select! {
            biased;
            msg = outbound_rx.recv() => {
                match msg {
                    Some(m) => (Some(m), false),
                    None if events_rx.is_closed() => break,
                    None => continue,
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(e) => {
                        let fatal = matches!(e, SchedulerEvent::ModelFatal { .. });
                        (Some(scheduler_event_to_message(e)), fatal)
                    }
                    None if outbound_rx.is_closed() => break,
                    None => continue,
                }
            }
        };

        let Some(message) = message else { continue };

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                error!("failed to serialize outgoing message: {e}");
                continue;
            }
        };

        if ws_sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }

        // Model-fatal errors close the session (spec §7 kind 3).
        if fatal {
            break;
        }
    }
}

fn scheduler_event_to_message(event: SchedulerEvent) -> ServerMessage {
    match event {
        SchedulerEvent::Progress { step, message } => ServerMessage::Progress { step, message },
        SchedulerEvent::TranscriptionUpdate {
            sequence,
            transcription,
            hiragana,
            translation,
            performance,
        } => ServerMessage::TranscriptionUpdate {
            sequence,
            is_final: false,
            transcription,
            hiragana,
            translation,
            performance,
        },
        SchedulerEvent::SessionEnd {
            sequence,
            transcription,
            hiragana,
            translation,
            performance,
        } => ServerMessage::SessionEnd {
            sequence,
            is_final: true,
            transcription,
            hiragana,
            translation,
            performance,
        },
        SchedulerEvent::ModelTransient { message } => ServerMessage::Error {
            code: ErrorCode::ModelTransient.as_str(),
            message,
        },
        SchedulerEvent::ModelFatal { message } => ServerMessage::Error {
            code: ErrorCode::ModelFatal.as_str(),
            message,
        },
    }
}
