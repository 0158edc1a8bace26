/// Cumulative STT server binary
///
/// Wires up the process-wide model singletons, the session registry and
/// its idle sweeper, and the axum router, then serves the streaming
/// endpoint until SIGTERM/Ctrl+C.
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use cumulative_stt::config::AppConfig;
use cumulative_stt::endpoint::{stream_transcribe, AppServices};
use cumulative_stt::normalizer::KanaNormalizer;
use cumulative_stt::registry::SessionRegistry;
use cumulative_stt::transcriber::{Transcriber, WhisperConfig, WhisperTranscriber};
use cumulative_stt::translator::{StubTranslator, Translator};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cumulative_stt=info".parse().unwrap()),
        )
        .init();

    info!("starting cumulative-stt server");

    let config = AppConfig::from_env();

    let whisper_config = load_whisper_config(&config);
    let transcriber: Arc<dyn Transcriber> = match WhisperTranscriber::new(whisper_config) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            error!("failed to initialize transcriber: {e}");
            std::process::exit(1);
        }
    };

    let normalizer = Arc::new(KanaNormalizer::new());
    let translator: Arc<dyn Translator> = build_translator();

    let registry = SessionRegistry::new(config.session_idle_ttl);
    let sweeper = registry.spawn_sweeper(std::time::Duration::from_secs(60));

    let transcriber_permits = Arc::new(tokio::sync::Semaphore::new(config.transcriber_concurrency));

    let services = Arc::new(AppServices {
        config,
        transcriber,
        normalizer,
        translator,
        registry,
        transcriber_permits,
    });

    let app = Router::new()
        .route("/ws/transcribe-stream-cumulative", get(stream_transcribe))
        .layer(TraceLayer::new_for_http())
        .with_state(services);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweeper.abort();
    info!("cumulative-stt server shut down");
}

#[cfg(feature = "remote-translate")]
fn build_translator() -> Arc<dyn Translator> {
    match std::env::var("TRANSLATE_ENDPOINT") {
        Ok(endpoint) => Arc::new(cumulative_stt::translator::RemoteTranslator::new(endpoint)),
        Err(_) => Arc::new(StubTranslator::new()),
    }
}

#[cfg(not(feature = "remote-translate"))]
fn build_translator() -> Arc<dyn Translator> {
    Arc::new(StubTranslator::new())
}

fn load_whisper_config(config: &AppConfig) -> WhisperConfig {
    let model_path = std::env::var("WHISPER_MODEL_PATH").unwrap_or_else(|_| {
        format!("models/ggml-{}.bin", config.whisper_model_size)
    });

    WhisperConfig {
        model_path: model_path.into(),
        language: "ja".to_string(),
        num_threads: std::env::var("WHISPER_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(num_cpus::get),
        use_gpu: std::env::var("WHISPER_USE_GPU")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true),
        beam_size: config.whisper_beam_size,
    }
}

/// Process exits 0 on SIGTERM after draining active sessions (spec §6).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining sessions");
}
