use crate::{
    commands::{self, Command, Response},
    semantic::{IndexSession, SemanticError},
};
use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::signal;

/// How often pending tree changes are checked for a flush.
const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
struct SharedState {
    session: Arc<IndexSession>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

fn router(session: Arc<IndexSession>) -> Router {
    let shared_state = Arc::new(SharedState { session });

    Router::new()
        .route("/api/command", post(command))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

/// Flush debounced tree changes until the task is aborted.
async fn run_flush_ticker(session: Arc<IndexSession>) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let session = session.clone();
        match tokio::task::spawn_blocking(move || session.flush_pending()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => log::error!("flush failed: {err}"),
            Err(err) => log::error!("flush task panicked: {err}"),
        }
    }
}

async fn start_app(session: Arc<IndexSession>, addr: &str) -> anyhow::Result<()> {
    // sync up front so change notifications are tracked from the start
    let warmup = {
        let session = session.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(err) = session.ensure_initialized() {
                log::error!("initial sync failed: {err}");
            }
        })
    };
    let ticker = tokio::spawn(run_flush_ticker(session.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on {addr}");

    let served = axum::serve(listener, router(session))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    ticker.abort();
    if let Err(err) = warmup.await {
        log::error!("initial sync task panicked: {err}");
    }

    served.context("server error")
}

pub fn start_daemon(session: Arc<IndexSession>, addr: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(start_app(session, addr))
}

#[derive(Debug)]
struct HttpError(SemanticError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            SemanticError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            SemanticError::Embedding(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl From<SemanticError> for HttpError {
    fn from(err: SemanticError) -> Self {
        Self(err)
    }
}

async fn command(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<Command>,
) -> Result<Json<Response>, HttpError> {
    let session = state.session.clone();

    tokio::task::spawn_blocking(move || commands::dispatch(&session, payload))
        .await
        .map_err(|err| HttpError(SemanticError::Internal(err.to_string())))?
        .map(Json)
        .map_err(Into::into)
}
