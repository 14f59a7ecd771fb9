//! HTTP and WebSocket surface.
//!
//! - `GET  /v1/health`          service + model status
//! - `GET  /v1/models/current`  model metadata
//! - `POST /v1/infer/image`     one-shot inference on a raw image body
//! - `GET  /v1/infer/stream`    WebSocket stream session
//!
//! The server runs on its own thread with a private tokio runtime. Each stream
//! session is an async task; only decode + detector work for a frame goes to
//! the blocking pool, so idle sessions hold no blocking thread.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::oneshot;

use crate::error::InferenceError;
use crate::frame::decode_image_bytes;
use crate::pipeline::InferencePipeline;
use crate::schema::{HealthResponse, ImageInferResponse, ModelMeta, StreamEnvelope};
use crate::session::{Inbound, SessionState, StreamProtocol};

pub const API_PREFIX: &str = "/v1";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Largest accepted image upload or stream message.
    pub max_upload_bytes: usize,
    /// Cap on threads running decode + detector work.
    pub max_blocking_threads: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and wait for the server thread.
    pub fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct AppState {
    pipeline: Arc<InferencePipeline>,
    max_upload_bytes: usize,
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<InferencePipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<InferencePipeline>) -> Self {
        Self { cfg, pipeline }
    }

    /// Bind and serve on a background thread.
    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {configured_addr}"))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .max_blocking_threads(self.cfg.max_blocking_threads.max(1))
            .thread_name("lychee-api")
            .build()
            .context("failed to build api runtime")?;

        let state = Arc::new(AppState {
            pipeline: self.pipeline,
            max_upload_bytes: self.cfg.max_upload_bytes,
        });
        let app = router(state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = std::thread::spawn(move || {
            if let Err(err) = runtime.block_on(serve(listener, app, shutdown_rx)) {
                log::error!("inference api stopped: {err:#}");
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}

async fn serve(listener: TcpListener, app: Router, shutdown: oneshot::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
        })
        .await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    let v1 = Router::new()
        .route("/health", get(health))
        .route("/models/current", get(current_model))
        .route("/infer/image", post(infer_image).layer(body_limit))
        .route("/infer/stream", get(infer_stream));
    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let model = state.pipeline.model_meta();
    let status = if model.loaded { "ok" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        model,
    })
}

async fn current_model(State(state): State<Arc<AppState>>) -> Json<ModelMeta> {
    Json(state.pipeline.model_meta())
}

async fn infer_image(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) if body.len() <= state.max_upload_bytes => body,
        Ok(_) => return too_large(),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return too_large()
        }
        Err(rejection) => return detail_response(rejection.status(), rejection.body_text()),
    };

    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let frame = decode_image_bytes(&body)?;
        let (result, inference_ms) = pipeline.infer_image(&frame)?;
        Ok::<_, InferenceError>(ImageInferResponse {
            model_version: pipeline.model_version().to_string(),
            schema_version: pipeline.schema_version().to_string(),
            inference_ms,
            result,
        })
    })
    .await;

    match outcome {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(err)) => {
            log::warn!("image inference rejected: {err}");
            let status = StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            detail_response(status, err.to_string())
        }
        Err(err) => {
            log::error!("image inference task failed: {err}");
            detail_response(StatusCode::INTERNAL_SERVER_ERROR, "inference task failed")
        }
    }
}

fn too_large() -> Response {
    detail_response(StatusCode::PAYLOAD_TOO_LARGE, "Uploaded file is too large")
}

fn detail_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

async fn infer_stream(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let pipeline = state.pipeline.clone();
    ws.max_message_size(state.max_upload_bytes)
        .on_upgrade(move |socket| stream_connection(socket, pipeline))
}

async fn stream_connection(mut socket: WebSocket, pipeline: Arc<InferencePipeline>) {
    log::info!("stream session opened");
    let mut protocol = StreamProtocol::new(pipeline);

    while protocol.state() == SessionState::Open {
        let message = next_inbound(&mut socket).await;
        let reply = if message.is_frame() {
            match handle_frame(protocol, message).await {
                Some((returned, reply)) => {
                    protocol = returned;
                    reply
                }
                None => return,
            }
        } else {
            protocol.handle(message)
        };
        if let Some(reply) = reply {
            if let Err(err) = send_envelope(&mut socket, &reply).await {
                log::debug!("stream reply not delivered, closing session: {err:#}");
                protocol.close();
            }
        }
    }

    if let Some(summary) = protocol.finish() {
        if let Err(err) = send_envelope(&mut socket, &summary).await {
            log::debug!("session summary not delivered: {err:#}");
        }
    }
    let _ = socket.close().await;
}

/// Run one frame on the blocking pool. `None` if the worker panicked.
async fn handle_frame(
    mut protocol: StreamProtocol,
    message: Inbound,
) -> Option<(StreamProtocol, Option<StreamEnvelope>)> {
    let outcome = tokio::task::spawn_blocking(move || {
        let reply = protocol.handle(message);
        (protocol, reply)
    })
    .await;
    match outcome {
        Ok(done) => Some(done),
        Err(err) => {
            log::error!("stream frame worker failed, dropping session: {err}");
            None
        }
    }
}

async fn next_inbound(socket: &mut WebSocket) -> Inbound {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => return Inbound::Text(text),
            Some(Ok(Message::Binary(payload))) => return Inbound::Binary(payload),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Inbound::Disconnect,
            Some(Err(err)) => {
                log::debug!("stream socket error: {err}");
                return Inbound::Disconnect;
            }
        }
    }
}

async fn send_envelope(socket: &mut WebSocket, envelope: &StreamEnvelope) -> Result<()> {
    let text = serde_json::to_string(envelope)
        .with_context(|| format!("failed to encode {} envelope", envelope.kind()))?;
    socket
        .send(Message::Text(text))
        .await
        .context("stream client disconnected")?;
    Ok(())
}
