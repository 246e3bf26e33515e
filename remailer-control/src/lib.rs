#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! HTTP control surface.
//!
//! A small authenticated API over a local TCP port: toggle the pause flags,
//! read the status snapshot, and list the spool from disk. Every endpoint is
//! gated by the shared `api_key` request parameter before the handler runs.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use remailer_common::Signal;
use remailer_spool::{Snapshot, SpoolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Form and JSON bodies beyond this are refused outright.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Which pause flag a control command toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseTarget {
    Sender,
    Listener,
}

/// Status snapshot, shaped exactly as the query API reports it.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub listener: ListenerStatus,
    pub sender: SenderStatus,
    pub storage: StorageStatus,
    pub timer: TimerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    pub ready: bool,
    pub running: bool,
    pub address: String,
    pub port: u16,
    /// `"SMTP"` or `"LMTP"`.
    pub mode: &'static str,
    #[serde(rename = "TLS")]
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SenderStatus {
    pub ready: bool,
    pub running: bool,
    pub host: String,
    pub port: u16,
    pub mode: &'static str,
    #[serde(rename = "TLS")]
    pub tls: bool,
    #[serde(rename = "ignoreCRT")]
    pub ignore_crt: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerStatus {
    pub enabled: bool,
    pub sec: u64,
}

/// What the control API needs from the rest of the system.
#[async_trait]
pub trait ControlBackend: Send + Sync {
    fn status(&self) -> StatusSnapshot;

    /// Rescan the spool from disk and return the fresh listing.
    async fn rescan(&self) -> Result<Snapshot, SpoolError>;

    fn pause(&self, target: PauseTarget, paused: bool);
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Access denied")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "message": "Access denied" })),
            )
                .into_response(),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Io(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn ControlBackend>,
    api_key: Arc<str>,
}

impl AppState {
    pub fn new(backend: Arc<dyn ControlBackend>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            backend,
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthParams {
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ControlForm {
    suspend_sender: Option<bool>,
    suspend_listener: Option<bool>,
}

/// Build the router with every endpoint behind the `api_key` gate.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/remailer/control", post(control_handler))
        .route("/api/remailer/query/status", get(status_handler))
        .route("/api/remailer/query/storage", get(storage_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// The auth gate: runs before any protected handler touches the request.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = Query::<AuthParams>::try_from_uri(request.uri())
        .ok()
        .and_then(|params| params.0.api_key);

    match presented {
        Some(key) if key == *state.api_key => next.run(request).await,
        _ => ControlError::Unauthorized.into_response(),
    }
}

async fn control_handler(
    State(state): State<AppState>,
    Form(form): Form<ControlForm>,
) -> Result<&'static str, ControlError> {
    if form.suspend_sender.is_none() && form.suspend_listener.is_none() {
        return Err(ControlError::BadRequest(
            "expected suspend_sender and/or suspend_listener".to_string(),
        ));
    }

    if let Some(paused) = form.suspend_sender {
        debug!(paused, "control: suspend_sender");
        state.backend.pause(PauseTarget::Sender, paused);
    }
    if let Some(paused) = form.suspend_listener {
        debug!(paused, "control: suspend_listener");
        state.backend.pause(PauseTarget::Listener, paused);
    }

    Ok("done")
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.backend.status())
}

async fn storage_handler(
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, ControlError> {
    state
        .backend
        .rescan()
        .await
        .map(Json)
        .map_err(|err| ControlError::BadRequest(err.to_string()))
}

/// The control listener.
pub struct ControlServer {
    address: SocketAddr,
    state: AppState,
}

impl ControlServer {
    pub fn new(address: SocketAddr, state: AppState) -> Self {
        Self { address, state }
    }

    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ControlError> {
        let listener = tokio::net::TcpListener::bind(self.address).await?;
        debug!(address = %self.address, "control API listening");

        axum::serve(listener, build_router(self.state.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|err| {
                error!(%err, "control server failed");
                ControlError::Io(err)
            })
    }
}
