use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::dispatcher::DispatchError;
use crate::agent::engine::Engine;
use crate::session::{Session, ToolEvent, TranscriptEntry};
use crate::settings::{RequestOverrides, SessionSettings, SessionSettingsPatch};

const INDEX_HTML: &str = include_str!("ui.html");

/// Sessions are independent; turns inside one session run one at a time.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<RwLock<Vec<SessionHandle>>>,
    idle_ttl: TimeDelta,
}

#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub inner: Arc<Mutex<Session>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let idle_ttl = engine.config().session_idle_ttl();
        Self { engine, sessions: Arc::default(), idle_ttl }
    }

    pub fn with_idle_ttl(mut self, ttl: TimeDelta) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Locks the session and marks it as active.
    async fn lock_session(&self, id: Uuid) -> Result<OwnedMutexGuard<Session>, ApiError> {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .find(|h| h.id == id)
                .map(|h| h.inner.clone())
                .ok_or(ApiError::SessionNotFound(id))?
        };
        let mut session = handle.lock_owned().await;
        session.touch();
        Ok(session)
    }

    /// Drops sessions idle for longer than the configured ttl. A session
    /// whose lock is held is mid-turn and always survives.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|h| match h.inner.try_lock() {
            Ok(session) => !session.is_idle(now, self.idle_ttl),
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "idle sessions swept");
        }
        evicted
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("message text is empty")]
    EmptyInput,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::EmptyInput => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!(error = %self, "turn failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    pub client_id: Option<String>,
    pub settings: Option<SessionSettings>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionBody>>,
) -> Json<CreateSessionResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = Session::new(body.client_id, body.settings.unwrap_or_default());
    let id = session.id;
    state.sessions.write().await.push(SessionHandle { id, inner: Arc::new(Mutex::new(session)) });
    info!(session = %id, "session created");
    Json(CreateSessionResponse { id })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Uuid>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.sessions.read().await;
    Json(ListSessionsResponse { sessions: sessions.iter().map(|h| h.id).collect() })
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    let mut sessions = state.sessions.write().await;
    let before = sessions.len();
    sessions.retain(|h| h.id != id);
    if sessions.len() == before {
        return Err(ApiError::SessionNotFound(id));
    }
    info!(session = %id, "session deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub id: Uuid,
    pub intro: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
}

async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let mut session = state.lock_session(id).await?;
    let out = state.engine.render_cycle(&mut session, None, &RequestOverrides::default()).await?;
    Ok(Json(TranscriptResponse { id, intro: out.intro, transcript: session.transcript.clone() }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostMessageBody {
    pub text: String,
    #[serde(default)]
    pub overrides: RequestOverrides,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub reply: String,
    pub intro: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PostMessageBody>,
) -> Result<Json<PostMessageResponse>, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::EmptyInput);
    }
    let mut session = state.lock_session(id).await?;
    let out = state.engine.render_cycle(&mut session, Some(&body.text), &body.overrides).await?;
    Ok(Json(PostMessageResponse {
        reply: out.reply.unwrap_or_default(),
        intro: out.intro,
        transcript: session.transcript.clone(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSettingsResponse {
    pub settings: SessionSettings,
}

async fn get_session_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSettingsResponse>, ApiError> {
    let settings = state.lock_session(id).await?.settings.clone();
    Ok(Json(SessionSettingsResponse { settings }))
}

async fn patch_session_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<SessionSettingsPatch>,
) -> Result<Json<SessionSettingsResponse>, ApiError> {
    let mut session = state.lock_session(id).await?;
    session.settings.apply_patch(patch);
    Ok(Json(SessionSettingsResponse { settings: session.settings.clone() }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolHistoryResponse {
    pub tools: Vec<ToolEvent>,
}

async fn get_tool_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ToolHistoryResponse>, ApiError> {
    let tools = state.lock_session(id).await?.tool_history.clone();
    Ok(Json(ToolHistoryResponse { tools }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", axum::routing::delete(delete_session))
        .route("/v1/sessions/:id/transcript", get(get_transcript))
        .route("/v1/sessions/:id/messages", post(post_message))
        .route("/v1/sessions/:id/settings", get(get_session_settings).patch(patch_session_settings))
        .route("/v1/sessions/:id/tools", get(get_tool_history))
        .with_state(state)
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            sweeper.sweep_idle(Utc::now()).await;
        }
    });

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
