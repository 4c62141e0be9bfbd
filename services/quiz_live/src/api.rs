use crate::{
    auth::{self, TokenVerifier},
    config::Config,
    leaderboard::Scoreboard,
    relay,
};
use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{future, SinkExt, StreamExt};
use hub_api::{kinds, Event, Topic};
use livehub::{Frame, Hub, HubError, Inbound};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub scoreboard: Arc<Scoreboard>,
    pub verifier: Option<TokenVerifier>,
    pub config: Config,
}

impl AppState {
    /// Start the hub with the scoreboard as its welcome hook. Must run inside
    /// a tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let scoreboard = Arc::new(Scoreboard::new(config.leaderboard_size));
        let hub = Hub::start(config.hub.clone(), scoreboard.clone())?;
        let verifier = config.jwt_secret.as_deref().map(TokenVerifier::new);
        Ok(Self {
            hub,
            scoreboard,
            verifier,
            config,
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let producers = Router::new()
        .route("/api/events", post(publish_event))
        .route("/api/scores", post(submit_score))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/ws/leaderboard", get(ws_handler))
        .route("/ws/quiz/:quiz_id", get(ws_quiz_handler))
        .merge(producers)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    req: axum::http::Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let Some(verifier) = &state.verifier else {
        return Ok(next.run(req).await);
    };
    match auth::bearer_token(req.headers()).map(|t| verifier.verify(t)) {
        Some(Ok(_)) => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

fn err(status: StatusCode, msg: &str) -> (StatusCode, Json<ErrorResp>) {
    (status, Json(ErrorResp { error: msg.into() }))
}

#[derive(Serialize)]
struct StatsResp {
    connections: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResp> {
    Json(StatsResp {
        connections: state.hub.live_count(),
    })
}

async fn publish_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResp>)> {
    if event.kind.trim().is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "missing_type"));
    }
    state.hub.submit(&event).await.map_err(|e| match e {
        HubError::Encode(_) => err(StatusCode::BAD_REQUEST, "encode"),
        _ => err(StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    })?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct ScoreReq {
    user_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    quiz_id: Option<String>,
    points: i64,
}

#[derive(Serialize)]
struct ScoreResp {
    user_id: String,
    total: i64,
}

async fn submit_score(
    State(state): State<AppState>,
    Json(req): Json<ScoreReq>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResp>)> {
    let user_id = req.user_id.trim();
    if user_id.is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "missing_user"));
    }
    let name = req.name.as_deref().unwrap_or(user_id);
    let total = state.scoreboard.record(user_id, name, req.points);

    let topic = Topic::from_opt(req.quiz_id.as_deref());
    if !topic.is_global() {
        let data = json!({
            "user_id": user_id,
            "name": name,
            "points": req.points,
            "total": total,
        });
        state.hub.broadcast(kinds::SCORE_SUBMITTED, data, topic).await;
    }
    let snapshot = state.scoreboard.snapshot();
    state
        .hub
        .broadcast(snapshot.kind, snapshot.data, snapshot.topic)
        .await;
    Ok(Json(ScoreResp {
        user_id: user_id.to_string(),
        total,
    }))
}

#[derive(Deserialize)]
struct WsParams {
    quiz_id: Option<String>,
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Result<Response, StatusCode> {
    let topic = Topic::from_opt(params.quiz_id.as_deref());
    accept(ws, state, &headers, params.token.as_deref(), topic)
}

async fn ws_quiz_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(quiz_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Result<Response, StatusCode> {
    accept(ws, state, &headers, params.token.as_deref(), Topic::from(quiz_id))
}

fn accept(
    ws: WebSocketUpgrade,
    state: AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
    topic: Topic,
) -> Result<Response, StatusCode> {
    if let Some(verifier) = &state.verifier {
        let token = auth::bearer_token(headers)
            .or(query_token)
            .ok_or(StatusCode::UNAUTHORIZED)?;
        verifier.verify(token).map_err(|_| StatusCode::UNAUTHORIZED)?;
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.hub, topic)))
}

async fn handle_socket(socket: WebSocket, hub: Hub, topic: Topic) {
    let (sender, receiver) = socket.split();
    let sink = sender.with(|frame: Frame| {
        future::ready(Ok::<_, axum::Error>(Message::Text(frame.to_string())))
    });
    let stream = receiver.map(|msg| {
        msg.map(|m| match m {
            Message::Close(_) => Inbound::Close,
            _ => Inbound::Message,
        })
    });
    if let Err(e) = hub.join(sink, stream, topic) {
        debug!(error = %e, "connection refused");
    }
}

/// Run the HTTP server (and the relay, when configured) until Ctrl+C, then
/// shut the hub down.
pub async fn run_http_server(config: Config) -> Result<()> {
    let state = AppState::new(config.clone())?;
    let shutdown = CancellationToken::new();

    let relay = match &config.relay_bind {
        Some(bind) => {
            let listener = TcpListener::bind(bind)
                .await
                .with_context(|| format!("binding relay on {bind}"))?;
            info!(addr = %bind, "relay listening");
            Some(tokio::spawn(relay::serve(
                listener,
                state.hub.clone(),
                shutdown.clone(),
            )))
        }
        None => None,
    };

    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    info!(%addr, "listening");
    let signal = shutdown.clone();
    axum::Server::try_bind(&addr)?
        .serve(build_router(state.clone()).into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(relay) = relay {
        let _ = relay.await;
    }
    state.hub.shutdown().await;
    Ok(())
}
