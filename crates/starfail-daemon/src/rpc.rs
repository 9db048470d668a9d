//! RPC / Query Surface (C7): the `starfail` namespace, transported as a
//! JSON axum router — one route per method, same error envelope and
//! status codes as the spec table.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use starfail_core::error::RpcError;
use starfail_core::event::EventType;

use crate::state::{AppState, Command};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/members", get(members))
        .route("/metrics", get(metrics))
        .route("/history", get(history))
        .route("/events", get(events))
        .route("/failover", post(failover))
        .route("/restore", post(restore))
        .route("/recheck", post(recheck))
        .route("/setlog", post(setlog))
        .route("/config", get(config))
        .route("/info", get(info))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct ApiError(RpcError);

impl From<RpcError> for ApiError {
    fn from(e: RpcError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.0.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({ "error": self.0.to_string(), "code": self.0.code() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── status ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MemberSummary {
    name: String,
    class: String,
    state: String,
    eligible: bool,
    weight: i32,
    final_score: Option<f64>,
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_s: u64,
    version: String,
    active_member: Option<String>,
    members: Vec<MemberSummary>,
}

async fn status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let discovery = state.discovery().lock().await;
    let engine = state.engine().lock().await;
    let members = discovery
        .members()
        .map(|m| {
            let score = state.telemetry().latest_score(&m.name);
            MemberSummary {
                name: m.name.clone(),
                class: m.class.as_str().to_string(),
                state: format!("{:?}", m.state).to_lowercase(),
                eligible: m.eligible,
                weight: m.weight,
                final_score: score.map(|s| s.final_score),
            }
        })
        .collect();
    Ok(Json(StatusResponse {
        uptime_s: state.uptime_s(),
        version: crate::state::VERSION.to_string(),
        active_member: engine.active_member().map(str::to_string),
        members,
    }))
}

// ── members ─────────────────────────────────────────────────────────

async fn members(State(state): State<AppState>) -> ApiResult<Vec<MemberSummary>> {
    let discovery = state.discovery().lock().await;
    let out = discovery
        .members()
        .map(|m| MemberSummary {
            name: m.name.clone(),
            class: m.class.as_str().to_string(),
            state: format!("{:?}", m.state).to_lowercase(),
            eligible: m.eligible,
            weight: m.weight,
            final_score: state.telemetry().latest_score(&m.name).map(|s| s.final_score),
        })
        .collect();
    Ok(Json(out))
}

// ── metrics ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MemberQuery {
    member: Option<String>,
}

async fn metrics(
    State(state): State<AppState>,
    Query(q): Query<MemberQuery>,
) -> ApiResult<serde_json::Value> {
    match q.member {
        Some(name) => {
            let latest = state.telemetry().get_metrics(&name, Some(1));
            Ok(Json(serde_json::json!({ name: latest.last() })))
        }
        None => {
            let discovery = state.discovery().lock().await;
            let mut out = serde_json::Map::new();
            for m in discovery.members() {
                let latest = state.telemetry().get_metrics(&m.name, Some(1));
                out.insert(m.name.clone(), serde_json::to_value(latest.last()).unwrap_or_default());
            }
            Ok(Json(serde_json::Value::Object(out)))
        }
    }
}

// ── history ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct HistoryQuery {
    member: String,
    limit: Option<usize>,
    #[allow(dead_code)]
    hours: Option<u64>,
}

async fn history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> ApiResult<serde_json::Value> {
    if state.discovery().lock().await.member(&q.member).is_none() {
        return Err(RpcError::UnknownMember(q.member).into());
    }
    let metrics = state.telemetry().get_metrics(&q.member, q.limit);
    let scores = state.telemetry().get_scores(&q.member, q.limit);
    Ok(Json(serde_json::json!({ "metrics": metrics, "scores": scores })))
}

// ── events ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EventsQuery {
    limit: Option<usize>,
    #[allow(dead_code)]
    hours: Option<u64>,
    #[serde(rename = "type")]
    event_type: Option<String>,
}

fn parse_event_type(s: &str) -> Option<EventType> {
    match s {
        "discovered" => Some(EventType::Discovered),
        "retired" => Some(EventType::Retired),
        "score" => Some(EventType::Score),
        "switch" => Some(EventType::Switch),
        "restore" => Some(EventType::Restore),
        "kill_switch" => Some(EventType::KillSwitch),
        "config_reload" => Some(EventType::ConfigReload),
        "controller_error" => Some(EventType::ControllerError),
        "rpc_call" => Some(EventType::RpcCall),
        "warning" => Some(EventType::Warning),
        _ => None,
    }
}

async fn events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> ApiResult<serde_json::Value> {
    let filter = match q.event_type {
        Some(s) => match parse_event_type(&s) {
            Some(t) => Some(t),
            None => return Err(RpcError::InvalidArgs(format!("unknown event type `{s}`")).into()),
        },
        None => None,
    };
    let events = state.telemetry().get_events(filter, q.limit);
    Ok(Json(serde_json::json!(events)))
}

// ── failover ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct FailoverRequest {
    member: String,
    reason: Option<String>,
}

async fn failover(
    State(state): State<AppState>,
    Json(body): Json<FailoverRequest>,
) -> ApiResult<serde_json::Value> {
    if body.member.is_empty() {
        return Err(RpcError::InvalidArgs("member must not be empty".to_string()).into());
    }
    let (tx, rx) = tokio::sync::oneshot::channel();
    state
        .send_command(Command::Failover {
            member: body.member.clone(),
            reason: body.reason,
            reply: tx,
        })
        .await
        .map_err(RpcError::Internal)?;
    match rx.await.map_err(|_| RpcError::Internal("supervisor did not reply".to_string()))? {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "ok", "active": body.member }))),
        Err(e) => Err(RpcError::UnknownMember(e).into()),
    }
}

// ── restore ─────────────────────────────────────────────────────────

async fn restore(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    state
        .send_command(Command::Restore { reply: tx })
        .await
        .map_err(RpcError::Internal)?;
    rx.await.map_err(|_| RpcError::Internal("supervisor did not reply".to_string()))?
        .map_err(RpcError::Internal)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ── recheck ─────────────────────────────────────────────────────────

async fn recheck(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    state
        .send_command(Command::Recheck { reply: tx })
        .await
        .map_err(RpcError::Internal)?;
    let _ = rx.await;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ── setlog ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SetLogRequest {
    level: String,
}

async fn setlog(
    State(state): State<AppState>,
    Json(body): Json<SetLogRequest>,
) -> ApiResult<serde_json::Value> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    state
        .send_command(Command::SetLog { level: body.level, reply: tx })
        .await
        .map_err(RpcError::Internal)?;
    rx.await
        .map_err(|_| RpcError::Internal("supervisor did not reply".to_string()))?
        .map_err(RpcError::InvalidArgs)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ── config ──────────────────────────────────────────────────────────

async fn config(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let cfg = state.config();
    Ok(Json(serde_json::json!({
        "poll_interval_ms": cfg.poll_interval_ms,
        "decision_interval_ms": cfg.decision_interval_ms,
        "retention_hours": cfg.retention_hours,
        "max_ram_mb": cfg.max_ram_mb,
        "predictive": cfg.predictive,
        "switch_margin": cfg.switch_margin,
        "min_uptime_s": cfg.min_uptime_s,
        "cooldown_s": cfg.cooldown_s,
        "recovery_hold_s": cfg.recovery_hold_s,
        "use_policy_router": cfg.use_policy_router,
        "member_count": cfg.members.len(),
    })))
}

// ── info ────────────────────────────────────────────────────────────

async fn info(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let stats = state.telemetry().stats();
    Ok(Json(serde_json::json!({
        "version": crate::state::VERSION,
        "uptime_s": state.uptime_s(),
        "started_at": state.started_wall().to_rfc3339(),
        "members": stats.member_count,
        "samples": stats.sample_count,
        "events": stats.event_count,
        "ram_bytes": stats.ram_bytes,
    })))
}
