//! Optional HTTP surface: `/health`, `/health/ready`, `/health/live`, and
//! a Prometheus text-exposition `/metrics` endpoint, served on a separate
//! port from the RPC namespace.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::fmt::Write as _;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/live", get(live))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn live(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_live() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stalled")
    }
}

/// Renders the stable metric names from the ambient-stack contract. Follows
/// the teacher's `render_prometheus` layout: one `# HELP`/`# TYPE` pair per
/// metric family, then one sample line per label set.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let discovery = state.discovery().lock().await;
    let mut out = String::new();

    let _ = writeln!(out, "# HELP starfail_member_score current blended score per member");
    let _ = writeln!(out, "# TYPE starfail_member_score gauge");
    for m in discovery.members() {
        if let Some(score) = state.telemetry().latest_score(&m.name) {
            let _ = writeln!(
                out,
                "starfail_member_score{{member=\"{}\",class=\"{}\"}} {}",
                m.name,
                m.class.as_str(),
                score.final_score
            );
        }
    }

    let _ = writeln!(out, "# HELP starfail_member_latency_ms last observed latency per member");
    let _ = writeln!(out, "# TYPE starfail_member_latency_ms gauge");
    for m in discovery.members() {
        let latest = state.telemetry().get_metrics(&m.name, Some(1));
        if let Some(latency) = latest.last().and_then(|s| s.latency_ms) {
            let _ = writeln!(
                out,
                "starfail_member_latency_ms{{member=\"{}\",class=\"{}\"}} {}",
                m.name,
                m.class.as_str(),
                latency
            );
        }
    }

    let _ = writeln!(out, "# HELP starfail_member_loss_pct last observed packet loss percentage per member");
    let _ = writeln!(out, "# TYPE starfail_member_loss_pct gauge");
    for m in discovery.members() {
        let latest = state.telemetry().get_metrics(&m.name, Some(1));
        if let Some(loss) = latest.last().and_then(|s| s.loss_pct) {
            let _ = writeln!(
                out,
                "starfail_member_loss_pct{{member=\"{}\",class=\"{}\"}} {}",
                m.name,
                m.class.as_str(),
                loss
            );
        }
    }

    let stats = state.telemetry().stats();
    // Reconcile/no-op applies also emit `EventType::Switch` (tagged
    // `payload{reconciled:true}`) to keep the event log showing current
    // state; they didn't move traffic and must not inflate the counter.
    let switches = state
        .telemetry()
        .get_events(Some(starfail_core::event::EventType::Switch), None)
        .iter()
        .filter(|e| !e.payload.as_ref().and_then(|p| p.get("reconciled")).and_then(|v| v.as_bool()).unwrap_or(false))
        .count();
    let controller_errors = state
        .telemetry()
        .get_events(Some(starfail_core::event::EventType::ControllerError), None)
        .len();

    let _ = writeln!(out, "# HELP starfail_switches_total total failover switches since start");
    let _ = writeln!(out, "# TYPE starfail_switches_total counter");
    let _ = writeln!(out, "starfail_switches_total {switches}");

    let _ = writeln!(out, "# HELP starfail_controller_errors_total total controller apply failures since start");
    let _ = writeln!(out, "# TYPE starfail_controller_errors_total counter");
    let _ = writeln!(out, "starfail_controller_errors_total {controller_errors}");

    let _ = writeln!(out, "# HELP starfail_ram_bytes current telemetry ring RAM usage in bytes");
    let _ = writeln!(out, "# TYPE starfail_ram_bytes gauge");
    let _ = writeln!(out, "starfail_ram_bytes {}", stats.ram_bytes);

    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], out)
}
