//! Shared application state threaded through the Supervisor tick loop and
//! every RPC/HTTP handler. Mirrors the teacher's `Arc<Inner>` + `DashMap`
//! shared-state pattern, generalized from one connection table to the
//! failover daemon's Members/Telemetry/Engine/Controller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot, Mutex};

use starfail_core::config::Config;
use starfail_core::controller::Controller;
use starfail_core::discovery::Discovery;
use starfail_core::engine::DecisionEngine;
use starfail_core::telemetry::TelemetryStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Override/control-plane intents submitted by RPC handlers, consumed by
/// the Supervisor between ticks (the bounded command channel from the
/// concurrency model).
pub enum Command {
    Failover {
        member: String,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Restore {
        reply: oneshot::Sender<Result<(), String>>,
    },
    Recheck {
        reply: oneshot::Sender<()>,
    },
    SetLog {
        level: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
}

struct Inner {
    config: ArcSwap<Config>,
    discovery: Mutex<Discovery>,
    engine: Mutex<DecisionEngine>,
    telemetry: TelemetryStore,
    controller: Controller,
    started_at: Instant,
    started_wall: chrono::DateTime<chrono::Utc>,
    ready: AtomicBool,
    last_tick_millis: AtomicU64,
    command_tx: mpsc::Sender<Command>,
    reload_filter: tracing_subscriber::reload::Handle<
        tracing_subscriber::EnvFilter,
        tracing_subscriber::Registry,
    >,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    pub fn new(
        config: Config,
        simulate: bool,
        command_tx: mpsc::Sender<Command>,
        reload_filter: tracing_subscriber::reload::Handle<
            tracing_subscriber::EnvFilter,
            tracing_subscriber::Registry,
        >,
    ) -> Self {
        let controller = if config.use_policy_router {
            Controller::policy_router()
        } else {
            Controller::route_table()
        };
        Self::with_controller(config, simulate, command_tx, reload_filter, controller)
    }

    /// Same as [`AppState::new`] but with an injectable [`Controller`],
    /// used by integration tests to exercise the apply-failure/rollback
    /// path with a backend that deterministically fails.
    pub fn with_controller(
        config: Config,
        simulate: bool,
        command_tx: mpsc::Sender<Command>,
        reload_filter: tracing_subscriber::reload::Handle<
            tracing_subscriber::EnvFilter,
            tracing_subscriber::Registry,
        >,
        controller: Controller,
    ) -> Self {
        let telemetry = TelemetryStore::new(config.retention_hours, config.max_ram_mb);
        Self {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                discovery: Mutex::new(Discovery::new(simulate)),
                engine: Mutex::new(DecisionEngine::new()),
                telemetry,
                controller,
                started_at: Instant::now(),
                started_wall: chrono::Utc::now(),
                ready: AtomicBool::new(false),
                last_tick_millis: AtomicU64::new(0),
                command_tx,
                reload_filter,
            }),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.inner.config.load_full()
    }

    pub fn replace_config(&self, config: Config) {
        self.inner
            .telemetry
            .set_caps(config.retention_hours, config.max_ram_mb);
        self.inner.config.store(Arc::new(config));
    }

    pub fn discovery(&self) -> &Mutex<Discovery> {
        &self.inner.discovery
    }

    pub fn engine(&self) -> &Mutex<DecisionEngine> {
        &self.inner.engine
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.inner.telemetry
    }

    pub fn controller(&self) -> &Controller {
        &self.inner.controller
    }

    pub fn uptime_s(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    pub fn started_wall(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.started_wall
    }

    pub fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    pub fn mark_tick(&self) {
        let now_ms = self.inner.started_at.elapsed().as_millis() as u64;
        self.inner.last_tick_millis.store(now_ms, Ordering::Relaxed);
    }

    /// `true` while the main tick has advanced within the last
    /// `2 * poll_interval_ms`, matching the liveness contract in the
    /// external HTTP surface.
    pub fn is_live(&self) -> bool {
        let now_ms = self.inner.started_at.elapsed().as_millis() as u64;
        let last = self.inner.last_tick_millis.load(Ordering::Relaxed);
        let threshold = 2 * self.config().poll_interval_ms;
        now_ms.saturating_sub(last) <= threshold
    }

    pub async fn send_command(&self, cmd: Command) -> Result<(), String> {
        self.inner
            .command_tx
            .send(cmd)
            .await
            .map_err(|_| "supervisor command channel closed".to_string())
    }

    pub fn set_log_level(&self, level: &str) -> Result<(), String> {
        let filter = tracing_subscriber::EnvFilter::try_new(level)
            .map_err(|e| format!("invalid log level: {e}"))?;
        self.inner
            .reload_filter
            .reload(filter)
            .map_err(|e| format!("failed to reload log filter: {e}"))
    }
}
