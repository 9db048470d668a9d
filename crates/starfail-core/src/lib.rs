//! Control-loop core for the `starfail` multi-interface WAN failover daemon.
//!
//! Key components, mirroring the system's own component table:
//! - [`config`] — declarative config, two-tier Input -> resolve -> snapshot
//! - [`discovery`] — interface enumeration and class detection
//! - [`collector`] — shared prober plus per-class metric adapters
//! - [`score`] — normalization, per-class weighting, EWMA/window blending
//! - [`engine`] — hysteresis/cooldown/kill-switch/predictive decision logic
//! - [`controller`] — policy-router / route-table apply with rollback
//! - [`telemetry`] — RAM-bounded per-member rings and the event log
//! - [`member`], [`metrics`], [`decision`], [`event`] — the data model
//! - [`error`] — the error taxonomy shared by every component

pub mod collector;
pub mod config;
pub mod controller;
pub mod decision;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod event;
pub mod member;
pub mod metrics;
pub mod score;
pub mod telemetry;

/// Installs a default `tracing` subscriber (env-filter based) if no
/// subscriber is already set. Safe to call multiple times.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if tracing::dispatcher::has_been_set() {
            return;
        }
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_target(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
