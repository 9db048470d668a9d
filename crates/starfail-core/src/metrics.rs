//! [`Metrics`] — a single timestamped sample for one [`crate::member::Member`].
//!
//! *Missing* is distinct from zero and must propagate through scoring:
//! every optional field is `Option<T>`, never defaulted to a sentinel
//! numeric value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub latency_ms: Option<f64>,
    pub loss_pct: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub reachable: bool,

    // Starlink
    pub snr_db: Option<f64>,
    pub obstruction_fraction: Option<f64>,
    pub pop_latency_ms: Option<f64>,
    pub pop_drop_rate: Option<f64>,
    pub seconds_to_next_sat: Option<f64>,

    // Cellular
    pub rsrp_dbm: Option<f64>,
    pub rsrq_db: Option<f64>,
    pub sinr_db: Option<f64>,
    pub rssi_dbm: Option<f64>,
    pub network_type: Option<String>,
    pub operator: Option<String>,
    pub roaming: Option<bool>,

    // Wi-Fi
    pub signal_dbm: Option<f64>,
    pub noise_dbm: Option<f64>,
    pub bitrate_mbps: Option<f64>,

    // VPN
    pub tunnel_up: Option<bool>,
    pub handshake_age_s: Option<f64>,

    /// Named hardware alert flags (`thermal_shutdown`, `motors_stuck`,
    /// `dish_water_detected`, `router_water_detected`, ...).
    #[serde(default)]
    pub alerts: Vec<String>,
}

impl Metrics {
    /// A sample indicating total unreachability: prober exhausted all
    /// probes within the deadline.
    pub fn unreachable(timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            timestamp,
            latency_ms: None,
            loss_pct: Some(100.0),
            jitter_ms: None,
            reachable: false,
            snr_db: None,
            obstruction_fraction: None,
            pop_latency_ms: None,
            pop_drop_rate: None,
            seconds_to_next_sat: None,
            rsrp_dbm: None,
            rsrq_db: None,
            sinr_db: None,
            rssi_dbm: None,
            network_type: None,
            operator: None,
            roaming: None,
            signal_dbm: None,
            noise_dbm: None,
            bitrate_mbps: None,
            tunnel_up: None,
            handshake_age_s: None,
            alerts: Vec::new(),
        }
    }

    pub fn has_alert(&self, name: &str) -> bool {
        self.alerts.iter().any(|a| a == name)
    }

    /// Rough heap footprint used by the telemetry ring's RAM accounting.
    pub fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.network_type.as_ref().map_or(0, String::len)
            + self.operator.as_ref().map_or(0, String::len)
            + self.alerts.iter().map(String::len).sum::<usize>()
    }
}
