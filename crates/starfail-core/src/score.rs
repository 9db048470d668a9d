//! Normalization, per-class weighting, and score blending.
//!
//! Mirrors the EWMA smoothing approach of a link-quality scheduler: an
//! exponentially weighted moving average blended with an instantaneous
//! reading and a windowed average, clamped to a bounded range.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::member::MemberClass;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Stable,
    Falling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub instant: f64,
    pub ewma: f64,
    pub window_avg: f64,
    pub final_score: f64,
    pub trend: Trend,
    pub confidence: f64,
    pub kill_switch_reason: Option<String>,
}

impl Score {
    pub fn invariant_holds(&self) -> bool {
        let bounded = (0.0..=100.0).contains(&self.final_score);
        let killswitch_consistent =
            self.kill_switch_reason.is_none() || self.final_score == 0.0;
        bounded && killswitch_consistent
    }
}

/// `(worst, best, lower_is_better)` normalization band for one metric.
#[derive(Debug, Clone, Copy)]
struct Band {
    worst: f64,
    best: f64,
    lower_is_better: bool,
}

const fn band(worst: f64, best: f64, lower_is_better: bool) -> Band {
    Band {
        worst,
        best,
        lower_is_better,
    }
}

/// `x' = clamp01((worst - x) / (worst - best))` if lower-is-better, else
/// `clamp01((x - worst) / (best - worst))`. Monotonic in `x`, `normalize(worst)
/// = 0`, `normalize(best) = 1`.
fn normalize(band: Band, x: f64) -> f64 {
    let Band {
        worst,
        best,
        lower_is_better,
    } = band;
    let raw = if lower_is_better {
        (worst - x) / (worst - best)
    } else {
        (x - worst) / (best - worst)
    };
    raw.clamp(0.0, 1.0)
}

/// One named metric reading plus its normalization band and class weight,
/// assembled per-class in [`weighted_fields`].
struct WeightedField {
    weight: f64,
    value: Option<f64>,
    band: Band,
}

fn weighted_fields(class: MemberClass, m: &Metrics) -> Vec<WeightedField> {
    let loss = WeightedField {
        weight: 0.0,
        value: m.loss_pct,
        band: band(100.0, 0.0, true),
    };
    let latency = WeightedField {
        weight: 0.0,
        value: m.latency_ms,
        band: band(1000.0, 20.0, true),
    };
    let jitter = WeightedField {
        weight: 0.0,
        value: m.jitter_ms,
        band: band(500.0, 5.0, true),
    };

    match class {
        MemberClass::Starlink => vec![
            WeightedField { weight: 0.25, ..loss },
            WeightedField {
                weight: 0.20,
                value: m.snr_db,
                band: band(-5.0, 25.0, false),
            },
            WeightedField {
                weight: 0.15,
                value: m.obstruction_fraction,
                band: band(1.0, 0.0, true),
            },
            WeightedField { weight: 0.15, ..latency },
            WeightedField { weight: 0.10, ..jitter },
            WeightedField {
                weight: 0.10,
                value: m.pop_drop_rate,
                band: band(1.0, 0.0, true),
            },
            WeightedField {
                weight: 0.05,
                value: m.seconds_to_next_sat,
                band: band(300.0, 0.0, true),
            },
        ],
        MemberClass::Cellular => vec![
            WeightedField { weight: 0.30, ..loss },
            WeightedField {
                weight: 0.25,
                value: m.sinr_db,
                band: band(-10.0, 25.0, false),
            },
            WeightedField {
                weight: 0.20,
                value: m.rsrp_dbm,
                band: band(-120.0, -70.0, false),
            },
            WeightedField { weight: 0.15, ..latency },
            WeightedField { weight: 0.10, ..jitter },
        ],
        MemberClass::WiFi => vec![
            WeightedField { weight: 0.30, ..loss },
            WeightedField {
                weight: 0.25,
                value: snr_from_signal_noise(m),
                band: band(-5.0, 25.0, false),
            },
            WeightedField { weight: 0.20, ..latency },
            WeightedField { weight: 0.15, ..jitter },
            WeightedField {
                weight: 0.10,
                value: m.bitrate_mbps,
                band: band(0.0, 200.0, false),
            },
        ],
        MemberClass::Vpn => vec![
            WeightedField { weight: 0.30, ..loss },
            WeightedField {
                weight: 0.25,
                value: m.handshake_age_s,
                band: band(600.0, 0.0, true),
            },
            WeightedField {
                weight: 0.20,
                value: m.tunnel_up.map(|b| if b { 1.0 } else { 0.0 }),
                band: band(0.0, 1.0, false),
            },
            WeightedField { weight: 0.15, ..latency },
            WeightedField { weight: 0.10, ..jitter },
        ],
        MemberClass::Lan | MemberClass::Generic => vec![
            WeightedField { weight: 0.50, ..loss },
            WeightedField { weight: 0.30, ..latency },
            WeightedField { weight: 0.20, ..jitter },
        ],
    }
}

fn snr_from_signal_noise(m: &Metrics) -> Option<f64> {
    match (m.signal_dbm, m.noise_dbm) {
        (Some(s), Some(n)) => Some(s - n),
        _ => None,
    }
}

/// `loss_pct > 20`, `latency_ms > 2000` (any class); `obstruction_fraction
/// > 0.80` (Starlink only); named hardware alerts.
fn kill_switch_reason(class: MemberClass, m: &Metrics) -> Option<&'static str> {
    if m.loss_pct.is_some_and(|v| v > 20.0) {
        return Some("loss_pct");
    }
    if m.latency_ms.is_some_and(|v| v > 2000.0) {
        return Some("latency_ms");
    }
    if class == MemberClass::Starlink && m.obstruction_fraction.is_some_and(|v| v > 0.80) {
        return Some("obstruction_fraction");
    }
    for (flag, reason) in [
        ("thermal_shutdown", "thermal_shutdown"),
        ("motors_stuck", "motors_stuck"),
        ("dish_water_detected", "dish_water_detected"),
        ("router_water_detected", "router_water_detected"),
    ] {
        if m.has_alert(flag) {
            return Some(reason);
        }
    }
    None
}

/// `instant = 100 * sum(w_i * x_i') / sum(w_i)` over present metrics;
/// missing metrics are dropped from both the numerator and the weight
/// denominator (graceful degradation). Returns `(instant, confidence,
/// kill_switch_reason)`.
pub fn instant_score(class: MemberClass, m: &Metrics) -> (f64, f64, Option<&'static str>) {
    if let Some(reason) = kill_switch_reason(class, m) {
        return (0.0, confidence(class, m), Some(reason));
    }

    let fields = weighted_fields(class, m);
    let mut weight_sum = 0.0;
    let mut numerator = 0.0;
    for f in &fields {
        if let Some(v) = f.value {
            numerator += f.weight * normalize(f.band, v);
            weight_sum += f.weight;
        }
    }
    let instant = if weight_sum > 0.0 {
        (100.0 * numerator / weight_sum).clamp(0.0, 100.0)
    } else {
        0.0
    };
    (instant, confidence(class, m), None)
}

fn confidence(class: MemberClass, m: &Metrics) -> f64 {
    let fields = weighted_fields(class, m);
    if fields.is_empty() {
        return 0.0;
    }
    let present = fields.iter().filter(|f| f.value.is_some()).count();
    present as f64 / fields.len() as f64
}

/// `ewma(t) = alpha * instant(t) + (1 - alpha) * ewma(t - 1)`.
pub fn ewma_update(prev: Option<f64>, instant: f64, alpha: f64) -> f64 {
    match prev {
        Some(p) => alpha * instant + (1.0 - alpha) * p,
        None => instant,
    }
}

/// Mean of the last `W` instant samples (including the current one).
pub fn window_avg(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sign of the least-squares slope of `final` over the window, with a
/// deadband of `0.5` per sample.
pub fn trend_of(samples: &[f64]) -> Trend {
    let n = samples.len();
    if n < 2 {
        return Trend::Stable;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = samples.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var = 0.0;
    for i in 0..n {
        cov += (xs[i] - x_mean) * (samples[i] - y_mean);
        var += (xs[i] - x_mean).powi(2);
    }
    let slope = if var > 0.0 { cov / var } else { 0.0 };
    if slope.abs() < 0.5 {
        Trend::Stable
    } else if slope > 0.0 {
        Trend::Rising
    } else {
        Trend::Falling
    }
}

/// `final = 0.30*instant + 0.50*ewma + 0.20*window_avg`, clamped. If a
/// kill switch is active, `final` is forced to `0` per the invariant in
/// [`Score::invariant_holds`].
pub fn blend(instant: f64, ewma: f64, window_avg: f64, kill_switch: bool) -> f64 {
    if kill_switch {
        return 0.0;
    }
    (0.30 * instant + 0.50 * ewma + 0.20 * window_avg).clamp(0.0, 100.0)
}

/// Per-class weight tables, exposed for diagnostics (`config`/`info` RPCs).
pub fn class_weights(class: MemberClass) -> HashMap<&'static str, f64> {
    let dummy = Metrics::unreachable(chrono::Utc::now());
    weighted_fields(class, &dummy)
        .into_iter()
        .enumerate()
        .map(|(i, f)| (FIELD_NAMES[class][i], f.weight))
        .collect()
}

// Field name tables parallel to `weighted_fields`, used only for
// diagnostics output.
struct ClassFieldNames;
impl std::ops::Index<MemberClass> for ClassFieldNames {
    type Output = [&'static str];
    fn index(&self, class: MemberClass) -> &[&'static str] {
        match class {
            MemberClass::Starlink => &[
                "loss_pct",
                "snr_db",
                "obstruction_fraction",
                "latency_ms",
                "jitter_ms",
                "pop_drop_rate",
                "seconds_to_next_sat",
            ],
            MemberClass::Cellular => {
                &["loss_pct", "sinr_db", "rsrp_dbm", "latency_ms", "jitter_ms"]
            }
            MemberClass::WiFi => &[
                "loss_pct",
                "snr_db",
                "latency_ms",
                "jitter_ms",
                "bitrate_mbps",
            ],
            MemberClass::Vpn => &[
                "loss_pct",
                "handshake_age_s",
                "tunnel_up",
                "latency_ms",
                "jitter_ms",
            ],
            MemberClass::Lan | MemberClass::Generic => &["loss_pct", "latency_ms", "jitter_ms"],
        }
    }
}
const FIELD_NAMES: ClassFieldNames = ClassFieldNames;
