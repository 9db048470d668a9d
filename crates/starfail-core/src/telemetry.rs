//! RAM-bounded telemetry store: per-member rings of [`Metrics`]/[`Score`]
//! plus a global [`Event`] ring.
//!
//! Mirrors the teacher's `DashMap`-keyed shared-state pattern: one entry
//! per member behind a `std::sync::Mutex`-guarded ring, so readers never
//! block other members' writers. The store is the sole owner of these
//! rings (see the ownership rule in the data model); the Supervisor is
//! the single writer per member.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::event::{Event, EventBuilder};
use crate::metrics::Metrics;
use crate::score::Score;

const DEFAULT_EVENTS_CAP: usize = 4096;

struct MemberRing {
    metrics: VecDeque<Metrics>,
    scores: VecDeque<Score>,
    bytes: usize,
}

impl MemberRing {
    fn new() -> Self {
        Self {
            metrics: VecDeque::new(),
            scores: VecDeque::new(),
            bytes: 0,
        }
    }
}

pub struct TelemetryStore {
    rings: DashMap<String, Mutex<MemberRing>>,
    events: Mutex<VecDeque<Event>>,
    events_cap: usize,
    seq: AtomicU64,
    retention: std::sync::atomic::AtomicU64,
    max_ram_bytes: std::sync::atomic::AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryStats {
    pub member_count: usize,
    pub sample_count: usize,
    pub event_count: usize,
    pub ram_bytes: usize,
}

impl TelemetryStore {
    pub fn new(retention_hours: u64, max_ram_mb: u64) -> Self {
        Self {
            rings: DashMap::new(),
            events: Mutex::new(VecDeque::new()),
            events_cap: DEFAULT_EVENTS_CAP,
            seq: AtomicU64::new(0),
            retention: std::sync::atomic::AtomicU64::new(retention_hours),
            max_ram_bytes: std::sync::atomic::AtomicU64::new(max_ram_mb * 1024 * 1024),
        }
    }

    pub fn set_caps(&self, retention_hours: u64, max_ram_mb: u64) {
        self.retention.store(retention_hours, Ordering::Relaxed);
        self.max_ram_bytes
            .store(max_ram_mb * 1024 * 1024, Ordering::Relaxed);
    }

    /// For each member, the RAM cap is divided evenly across the known
    /// member count so that one noisy member cannot starve the rest.
    fn per_member_cap_bytes(&self) -> usize {
        let members = self.rings.len().max(1);
        (self.max_ram_bytes.load(Ordering::Relaxed) as usize / members).max(4096)
    }

    pub fn push_metrics(&self, member: &str, m: Metrics) {
        let entry = self
            .rings
            .entry(member.to_string())
            .or_insert_with(|| Mutex::new(MemberRing::new()));
        let mut ring = entry.lock().unwrap();
        let cap_bytes = self.per_member_cap_bytes();
        let retention = chrono::Duration::hours(self.retention.load(Ordering::Relaxed) as i64);

        // Timestamps are clamped to non-decreasing order.
        let ts = match ring.metrics.back() {
            Some(last) if m.timestamp < last.timestamp => last.timestamp + chrono::Duration::microseconds(1),
            _ => m.timestamp,
        };
        let mut m = m;
        m.timestamp = ts;
        ring.bytes += m.approx_bytes();
        ring.metrics.push_back(m);

        let now = ts;
        while let Some(front) = ring.metrics.front() {
            let too_old = now - front.timestamp > retention;
            let over_cap = ring.bytes > cap_bytes;
            if too_old || over_cap {
                let evicted = ring.metrics.pop_front().unwrap();
                ring.bytes = ring.bytes.saturating_sub(evicted.approx_bytes());
            } else {
                break;
            }
        }
    }

    pub fn push_score(&self, member: &str, s: Score) {
        let entry = self
            .rings
            .entry(member.to_string())
            .or_insert_with(|| Mutex::new(MemberRing::new()));
        let mut ring = entry.lock().unwrap();
        ring.scores.push_back(s);
        // Scores track the metrics ring length 1:1; trim to match.
        while ring.scores.len() > ring.metrics.len().max(1) {
            ring.scores.pop_front();
        }
    }

    pub fn push_event(&self, builder: EventBuilder) -> Event {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = builder.build(seq);
        let mut events = self.events.lock().unwrap();
        events.push_back(event.clone());
        while events.len() > self.events_cap {
            events.pop_front();
        }
        event
    }

    pub fn get_metrics(&self, member: &str, n: Option<usize>) -> Vec<Metrics> {
        match self.rings.get(member) {
            Some(entry) => {
                let ring = entry.lock().unwrap();
                tail(&ring.metrics, n)
            }
            None => Vec::new(),
        }
    }

    pub fn get_scores(&self, member: &str, n: Option<usize>) -> Vec<Score> {
        match self.rings.get(member) {
            Some(entry) => {
                let ring = entry.lock().unwrap();
                tail(&ring.scores, n)
            }
            None => Vec::new(),
        }
    }

    pub fn latest_score(&self, member: &str) -> Option<Score> {
        self.rings
            .get(member)
            .and_then(|e| e.lock().unwrap().scores.back().cloned())
    }

    pub fn get_events(&self, event_type: Option<crate::event::EventType>, n: Option<usize>) -> Vec<Event> {
        let events = self.events.lock().unwrap();
        let filtered: Vec<Event> = events
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect();
        match n {
            Some(n) => filtered.into_iter().take(n).collect(),
            None => filtered,
        }
    }

    pub fn forget_member(&self, member: &str) {
        self.rings.remove(member);
    }

    pub fn stats(&self) -> TelemetryStats {
        let mut sample_count = 0;
        let mut ram_bytes = 0;
        for entry in self.rings.iter() {
            let ring = entry.value().lock().unwrap();
            sample_count += ring.metrics.len();
            ram_bytes += ring.bytes;
        }
        TelemetryStats {
            member_count: self.rings.len(),
            sample_count,
            event_count: self.events.lock().unwrap().len(),
            ram_bytes,
        }
    }
}

fn tail<T: Clone>(deque: &VecDeque<T>, n: Option<usize>) -> Vec<T> {
    match n {
        Some(n) if n < deque.len() => deque.iter().skip(deque.len() - n).cloned().collect(),
        _ => deque.iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn sample(ts: chrono::DateTime<chrono::Utc>) -> Metrics {
        Metrics {
            latency_ms: Some(30.0),
            loss_pct: Some(0.0),
            ..Metrics::unreachable(ts)
        }
    }

    #[test]
    fn push_then_get_returns_last_pushed() {
        let store = TelemetryStore::new(24, 16);
        let now = chrono::Utc::now();
        store.push_metrics("wan0", sample(now));
        let got = store.get_metrics("wan0", Some(1));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, now);
    }

    #[test]
    fn timestamps_are_clamped_non_decreasing() {
        let store = TelemetryStore::new(24, 16);
        let t0 = chrono::Utc::now();
        store.push_metrics("wan0", sample(t0));
        store.push_metrics("wan0", sample(t0 - chrono::Duration::seconds(5)));
        let got = store.get_metrics("wan0", None);
        assert!(got[1].timestamp >= got[0].timestamp);
    }

    #[test]
    fn events_are_capped_and_newest_first() {
        let store = TelemetryStore::new(24, 16);
        for _ in 0..3 {
            store.push_event(Event::new(EventType::Score).member("wan0"));
        }
        let events = store.get_events(None, None);
        assert_eq!(events.len(), 3);
        assert!(events[0].seq > events[1].seq);
    }

    #[test]
    fn ram_cap_evicts_oldest_first() {
        let store = TelemetryStore::new(24, 0); // effectively tiny cap, clamped to 4096 bytes floor
        for i in 0..2000 {
            store.push_metrics("wan0", sample(chrono::Utc::now() + chrono::Duration::milliseconds(i)));
        }
        let stats = store.stats();
        assert!(stats.ram_bytes <= 4096 + std::mem::size_of::<Metrics>());
    }
}
