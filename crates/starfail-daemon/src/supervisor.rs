//! Supervisor (C8): owns the main tick, sequencing Discovery -> Collect ->
//! Decide -> Apply; handles config reload, shutdown, cancellation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use starfail_core::collector::{self, IcmpProber, ProbeConfig, Prober, SimulatedProber};
use starfail_core::config::Config;
use starfail_core::event::{Event, EventType};
use starfail_core::member::Member;

use crate::state::{AppState, Command};

const COLLECT_DEADLINE_FRACTION: f64 = 0.6;

pub struct Supervisor {
    state: AppState,
    simulate: bool,
    command_rx: mpsc::Receiver<Command>,
    shutdown_rx: watch::Receiver<bool>,
    last_discovery: Option<tokio::time::Instant>,
    last_decision: Option<tokio::time::Instant>,
}

impl Supervisor {
    pub fn new(
        state: AppState,
        simulate: bool,
        command_rx: mpsc::Receiver<Command>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state,
            simulate,
            command_rx,
            shutdown_rx,
            last_discovery: None,
            last_decision: None,
        }
    }

    /// Drives a single Discovery -> Collect -> Decide -> Apply pass outside
    /// the ticker loop. Integration tests use this to advance the
    /// supervisor deterministically instead of racing a real interval.
    pub async fn step(&mut self) {
        self.tick().await;
    }

    pub async fn run(mut self) {
        self.reconcile_initial().await;
        self.state.mark_ready();

        let tick_ms = {
            let cfg = self.state.config();
            cfg.poll_interval_ms.min(cfg.decision_interval_ms)
        };
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms.max(100)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        tracing::info!("supervisor shutting down");
                        break;
                    }
                }
            }
        }

        self.drain_grace().await;
    }

    async fn reconcile_initial(&self) {
        let target = self.state.engine().lock().await.active_member().map(str::to_string);
        self.state
            .controller()
            .reconcile(target.as_deref(), |b| {
                self.state.telemetry().push_event(b);
            })
            .await;
    }

    async fn drain_grace(&self) {
        let grace = self.state.config().shutdown_grace_ms;
        tokio::time::sleep(Duration::from_millis(grace)).await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Failover { member, reason, reply } => {
                let exists = self
                    .state
                    .discovery()
                    .lock()
                    .await
                    .member(&member)
                    .is_some();
                if !exists {
                    let _ = reply.send(Err(format!("unknown member `{member}`")));
                    return;
                }
                self.state.engine().lock().await.set_override(member.clone());
                self.state.telemetry().push_event(
                    Event::new(EventType::RpcCall)
                        .member(member.clone())
                        .reason(reason.unwrap_or_else(|| "manual".to_string())),
                );
                let _ = reply.send(Ok(()));
            }
            Command::Restore { reply } => {
                self.state.engine().lock().await.clear_override();
                self.state
                    .telemetry()
                    .push_event(Event::new(EventType::Restore));
                let _ = reply.send(Ok(()));
            }
            Command::Recheck { reply } => {
                self.tick().await;
                let _ = reply.send(());
            }
            Command::SetLog { level, reply } => {
                let result = self.state.set_log_level(&level);
                let _ = reply.send(result);
            }
        }
    }

    async fn tick(&mut self) {
        let cfg = self.state.config();
        if !cfg.enable {
            return;
        }
        self.state.mark_tick();

        let now = tokio::time::Instant::now();
        let due_discovery = self
            .last_discovery
            .map(|t| now.duration_since(t) >= Duration::from_millis(cfg.discovery_interval_ms))
            .unwrap_or(true);
        if due_discovery {
            self.last_discovery = Some(now);
            let events = self.state.discovery().lock().await.refresh(&cfg.members).await;
            for e in events {
                self.record_event(e);
            }
        }

        let members: Vec<Member> = self
            .state
            .discovery()
            .lock()
            .await
            .members()
            .cloned()
            .collect();

        if members.is_empty() {
            self.state.telemetry().push_event(
                Event::new(EventType::Warning).reason("no members discovered"),
            );
            return;
        }

        let prober: Arc<dyn Prober> = if self.simulate {
            Arc::new(SimulatedProber)
        } else {
            Arc::new(IcmpProber)
        };
        let deadline = Duration::from_millis((cfg.poll_interval_ms as f64 * COLLECT_DEADLINE_FRACTION) as u64);

        let mut collect_tasks = Vec::with_capacity(members.len());
        for member in members.clone() {
            let prober = prober.clone();
            let target: IpAddr = probe_target(&member);
            let simulate = self.simulate;
            collect_tasks.push(tokio::spawn(async move {
                let result = tokio::time::timeout(
                    deadline,
                    collector::collect(prober.as_ref(), &member, target, ProbeConfig::default(), simulate),
                )
                .await;
                (member.name, result)
            }));
        }

        let mut scores = HashMap::new();
        for task in collect_tasks {
            let Ok((name, result)) = task.await else { continue };
            let metrics = match result {
                Ok(Ok(m)) => m,
                Ok(Err(e)) => {
                    self.state.telemetry().push_event(
                        Event::new(EventType::Warning).member(name.clone()).reason(e.to_string()),
                    );
                    continue;
                }
                Err(_) => {
                    self.state.telemetry().push_event(
                        Event::new(EventType::Warning).member(name.clone()).reason("collect deadline exceeded"),
                    );
                    continue;
                }
            };
            self.state.telemetry().push_metrics(&name, metrics.clone());

            let Some(member) = members.iter().find(|m| m.name == name) else { continue };
            let score = self.state.engine().lock().await.update_score_for(member, &metrics);
            self.state.telemetry().push_score(&name, score.clone());
            if score.kill_switch_reason.is_some() {
                self.state.telemetry().push_event(
                    Event::new(EventType::KillSwitch)
                        .member(name.clone())
                        .reason(score.kill_switch_reason.clone().unwrap_or_default()),
                );
            }
            scores.insert(name, score);
        }

        let due_decision = self
            .last_decision
            .map(|t| now.duration_since(t) >= Duration::from_millis(cfg.decision_interval_ms))
            .unwrap_or(true);
        if !due_decision {
            return;
        }
        self.last_decision = Some(now);

        let mut pending_events = Vec::new();
        let decision = {
            let mut engine = self.state.engine().lock().await;
            engine.evaluate(&members, &scores, &cfg, |e| pending_events.push(e))
        };
        for event in pending_events {
            self.record_event(event);
        }

        if let Some(decision) = decision {
            let telemetry = self.state.telemetry();
            let apply_result = self
                .state
                .controller()
                .apply(&decision, |b| {
                    telemetry.push_event(b);
                })
                .await;
            if let Err(e) = apply_result {
                let mut engine = self.state.engine().lock().await;
                engine.record_controller_failure(&decision.to_member);
                tracing::warn!(member = %decision.to_member, error = %e, "controller apply failed");
            } else {
                let mut engine = self.state.engine().lock().await;
                engine.clear_controller_failures(&decision.to_member);
            }
        }
    }

    fn record_event(&self, event: starfail_core::event::Event) {
        // Events from Discovery already carry a sequence of 0; re-push
        // through the store so they receive the store's monotonic seq.
        let mut builder = starfail_core::event::Event::new(event.event_type);
        if let Some(m) = event.member {
            builder = builder.member(m);
        }
        if let Some(f) = event.from {
            builder = builder.from(f);
        }
        if let Some(t) = event.to {
            builder = builder.to(t);
        }
        if let Some(r) = event.reason {
            builder = builder.reason(r);
        }
        if let Some(p) = event.payload {
            builder = builder.payload(p);
        }
        self.state.telemetry().push_event(builder);
    }
}

fn probe_target(member: &Member) -> IpAddr {
    member
        .class_params
        .get("probe_ip")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| IpAddr::from([1, 1, 1, 1]))
}
