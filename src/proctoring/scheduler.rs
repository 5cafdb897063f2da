//! Rotation of the monitored sample.
//!
//! Three trigger paths (the fixed-cadence timer, session churn and admin
//! refreshes) funnel into one serialized `recompute`. A trigger that arrives
//! while a run is in flight waits; once the run finishes, every waiting
//! trigger is satisfied by a single follow-up run.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::messages::{MonitoringStatus, PoolSummary, ServerEvent};
use super::sampler::{Sampler, SamplingPolicy};
use super::state::ProctoringState;
use crate::config::ProctoringConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    Timer,
    Join,
    Leave,
    Refresh,
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationTrigger::Timer => "timer",
            RotationTrigger::Join => "join",
            RotationTrigger::Leave => "leave",
            RotationTrigger::Refresh => "refresh",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    Rotated(PoolSummary),
    /// Another run already covered this trigger
    Coalesced,
    /// No active sessions; nothing sampled or published
    Skipped,
}

struct RotationGate {
    sampler: Sampler,
    /// Highest trigger ticket covered by a finished run
    completed: u64,
}

pub struct RotationScheduler {
    state: Arc<RwLock<ProctoringState>>,
    gate: Mutex<RotationGate>,
    requested: AtomicU64,
    rotations: AtomicU64,
    frame_rate: u32,
    interval: Duration,
    /// Wall-clock anchor of the timer cadence, in epoch milliseconds. Reset
    /// when the timer is armed.
    epoch_ms: AtomicI64,
}

impl RotationScheduler {
    pub fn new(state: Arc<RwLock<ProctoringState>>, config: &ProctoringConfig) -> Self {
        let sampler = Sampler::new(SamplingPolicy::from(config));
        Self::with_sampler(state, config, sampler)
    }

    pub fn with_sampler(
        state: Arc<RwLock<ProctoringState>>,
        config: &ProctoringConfig,
        sampler: Sampler,
    ) -> Self {
        Self {
            state,
            gate: Mutex::new(RotationGate {
                sampler,
                completed: 0,
            }),
            requested: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            frame_rate: config.frame_rate,
            interval: config.rotation_interval,
            epoch_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Arms the rotation timer. The first tick fires one interval from now;
    /// the task runs until aborted at shutdown.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let first_tick = Instant::now() + self.interval;
        self.epoch_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);

        tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = self.interval.as_secs(),
                "Monitoring rotation timer armed"
            );

            loop {
                ticker.tick().await;

                // Run each tick in its own task so a panic inside the sampler
                // costs one rotation, not the timer.
                let scheduler = self.clone();
                match tokio::spawn(async move { scheduler.on_tick().await }).await {
                    Ok(RotationOutcome::Rotated(summary)) => {
                        tracing::debug!(
                            monitored_count = summary.monitored_count,
                            "Timer rotation complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Rotation failed, retrying on next tick");
                    }
                }
            }
        })
    }

    /// Timer path: a no-op while nobody is taking an exam.
    pub async fn on_tick(&self) -> RotationOutcome {
        if self.state.read().await.sessions.is_empty() {
            tracing::debug!("Rotation tick with no active sessions, skipping");
            return RotationOutcome::Skipped;
        }
        self.trigger(RotationTrigger::Timer).await
    }

    pub async fn trigger(&self, trigger: RotationTrigger) -> RotationOutcome {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let mut gate = self.gate.lock().await;

        if gate.completed >= ticket {
            tracing::debug!(trigger = %trigger, "Rotation coalesced into previous run");
            return RotationOutcome::Coalesced;
        }

        // Every trigger ticketed so far made its registry change before
        // taking a ticket, so this run covers all of them.
        let covered = self.requested.load(Ordering::SeqCst);
        let outcome = {
            let mut state = self.state.write().await;
            self.recompute(&mut state, &mut gate.sampler, trigger)
        };
        gate.completed = covered;
        outcome
    }

    fn recompute(
        &self,
        state: &mut ProctoringState,
        sampler: &mut Sampler,
        trigger: RotationTrigger,
    ) -> RotationOutcome {
        if state.sessions.is_empty() {
            state.monitored.clear();
            tracing::debug!(trigger = %trigger, "No active sessions to sample");
            return RotationOutcome::Skipped;
        }

        let mut candidates = state.sessions.ids();
        candidates.sort();
        let selected = sampler.select(&candidates);

        for session in state.sessions.iter_mut() {
            session.is_monitored = selected.contains(&session.id);
        }
        state.monitored.replace(selected);

        let summary = PoolSummary {
            total_sessions: state.sessions.len(),
            monitored_count: state.monitored.len(),
            monitored_ids: state.monitored.sorted_ids(),
            sample_rate: sampler.policy().sample_rate,
            next_rotation_at: self.next_rotation_at(),
        };
        self.publish(state, &summary);
        self.rotations.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            trigger = %trigger,
            total_sessions = summary.total_sessions,
            monitored_count = summary.monitored_count,
            "Monitoring pool updated"
        );

        RotationOutcome::Rotated(summary)
    }

    fn publish(&self, state: &ProctoringState, summary: &PoolSummary) {
        for session in state.sessions.iter() {
            let status = ServerEvent::MonitoringStatus(MonitoringStatus {
                is_monitored: session.is_monitored,
                frame_rate: self.frame_rate,
            });
            if let Err(e) = session.connection.send(status) {
                tracing::debug!(
                    session_id = %session.id,
                    error = %e,
                    "Could not deliver monitoring status"
                );
            }
        }

        state
            .observers
            .broadcast(&ServerEvent::PoolUpdated(summary.clone()));
    }

    /// Next fixed-cadence timer fire, independent of churn-triggered runs.
    pub fn next_rotation_at(&self) -> DateTime<Utc> {
        let interval_ms = (self.interval.as_millis() as i64).max(1);
        let epoch_ms = self.epoch_ms.load(Ordering::SeqCst);
        let elapsed_ms = (Utc::now().timestamp_millis() - epoch_ms).max(0);
        let ticks = elapsed_ms / interval_ms + 1;
        let next_ms = epoch_ms + ticks * interval_ms;
        Utc.timestamp_millis_opt(next_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Completed rotations that produced a new sample.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}
