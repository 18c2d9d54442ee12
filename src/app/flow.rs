//! Flow jobs and the per-account flow registry.
//!
//! Every recurring piece of work an account performs is a [`Job`]. A job
//! belongs to exactly one [`FlowKind`], and the registry keeps one slot per
//! kind holding its state and at most one pending timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::FlowFlags;

/// Flow a job belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Authenticate,
    Mining,
    DailyReward,
    Spin,
    Upgrade,
    Activities,
}

impl FlowKind {
    pub const ALL: [FlowKind; 6] = [
        Self::Authenticate,
        Self::Mining,
        Self::DailyReward,
        Self::Spin,
        Self::Upgrade,
        Self::Activities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Mining => "mining",
            Self::DailyReward => "daily_reward",
            Self::Spin => "spin",
            Self::Upgrade => "upgrade",
            Self::Activities => "activities",
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work for one account
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Exchange init data for a token, then start the flagged flows
    Authenticate { flags: FlowFlags },
    ClaimMining { attempt: u32 },
    /// `retry_on_zero` re-arms the claim at the next streak when no spins are left
    ClaimDailyReward { retry_on_zero: bool, attempt: u32 },
    /// `index` counts the spins of this batch already performed
    Spin {
        remaining: u32,
        index: u32,
        next_streak_at: DateTime<Utc>,
        attempt: u32,
    },
    Upgrade,
    ReconcileActivities,
}

impl Job {
    #[must_use]
    pub fn claim_mining() -> Self {
        Self::ClaimMining { attempt: 0 }
    }

    #[must_use]
    pub fn daily_reward(retry_on_zero: bool) -> Self {
        Self::ClaimDailyReward {
            retry_on_zero,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::Authenticate { .. } => FlowKind::Authenticate,
            Self::ClaimMining { .. } => FlowKind::Mining,
            Self::ClaimDailyReward { .. } => FlowKind::DailyReward,
            Self::Spin { .. } => FlowKind::Spin,
            Self::Upgrade => FlowKind::Upgrade,
            Self::ReconcileActivities => FlowKind::Activities,
        }
    }

    /// Consecutive connection-reset retries already spent on this job
    #[must_use]
    pub fn attempt(&self) -> u32 {
        match self {
            Self::ClaimMining { attempt }
            | Self::ClaimDailyReward { attempt, .. }
            | Self::Spin { attempt, .. } => *attempt,
            _ => 0,
        }
    }

    /// Same job with the retry counter bumped; `None` for jobs that are never retried
    #[must_use]
    pub fn retried(self) -> Option<Self> {
        match self {
            Self::ClaimMining { attempt } => Some(Self::ClaimMining {
                attempt: attempt + 1,
            }),
            Self::ClaimDailyReward {
                retry_on_zero,
                attempt,
            } => Some(Self::ClaimDailyReward {
                retry_on_zero,
                attempt: attempt + 1,
            }),
            Self::Spin {
                remaining,
                index,
                next_streak_at,
                attempt,
            } => Some(Self::Spin {
                remaining,
                index,
                next_streak_at,
                attempt: attempt + 1,
            }),
            Self::Authenticate { .. } | Self::Upgrade | Self::ReconcileActivities => None,
        }
    }
}

/// A job to run after the current one, immediately or after `delay`
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub job: Job,
    pub delay: Duration,
}

impl FollowUp {
    #[must_use]
    pub fn now(job: Job) -> Self {
        Self {
            job,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn after(job: Job, delay: Duration) -> Self {
        Self { job, delay }
    }

    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.delay.is_zero()
    }
}

/// Lifecycle of a flow slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Idle,
    AwaitingResponse,
    Scheduled { due: Instant },
}

impl FlowState {
    /// Time left until a scheduled flow fires
    #[must_use]
    pub fn time_until_due(&self) -> Option<Duration> {
        match self {
            Self::Scheduled { due } => Some(due.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }
}

/// Job delivered by a fired timer
#[derive(Debug)]
pub struct ScheduledJob {
    pub job: Job,
    pub generation: u64,
}

pub type JobSender = mpsc::UnboundedSender<ScheduledJob>;
pub type JobReceiver = mpsc::UnboundedReceiver<ScheduledJob>;

#[derive(Default)]
struct FlowSlot {
    state: FlowState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    due: Option<Instant>,
}

impl FlowSlot {
    fn supersede(&mut self, generation: u64) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.due = None;
        self.generation = generation;
    }

    fn pending_due(&self) -> Option<Instant> {
        self.timer
            .as_ref()
            .filter(|timer| !timer.is_finished())
            .and(self.due)
    }
}

/// Flow slots of a single account.
///
/// Timers never run jobs themselves: when one fires it sends the job back to
/// the account's dispatcher tagged with the slot generation it was armed
/// with. Re-arming or cancelling a flow bumps the generation, so a job from a
/// superseded timer is recognised and dropped. Running a flow inline leaves
/// its pending timer alone.
pub struct FlowRegistry {
    slots: DashMap<FlowKind, FlowSlot>,
    generations: AtomicU64,
    tx: JobSender,
}

impl FlowRegistry {
    pub fn new(tx: JobSender) -> Self {
        Self {
            slots: DashMap::new(),
            generations: AtomicU64::new(0),
            tx,
        }
    }

    /// Registry together with the receiving end of its timers
    pub fn channel() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Arm `job` to fire after `delay`, replacing any pending timer of its flow
    pub fn arm(&self, job: Job, delay: Duration) -> u64 {
        let kind = job.kind();
        let generation = self.next_generation();
        let tx = self.tx.clone();

        let due = Instant::now() + delay;
        let mut slot = self.slots.entry(kind).or_default();
        slot.supersede(generation);
        slot.state = FlowState::Scheduled { due };
        slot.due = Some(due);
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The dispatcher is gone on shutdown; nothing to deliver to
            let _ = tx.send(ScheduledJob { job, generation });
        }));

        debug!(flow = %kind, delay_ms = delay.as_millis() as u64, generation, "Flow armed");
        generation
    }

    /// Whether a fired timer still belongs to the current arming of its flow
    #[must_use]
    pub fn is_current(&self, kind: FlowKind, generation: u64) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Mark the flow as running
    pub fn begin(&self, kind: FlowKind) {
        self.slots.entry(kind).or_default().state = FlowState::AwaitingResponse;
    }

    /// Return a running flow to its pending timer, or to idle when none is left
    pub fn finish(&self, kind: FlowKind) {
        if let Some(mut slot) = self.slots.get_mut(&kind) {
            if slot.state == FlowState::AwaitingResponse {
                slot.state = match slot.pending_due() {
                    Some(due) => FlowState::Scheduled { due },
                    None => FlowState::Idle,
                };
            }
        }
    }

    /// Drop the pending timer of one flow
    pub fn cancel(&self, kind: FlowKind) {
        let generation = self.next_generation();
        if let Some(mut slot) = self.slots.get_mut(&kind) {
            slot.supersede(generation);
            slot.state = FlowState::Idle;
        }
    }

    /// Drop every pending timer
    pub fn cancel_all(&self) {
        for kind in FlowKind::ALL {
            self.cancel(kind);
        }
    }

    #[must_use]
    pub fn state(&self, kind: FlowKind) -> FlowState {
        self.slots
            .get(&kind)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    /// Number of timers armed and not yet fired or cancelled
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.timer
                    .as_ref()
                    .is_some_and(|timer| !timer.is_finished())
            })
            .count()
    }

    /// State of every flow, in [`FlowKind::ALL`] order
    #[must_use]
    pub fn snapshot(&self) -> Vec<(FlowKind, FlowState)> {
        FlowKind::ALL
            .iter()
            .map(|kind| (*kind, self.state(*kind)))
            .collect()
    }
}

impl Drop for FlowRegistry {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if let Some(timer) = &slot.timer {
                timer.abort();
            }
        }
    }
}
