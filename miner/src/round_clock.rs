use std::time::Duration;

use primitive_types::U256;
use tokio::time::{sleep_until, Instant};
use tracing::*;

use shared::{
    types::Round,
    utils::{format_duration, SyncedClock},
};

use crate::sink::Sink;

/// Search only runs while more than this much of the round is left.
pub const RUN_WINDOW: i64 = 60;
/// The deadline-approach timer fires this long after the run window closes.
pub const DEADLINE_SLACK: i64 = 15;
/// Delay after the deadline before asking for the next round.
pub const NEXT_ROUND_DELAY: i64 = 30;

// stands in for deadlines too far out to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockEvent {
    Run(Round),
    Stop(U256),
    LoadNextRound(U256),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    DeadlineApproach,
    LoadNextRound,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    kind: TimerKind,
    at: Instant,
}

/// Decides from the round deadline whether searching should run.
///
/// Exactly one timer slot exists, so arming one kind always replaces the
/// other.
pub struct RoundClock {
    clock: SyncedClock,
    sink: Sink<ClockEvent>,
    round: Option<Round>,
    state: ClockState,
    timer: Option<ArmedTimer>,
}

impl RoundClock {
    pub fn new(clock: SyncedClock, sink: Sink<ClockEvent>) -> Self {
        Self {
            clock,
            sink,
            round: None,
            state: ClockState::Stopped,
            timer: None,
        }
    }

    pub fn sync(&mut self, chain_secs: i64) {
        self.clock.sync(chain_secs);
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn armed(&self) -> Option<TimerKind> {
        self.timer.map(|t| t.kind)
    }

    /// The round being searched, if any.
    pub fn running_round(&self) -> Option<&Round> {
        match self.state {
            ClockState::Running => self.round.as_ref(),
            ClockState::Stopped => None,
        }
    }

    pub fn set_round(&mut self, round: Round) {
        self.timer = None;
        self.stop();
        self.round = Some(round);
        self.evaluate();
    }

    /// Replaces the round state. The deadline policy only runs again when the
    /// deadline was just revealed.
    pub fn update_round(&mut self, round: Round) {
        let revealed = match &self.round {
            Some(current) => !current.has_deadline() && round.has_deadline(),
            None => true,
        };
        self.round = Some(round);
        if revealed {
            self.timer = None;
            self.evaluate();
        }
    }

    /// Waits for the armed timer and acts on it. Pending forever when nothing
    /// is armed. Cancel safe.
    pub async fn tick(&mut self) {
        let Some(timer) = self.timer else {
            return std::future::pending().await;
        };
        sleep_until(timer.at).await;
        self.timer = None;
        match timer.kind {
            TimerKind::DeadlineApproach => self.evaluate(),
            TimerKind::LoadNextRound => {
                if let Some(round) = &self.round {
                    let next = round.id + 1;
                    debug!("load round {next}");
                    self.sink.emit(ClockEvent::LoadNextRound(next));
                }
            }
        }
    }

    fn evaluate(&mut self) {
        let Some(round) = &self.round else {
            return;
        };
        if !round.has_deadline() {
            self.timer = None;
            self.run();
            return;
        }

        let deadline = i64::try_from(round.deadline).unwrap_or(i64::MAX);
        let remaining = deadline.saturating_sub(self.clock.now());
        if remaining > RUN_WINDOW {
            self.run();
            self.arm(TimerKind::DeadlineApproach, remaining - RUN_WINDOW + DEADLINE_SLACK);
        } else {
            self.stop();
            let wait = remaining.max(0) + NEXT_ROUND_DELAY;
            info!("round closing, next round in about {}", format_duration(wait as u64));
            self.arm(TimerKind::LoadNextRound, wait);
        }
    }

    fn arm(&mut self, kind: TimerKind, secs: i64) {
        trace!("{kind:?} timer in {secs}s");
        let now = Instant::now();
        let at = now
            .checked_add(Duration::from_secs(secs.max(0) as u64))
            .unwrap_or(now + FAR_FUTURE);
        self.timer = Some(ArmedTimer { kind, at });
    }

    fn run(&mut self) {
        if self.state == ClockState::Running {
            return;
        }
        let Some(round) = &self.round else {
            return;
        };
        self.state = ClockState::Running;
        self.sink.emit(ClockEvent::Run(round.clone()));
    }

    fn stop(&mut self) {
        if self.state == ClockState::Stopped {
            return;
        }
        self.state = ClockState::Stopped;
        if let Some(round) = &self.round {
            self.sink.emit(ClockEvent::Stop(round.id));
        }
    }
}
