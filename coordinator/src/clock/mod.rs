//! Per-duration countdowns.
//!
//! Each [RoundClock] is owned by its own [Actor], which ticks it once per
//! second and reports expiry to the scheduler over a channel. Everything else
//! talks to the clock through its [Mailbox]: it can read the published
//! [ClockState] and reseed the countdown, but never write it directly.

mod actor;
mod ingress;

pub use actor::Actor;
pub use ingress::{Mailbox, MailboxError, Message};

use roundplay_types::RoundDuration;
use tokio::time::Instant;

/// Emitted once per seeding, when the countdown reaches zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expired {
    pub duration: RoundDuration,
    pub seeding: u64,
}

/// Snapshot of a clock published after every change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockState {
    pub remaining: u64,
    pub running: bool,
    /// Incremented on every (re)seed.
    pub seeding: u64,
}

/// Countdown for one duration.
#[derive(Debug)]
pub struct RoundClock {
    duration: RoundDuration,
    remaining: u64,
    running: bool,
    fired: bool,
    seeding: u64,
    last_tick_at: Option<Instant>,
}

impl RoundClock {
    pub fn new(duration: RoundDuration) -> Self {
        Self {
            duration,
            remaining: 0,
            running: false,
            fired: false,
            seeding: 0,
            last_tick_at: None,
        }
    }

    /// Seeds the countdown and starts ticking. Replaces any previous seed and
    /// re-arms expiry.
    pub fn start(&mut self, seconds: u64) {
        self.remaining = seconds;
        self.running = true;
        self.fired = false;
        self.seeding += 1;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Advances the countdown by one second.
    ///
    /// Returns [Expired] on the tick that reaches zero (or the first tick of a
    /// zero seed) and never again until the next [RoundClock::start].
    pub fn tick(&mut self, now: Instant) -> Option<Expired> {
        if !self.running {
            return None;
        }
        self.last_tick_at = Some(now);
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 || self.fired {
            return None;
        }
        self.fired = true;
        Some(Expired {
            duration: self.duration,
            seeding: self.seeding,
        })
    }

    pub fn duration(&self) -> RoundDuration {
        self.duration
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn last_tick_at(&self) -> Option<Instant> {
        self.last_tick_at
    }

    pub fn state(&self) -> ClockState {
        ClockState {
            remaining: self.remaining,
            running: self.running,
            seeding: self.seeding,
        }
    }
}
