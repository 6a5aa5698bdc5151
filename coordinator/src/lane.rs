//! Per-duration state shared by the components of a scheduler.

use crate::clock;
use roundplay_types::{Bet, PeriodNumber, Round, RoundDuration};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

/// Everything the coordinator tracks for one duration.
///
/// The clock itself lives in its actor; a lane only holds the mailbox.
pub struct Lane {
    duration: RoundDuration,
    clock: clock::Mailbox,
    round: Mutex<Option<Round>>,
    pending: Mutex<Option<Bet>>,
    syncing: AtomicBool,
    submitting: tokio::sync::Mutex<()>,
}

impl Lane {
    pub fn new(clock: clock::Mailbox) -> Self {
        Self {
            duration: clock.duration(),
            clock,
            round: Mutex::new(None),
            pending: Mutex::new(None),
            syncing: AtomicBool::new(false),
            submitting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn duration(&self) -> RoundDuration {
        self.duration
    }

    pub fn clock(&self) -> &clock::Mailbox {
        &self.clock
    }

    pub fn remaining(&self) -> u64 {
        self.clock.remaining()
    }

    pub fn round(&self) -> Option<Round> {
        self.round_mut().clone()
    }

    /// Locks the current round for inspection or a transition.
    pub fn round_mut(&self) -> MutexGuard<'_, Option<Round>> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self) -> Option<Bet> {
        self.pending_mut().clone()
    }

    pub fn set_pending(&self, bet: Bet) {
        *self.pending_mut() = Some(bet);
    }

    /// Clears the pending marker if it belongs to `period` or an earlier
    /// round, returning the cleared bet.
    pub fn clear_pending(&self, period: PeriodNumber) -> Option<Bet> {
        let mut pending = self.pending_mut();
        if pending.as_ref().is_some_and(|bet| bet.period <= period) {
            return pending.take();
        }
        None
    }

    fn pending_mut(&self) -> MutexGuard<'_, Option<Bet>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the lane's resync slot. Returns [None] if a resync is already in
    /// flight; the slot is released when the guard drops.
    pub fn try_begin_sync(&self) -> Option<SyncGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard { lane: self })
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Serializes bet submissions for this duration.
    pub async fn submission(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.submitting.lock().await
    }
}

pub struct SyncGuard<'a> {
    lane: &'a Lane,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.lane.syncing.store(false, Ordering::Release);
    }
}

/// The four lanes of a scheduler, one per [RoundDuration].
#[derive(Clone)]
pub struct Lanes {
    lanes: Arc<Vec<Lane>>,
}

impl Lanes {
    /// Builds lanes from clock mailboxes. Every duration must be covered
    /// exactly once.
    pub fn new(clocks: impl IntoIterator<Item = clock::Mailbox>) -> Self {
        let mut lanes: Vec<Lane> = clocks.into_iter().map(Lane::new).collect();
        lanes.sort_by_key(Lane::duration);
        debug_assert!(lanes
            .iter()
            .map(Lane::duration)
            .eq(RoundDuration::ALL.iter().copied()));
        Self {
            lanes: Arc::new(lanes),
        }
    }

    pub fn get(&self, duration: RoundDuration) -> &Lane {
        let index = match duration {
            RoundDuration::OneMinute => 0,
            RoundDuration::ThreeMinutes => 1,
            RoundDuration::FiveMinutes => 2,
            RoundDuration::TenMinutes => 3,
        };
        &self.lanes[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Actor;
    use roundplay_types::Selection;
    use tokio::sync::mpsc;

    fn lanes() -> Lanes {
        let (expired, _) = mpsc::channel(1);
        Lanes::new(RoundDuration::ALL.into_iter().rev().map(|duration| {
            let (_, mailbox) = Actor::new(duration, 1, expired.clone());
            mailbox
        }))
    }

    #[test]
    fn test_lanes_indexed_by_duration() {
        let lanes = lanes();
        for duration in RoundDuration::ALL {
            assert_eq!(lanes.get(duration).duration(), duration);
        }
        assert_eq!(lanes.iter().count(), 4);
    }

    #[test]
    fn test_sync_guard_releases_on_drop() {
        let lanes = lanes();
        let lane = lanes.get(RoundDuration::FiveMinutes);
        let guard = lane.try_begin_sync().unwrap();
        assert!(lane.is_syncing());
        assert!(lane.try_begin_sync().is_none());

        // Other lanes are independent
        assert!(lanes.get(RoundDuration::OneMinute).try_begin_sync().is_some());

        drop(guard);
        assert!(!lane.is_syncing());
        assert!(lane.try_begin_sync().is_some());
    }

    #[test]
    fn test_clear_pending_only_up_to_period() {
        let lanes = lanes();
        let lane = lanes.get(RoundDuration::OneMinute);
        let bet = Bet::new(
            "alice".to_string(),
            RoundDuration::OneMinute,
            PeriodNumber(4),
            Selection::Number(3),
            10,
        );
        lane.set_pending(bet.clone());
        assert_eq!(lane.clear_pending(PeriodNumber(3)), None);
        assert_eq!(lane.clear_pending(PeriodNumber(4)), Some(bet));
        assert!(lane.pending().is_none());
    }
}
