use crate::{authority::RoundAuthority, lane::Lanes, submit::Rejection};
use roundplay_types::{PeriodNumber, RoundDuration};

/// Decides whether a duration currently accepts bets.
#[derive(Clone)]
pub struct BetGate<A: RoundAuthority> {
    authority: A,
    lanes: Lanes,
    grace_window: u64,
}

impl<A: RoundAuthority> BetGate<A> {
    pub fn new(authority: A, lanes: Lanes, grace_window: u64) -> Self {
        Self {
            authority,
            lanes,
            grace_window,
        }
    }

    pub fn grace_window(&self) -> u64 {
        self.grace_window
    }

    pub fn can_bet(&self, duration: RoundDuration) -> bool {
        self.check(duration).is_ok()
    }

    /// Returns the period currently open for betting.
    ///
    /// Betting closes `grace_window` seconds before the round ends. A round
    /// seeded from the fallback is still open: its period is a local guess
    /// that the ledger validates on placement. A bet already pending locally
    /// for the round blocks another.
    pub fn check(&self, duration: RoundDuration) -> Result<PeriodNumber, Rejection> {
        let lane = self.lanes.get(duration);
        let Some(round) = lane.round().filter(|round| !round.is_closed()) else {
            return Err(Rejection::RoundClosed);
        };
        if lane.remaining() < self.grace_window {
            return Err(Rejection::RoundClosed);
        }
        if lane
            .pending()
            .is_some_and(|bet| bet.period == round.period)
        {
            return Err(Rejection::AlreadyPending);
        }
        Ok(round.period)
    }

    /// Asks the ledger whether the user already has a bet pending for
    /// `duration`. Local state is not trusted for this.
    pub async fn has_pending(&self, user: &str, duration: RoundDuration) -> Result<bool, A::Error> {
        Ok(self.authority.check_valid_bet(user, duration).await? > 0)
    }
}
