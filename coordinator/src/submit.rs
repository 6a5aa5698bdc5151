use crate::{
    authority::{AuthorityError, RoundAuthority},
    gate::BetGate,
    lane::Lanes,
    metrics::Metrics,
    notify::{Action, Notifier},
    wallet::Wallet,
};
use roundplay_types::{
    api::PlaceBetRequest, Bet, PeriodNumber, RoundDuration, RoundStatus, Selection,
};
use thiserror::Error;
use tracing::{info, warn};

/// Why a bet was not placed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("a bet is already pending for this round")]
    AlreadyPending,
    #[error("betting is closed for this round")]
    RoundClosed,
    #[error("stake {stake} is outside {min}..={max}")]
    StakeOutOfRange { min: u64, max: u64, stake: u64 },
    #[error("ledger unreachable: {0}")]
    LedgerUnreachable(String),
    #[error("bet refused: {0}")]
    Refused(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StakeLimits {
    pub min: u64,
    pub max: u64,
}

impl StakeLimits {
    pub fn check(&self, stake: u64) -> Result<(), Rejection> {
        if stake < self.min || stake > self.max {
            return Err(Rejection::StakeOutOfRange {
                min: self.min,
                max: self.max,
                stake,
            });
        }
        Ok(())
    }
}

/// Validates and submits wagers.
///
/// The wallet is debited only after the ledger acknowledges the bet.
#[derive(Clone)]
pub struct BetSubmitter<A: RoundAuthority> {
    authority: A,
    gate: BetGate<A>,
    lanes: Lanes,
    wallet: Wallet,
    currency: String,
    limits: StakeLimits,
    notifier: Notifier,
    metrics: Metrics,
}

impl<A: RoundAuthority> BetSubmitter<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        authority: A,
        gate: BetGate<A>,
        lanes: Lanes,
        wallet: Wallet,
        currency: String,
        limits: StakeLimits,
        notifier: Notifier,
        metrics: Metrics,
    ) -> Self {
        Self {
            authority,
            gate,
            lanes,
            wallet,
            currency,
            limits,
            notifier,
            metrics,
        }
    }

    pub fn limits(&self) -> StakeLimits {
        self.limits
    }

    /// Places a bet on `period`, which must be the round currently open for
    /// `duration`.
    pub async fn submit(
        &self,
        user: &str,
        duration: RoundDuration,
        period: PeriodNumber,
        selection: Selection,
        stake: u64,
    ) -> Result<Bet, Rejection> {
        let result = self
            .try_submit(user, duration, Some(period), selection, stake)
            .await;
        self.record(duration, result)
    }

    /// Places a bet on whichever round is currently open for `duration`.
    pub async fn submit_open(
        &self,
        user: &str,
        duration: RoundDuration,
        selection: Selection,
        stake: u64,
    ) -> Result<Bet, Rejection> {
        let result = self
            .try_submit(user, duration, None, selection, stake)
            .await;
        self.record(duration, result)
    }

    fn record(
        &self,
        duration: RoundDuration,
        result: Result<Bet, Rejection>,
    ) -> Result<Bet, Rejection> {
        match &result {
            Ok(_) => self.metrics.bet(duration, "accepted"),
            Err(rejection) => {
                warn!(%duration, %rejection, "bet rejected");
                self.metrics.bet(duration, "rejected");
            }
        }
        result
    }

    async fn try_submit(
        &self,
        user: &str,
        duration: RoundDuration,
        target: Option<PeriodNumber>,
        selection: Selection,
        stake: u64,
    ) -> Result<Bet, Rejection> {
        self.limits.check(stake)?;

        let lane = self.lanes.get(duration);
        let _submission = lane.submission().await;

        // The targeted round must still be the open one
        let period = self.gate.check(duration)?;
        if target.is_some_and(|target| target != period) {
            return Err(Rejection::RoundClosed);
        }
        match self.gate.has_pending(user, duration).await {
            Ok(false) => {}
            Ok(true) => return Err(Rejection::AlreadyPending),
            Err(err) => {
                self.notifier
                    .failure(duration, Action::CheckPendingBet, &err);
                return Err(Rejection::LedgerUnreachable(err.to_string()));
            }
        }

        let request = PlaceBetRequest::new(user.to_string(), duration, period, &selection, stake);
        if let Err(err) = self.authority.place_bet(request).await {
            self.notifier.failure(duration, Action::PlaceBet, &err);
            return Err(if err.is_transient() {
                Rejection::LedgerUnreachable(err.to_string())
            } else {
                Rejection::Refused(err.to_string())
            });
        }

        // The ledger accepted the period, which confirms a fallback round
        if let Some(round) = lane
            .round_mut()
            .as_mut()
            .filter(|round| round.period == period && round.status() == RoundStatus::Pending)
        {
            if let Err(err) = round.activate() {
                warn!(%duration, %err, "failed to activate round");
            }
        }

        let balance = self.wallet.debit(&self.currency, stake);
        let bet = Bet::new(user.to_string(), duration, period, selection, stake);
        lane.set_pending(bet.clone());
        info!(%duration, %period, %selection, stake, balance, "bet accepted");
        Ok(bet)
    }
}
