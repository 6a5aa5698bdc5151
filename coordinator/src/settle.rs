use crate::{
    authority::RoundAuthority,
    history::RoundHistoryCache,
    lane::{Lane, Lanes},
    metrics::Metrics,
    notify::{Action, Notification, Notifier},
    sync::Synchronizer,
    wallet::Wallet,
};
use roundplay_types::{api::RoundOutcome, BetOutcome, PeriodNumber, RoundDuration, RoundStatus};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    #[error("failed to fetch outcome: {0}")]
    Outcome(String),
}

/// What happened when a round clock expired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Settled {
        period: PeriodNumber,
        outcome: RoundOutcome,
        /// The user's bet on the round, if the ledger reported one.
        bet: Option<BetOutcome>,
    },
    /// Settlement for the round already began elsewhere.
    Duplicate,
    /// There was no confirmed round to settle.
    Skipped,
    Failed {
        period: PeriodNumber,
        error: SettlementError,
    },
}

impl Settlement {
    fn as_str(&self) -> &'static str {
        match self {
            Settlement::Settled { .. } => "settled",
            Settlement::Duplicate => "duplicate",
            Settlement::Skipped => "skipped",
            Settlement::Failed { .. } => "failed",
        }
    }
}

/// Resolves rounds when their clock expires, then seeds the next one.
#[derive(Clone)]
pub struct SettlementResolver<A: RoundAuthority> {
    authority: A,
    lanes: Lanes,
    synchronizer: Synchronizer<A>,
    history: RoundHistoryCache,
    wallet: Wallet,
    user: String,
    currency: String,
    notifier: Notifier,
    metrics: Metrics,
}

impl<A: RoundAuthority> SettlementResolver<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        authority: A,
        lanes: Lanes,
        synchronizer: Synchronizer<A>,
        history: RoundHistoryCache,
        wallet: Wallet,
        user: String,
        currency: String,
        notifier: Notifier,
        metrics: Metrics,
    ) -> Self {
        Self {
            authority,
            lanes,
            synchronizer,
            history,
            wallet,
            user,
            currency,
            notifier,
            metrics,
        }
    }

    pub async fn on_expired(&self, duration: RoundDuration) -> Settlement {
        let start = Instant::now();
        let settlement = self.settle(duration).await;
        self.metrics.settlement(duration, settlement.as_str());
        if matches!(settlement, Settlement::Settled { .. }) {
            self.metrics
                .settle_latency
                .observe(start.elapsed().as_secs_f64());
        }

        // Seed the next round unless another pass already owns this one
        if settlement != Settlement::Duplicate {
            if let Err(err) = self.synchronizer.resync(duration).await {
                warn!(%duration, %err, "resync after settlement skipped");
            }
        }
        settlement
    }

    async fn settle(&self, duration: RoundDuration) -> Settlement {
        let lane = self.lanes.get(duration);

        // Claim the round; this is what makes settlement happen once
        let period = {
            let mut round = lane.round_mut();
            let Some(current) = round
                .as_mut()
                .filter(|r| r.status() != RoundStatus::Pending)
            else {
                debug!(%duration, "no confirmed round to settle");
                return Settlement::Skipped;
            };
            if let Err(err) = current.begin_settlement() {
                warn!(%duration, %err, "duplicate settlement attempt ignored");
                return Settlement::Duplicate;
            }
            current.period
        };
        info!(%duration, %period, "settling round");

        let outcome = match self.authority.latest_result(duration, period).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.notifier.failure(duration, Action::FetchResults, &err);
                return Settlement::Failed {
                    period,
                    error: SettlementError::Outcome(err.to_string()),
                };
            }
        };
        if outcome.period_number != period {
            warn!(
                %duration,
                %period,
                reported = %outcome.period_number,
                "outcome reported for a different round"
            );
        }
        self.history.append(duration, outcome.clone());

        {
            let mut round = lane.round_mut();
            if let Some(current) = round.as_mut().filter(|r| r.period == period) {
                if let Err(err) = current.finish_settlement() {
                    warn!(%duration, %err, "failed to finish settlement");
                }
            }
        }

        let bet = self.resolve_bet(lane, period).await;
        lane.clear_pending(period);
        info!(
            %duration,
            %period,
            number = outcome.result_number,
            ?bet,
            "round settled"
        );
        Settlement::Settled {
            period,
            outcome,
            bet,
        }
    }

    /// Applies the ledger's verdict on the user's bet for `period`.
    async fn resolve_bet(&self, lane: &Lane, period: PeriodNumber) -> Option<BetOutcome> {
        let duration = lane.duration();
        let record = match self.authority.bet_history(&self.user).await {
            Ok(record) => record?,
            Err(err) => {
                self.notifier
                    .failure(duration, Action::FetchBetHistory, &err);
                return None;
            }
        };
        if record.period_number != period {
            return None;
        }

        // Without a duration on the record, only trust it for a bet we placed
        let ours = match record.duration {
            Some(recorded) => recorded == duration,
            None => lane.pending().is_some_and(|bet| bet.period == period),
        };
        if !ours {
            return None;
        }

        match record.status {
            BetOutcome::Won => {
                let balance = self.wallet.credit(&self.currency, record.amount_received);
                info!(%duration, %period, payout = record.amount_received, balance, "bet won");
                self.notifier.publish(Notification::Won {
                    duration,
                    period,
                    payout: record.amount_received,
                });
            }
            BetOutcome::Lost => {
                info!(%duration, %period, stake = record.amount, "bet lost");
                self.notifier.publish(Notification::Lost {
                    duration,
                    period,
                    stake: record.amount,
                });
            }
            BetOutcome::Pending => {
                debug!(%duration, %period, "ledger has not settled the bet yet");
            }
        }
        Some(record.status)
    }
}
