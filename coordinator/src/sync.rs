//! Keeps each round clock aligned with the round authority.

use crate::{
    authority::RoundAuthority,
    clock::MailboxError,
    history::RoundHistoryCache,
    lane::{Lane, Lanes},
    metrics::Metrics,
    notify::{Action, Notifier},
};
use roundplay_types::{PeriodNumber, Round, RoundDuration};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where a clock's seed came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedSource {
    Authority,
    /// The authority could not be read; the clock runs on a default.
    Fallback,
    /// The authority could not be read, but the clock was already counting
    /// down an open round and was left alone.
    Kept,
}

impl SeedSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SeedSource::Authority => "authority",
            SeedSource::Fallback => "fallback",
            SeedSource::Kept => "kept",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seeded {
    pub seconds: u64,
    pub period: Option<PeriodNumber>,
    pub source: SeedSource,
}

#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("resync already in flight")]
    InFlight,
    #[error("clock unavailable: {0}")]
    Clock(#[from] MailboxError),
}

/// How to seed a lane after a successful timer read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plan {
    pub seconds: u64,
    pub period: PeriodNumber,
}

/// Decides the seed for `duration` from an authoritative timer read.
///
/// `local` is the lane's current round and `last_settled` the newest period in
/// the history cache.
pub fn plan(
    duration: RoundDuration,
    local: Option<&Round>,
    last_settled: Option<PeriodNumber>,
    reported_seconds: u64,
    reported_period: Option<PeriodNumber>,
) -> Plan {
    let mut seconds = reported_seconds.min(duration.seconds());
    let derived = match local {
        Some(round) if round.is_closed() => round.period.next(),
        Some(round) => round.period,
        None => last_settled.map_or(PeriodNumber(1), PeriodNumber::next),
    };
    let mut period = match (reported_period, local) {
        // The authority lags behind a round we already track
        (Some(reported), Some(round)) if reported < round.period => derived,
        (Some(reported), _) => reported,
        (None, _) => derived,
    };

    // A round that is over (or already settled here) means the next one
    let settled = local
        .filter(|round| round.is_closed())
        .map(|round| round.period)
        .max(last_settled);
    if seconds == 0 || settled.is_some_and(|settled| period <= settled) {
        period = settled.map_or(period, |settled| settled.max(period)).next();
        seconds = duration.seconds();
    }
    Plan { seconds, period }
}

/// Reseeds round clocks from the round authority.
///
/// At most one resync per duration is in flight at a time; durations are
/// independent of each other.
#[derive(Clone)]
pub struct Synchronizer<A: RoundAuthority> {
    authority: A,
    lanes: Lanes,
    history: RoundHistoryCache,
    notifier: Notifier,
    metrics: Metrics,
}

impl<A: RoundAuthority> Synchronizer<A> {
    pub fn new(
        authority: A,
        lanes: Lanes,
        history: RoundHistoryCache,
        notifier: Notifier,
        metrics: Metrics,
    ) -> Self {
        Self {
            authority,
            lanes,
            history,
            notifier,
            metrics,
        }
    }

    pub async fn resync(&self, duration: RoundDuration) -> Result<Seeded, ResyncError> {
        let lane = self.lanes.get(duration);
        let Some(_guard) = lane.try_begin_sync() else {
            debug!(%duration, "resync skipped: already in flight");
            self.metrics.resync(duration, "skipped");
            return Err(ResyncError::InFlight);
        };

        let reported = match self.authority.timer(duration).await {
            Ok(response) => response
                .remaining_seconds()
                .map(|seconds| (seconds, response.period_number))
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        let seeded = match reported {
            Ok((seconds, period)) => self.seed(lane, seconds, period).await?,
            Err(reason) => {
                self.notifier.failure(duration, Action::FetchTimer, reason);
                self.fallback(lane).await?
            }
        };
        self.metrics.resync(duration, seeded.source.as_str());
        Ok(seeded)
    }

    async fn seed(
        &self,
        lane: &Lane,
        reported_seconds: u64,
        reported_period: Option<PeriodNumber>,
    ) -> Result<Seeded, ResyncError> {
        let duration = lane.duration();
        let last_settled = self.history.latest(duration).map(|o| o.period_number);
        let plan = {
            let mut round = lane.round_mut();
            let plan = plan(
                duration,
                round.as_ref(),
                last_settled,
                reported_seconds,
                reported_period,
            );
            if !round.as_ref().is_some_and(|r| r.period == plan.period) {
                if let Some(previous) = round.as_ref().filter(|r| r.is_open()) {
                    warn!(
                        %duration,
                        previous = %previous.period,
                        next = %plan.period,
                        "superseding unsettled round"
                    );
                }
                *round = Some(Round::new(duration, plan.period));
            }
            if let Some(current) = round.as_mut() {
                current.synced(SystemTime::now());
            }
            plan
        };

        lane.clock().start(plan.seconds).await?;
        info!(
            %duration,
            period = %plan.period,
            seconds = plan.seconds,
            reported = reported_seconds,
            "round clock synchronized"
        );
        Ok(Seeded {
            seconds: plan.seconds,
            period: Some(plan.period),
            source: SeedSource::Authority,
        })
    }

    async fn fallback(&self, lane: &Lane) -> Result<Seeded, ResyncError> {
        let duration = lane.duration();
        let state = lane.clock().state();
        let period = {
            let mut round = lane.round_mut();
            let open = round.as_ref().is_some_and(Round::is_open);
            if open && state.running && state.remaining > 0 {
                debug!(%duration, remaining = state.remaining, "keeping running clock");
                return Ok(Seeded {
                    seconds: state.remaining,
                    period: round.as_ref().map(|r| r.period),
                    source: SeedSource::Kept,
                });
            }

            // Guess the next round, but leave it pending until the authority
            // (or an accepted bet) confirms it
            let next = match round.as_ref() {
                Some(current) if current.is_closed() => Some(current.period.next()),
                Some(_) => None,
                None => Some(
                    self.history
                        .latest(duration)
                        .map_or(PeriodNumber(1), |o| o.period_number.next()),
                ),
            };
            if let Some(next) = next {
                *round = Some(Round::new(duration, next));
            }
            round.as_ref().map(|r| r.period)
        };
        debug!(%duration, ?period, "seeding fallback round");

        let seconds = duration.fallback_seconds();
        lane.clock().start(seconds).await?;
        self.notifier.fallback(duration, seconds);
        Ok(Seeded {
            seconds,
            period,
            source: SeedSource::Fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundplay_types::RoundStatus;

    fn active(duration: RoundDuration, period: u64) -> Round {
        let mut round = Round::new(duration, PeriodNumber(period));
        round.synced(SystemTime::now());
        round
    }

    fn settled(duration: RoundDuration, period: u64) -> Round {
        let mut round = active(duration, period);
        round.begin_settlement().unwrap();
        round.finish_settlement().unwrap();
        round
    }

    #[test]
    fn test_plan_uses_reported_values() {
        let duration = RoundDuration::ThreeMinutes;
        let plan = plan(duration, None, None, 95, Some(PeriodNumber(12)));
        assert_eq!(
            plan,
            Plan {
                seconds: 95,
                period: PeriodNumber(12)
            }
        );
    }

    #[test]
    fn test_plan_clamps_to_duration() {
        let plan = plan(
            RoundDuration::OneMinute,
            None,
            None,
            3_600,
            Some(PeriodNumber(2)),
        );
        assert_eq!(plan.seconds, 60);
    }

    #[test]
    fn test_plan_zero_means_next_round() {
        let duration = RoundDuration::FiveMinutes;
        let local = active(duration, 7);
        let plan = plan(duration, Some(&local), None, 0, Some(PeriodNumber(7)));
        assert_eq!(
            plan,
            Plan {
                seconds: 300,
                period: PeriodNumber(8)
            }
        );
    }

    #[test]
    fn test_plan_skips_settled_period() {
        let duration = RoundDuration::OneMinute;
        let local = settled(duration, 4);
        assert_eq!(local.status(), RoundStatus::Settled);

        // Authority still reports the round we just settled
        let plan = plan(duration, Some(&local), None, 2, Some(PeriodNumber(4)));
        assert_eq!(
            plan,
            Plan {
                seconds: 60,
                period: PeriodNumber(5)
            }
        );
    }

    #[test]
    fn test_plan_ignores_stale_period() {
        let duration = RoundDuration::TenMinutes;
        let local = active(duration, 20);
        let plan = plan(duration, Some(&local), None, 400, Some(PeriodNumber(18)));
        assert_eq!(plan.period, PeriodNumber(20));
        assert_eq!(plan.seconds, 400);
    }

    #[test]
    fn test_plan_derives_missing_period() {
        let duration = RoundDuration::OneMinute;

        // From the local round
        let local = settled(duration, 9);
        assert_eq!(
            plan(duration, Some(&local), None, 40, None).period,
            PeriodNumber(10)
        );
        let local = active(duration, 9);
        assert_eq!(
            plan(duration, Some(&local), None, 40, None).period,
            PeriodNumber(9)
        );

        // From history
        assert_eq!(
            plan(duration, None, Some(PeriodNumber(30)), 40, None).period,
            PeriodNumber(31)
        );

        // Nothing known
        assert_eq!(plan(duration, None, None, 40, None).period, PeriodNumber(1));
    }

    #[test]
    fn test_plan_history_already_has_reported_period() {
        let duration = RoundDuration::ThreeMinutes;
        let plan = plan(
            duration,
            None,
            Some(PeriodNumber(15)),
            12,
            Some(PeriodNumber(15)),
        );
        assert_eq!(
            plan,
            Plan {
                seconds: 180,
                period: PeriodNumber(16)
            }
        );
    }
}
