//! The round authority seam.
//!
//! Everything the coordinator learns about rounds comes through
//! [RoundAuthority]. In production that is the HTTP [roundplay_client::Client];
//! tests use an in-memory [Mock].

use roundplay_types::{
    api::{BetRecord, PlaceBetRequest, RoundOutcome, TimerResponse},
    PeriodNumber, RoundDuration,
};
use std::future::Future;
#[cfg(test)]
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Errors returned by a [RoundAuthority].
pub trait AuthorityError: std::error::Error + Send + Sync + 'static {
    /// Whether the failure is worth retrying on the next scheduled attempt
    /// (timeouts, connection failures, server errors, unreadable payloads).
    fn is_transient(&self) -> bool;
}

/// Trait for interacting with the round authority.
pub trait RoundAuthority: Clone + Send + Sync + 'static {
    type Error: AuthorityError;

    /// Authoritative remaining time for `duration`.
    fn timer(
        &self,
        duration: RoundDuration,
    ) -> impl Future<Output = Result<TimerResponse, Self::Error>> + Send;

    /// Past outcomes for `duration`, newest first.
    fn results(
        &self,
        duration: RoundDuration,
    ) -> impl Future<Output = Result<Vec<RoundOutcome>, Self::Error>> + Send;

    /// Generates (or fetches) the outcome of a finished round.
    fn latest_result(
        &self,
        duration: RoundDuration,
        period: PeriodNumber,
    ) -> impl Future<Output = Result<RoundOutcome, Self::Error>> + Send;

    /// The user's most recently settled bet.
    fn bet_history(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<Option<BetRecord>, Self::Error>> + Send;

    /// Number of bets the user has pending for `duration`.
    fn check_valid_bet(
        &self,
        user: &str,
        duration: RoundDuration,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Submits a wager to the ledger.
    fn place_bet(
        &self,
        request: PlaceBetRequest,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl AuthorityError for roundplay_client::Error {
    fn is_transient(&self) -> bool {
        roundplay_client::Error::is_transient(self)
    }
}

impl RoundAuthority for roundplay_client::Client {
    type Error = roundplay_client::Error;

    async fn timer(&self, duration: RoundDuration) -> Result<TimerResponse, Self::Error> {
        self.timer(duration).await
    }

    async fn results(&self, duration: RoundDuration) -> Result<Vec<RoundOutcome>, Self::Error> {
        self.results(duration).await
    }

    async fn latest_result(
        &self,
        duration: RoundDuration,
        period: PeriodNumber,
    ) -> Result<RoundOutcome, Self::Error> {
        self.latest_result(duration, period).await
    }

    async fn bet_history(&self, user: &str) -> Result<Option<BetRecord>, Self::Error> {
        self.bet_history(user).await
    }

    async fn check_valid_bet(
        &self,
        user: &str,
        duration: RoundDuration,
    ) -> Result<u64, Self::Error> {
        self.check_valid_bet(user, duration).await
    }

    async fn place_bet(&self, request: PlaceBetRequest) -> Result<(), Self::Error> {
        self.place_bet(&request).await
    }
}

/// Calls a [Mock] can be told to fail.
#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockCall {
    Timer(RoundDuration),
    /// Answer the timer with a non-numeric value instead of failing.
    MalformedTimer(RoundDuration),
    Results(RoundDuration),
    LatestResult(RoundDuration),
    BetHistory,
    CheckValidBet,
    /// Fail placement as if the ledger were unreachable.
    PlaceBet,
    /// Refuse placement with a non-transient error.
    RefuseBet,
}

#[cfg(test)]
#[derive(Debug, thiserror::Error)]
#[error("mock authority: {message}")]
pub struct MockError {
    pub transient: bool,
    pub message: String,
}

#[cfg(test)]
impl MockError {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
impl AuthorityError for MockError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MockState {
    remaining: HashMap<RoundDuration, u64>,
    raw_timers: HashMap<RoundDuration, TimerResponse>,
    periods: HashMap<RoundDuration, PeriodNumber>,
    draws: HashMap<(RoundDuration, PeriodNumber), u8>,
    outcomes: HashMap<RoundDuration, Vec<RoundOutcome>>,
    placed: Vec<(PlaceBetRequest, bool)>,
    last_bet: Option<BetRecord>,
    pending: HashMap<(String, RoundDuration), u64>,
    failing: HashSet<MockCall>,
    timer_delay: Option<Duration>,

    pub timer_calls: Vec<RoundDuration>,
    pub latest_result_calls: Vec<(RoundDuration, PeriodNumber)>,
    pub bet_history_calls: usize,
}

/// A mock round authority for testing.
///
/// Every duration starts at period 1 with a full round remaining. Drawing a
/// period settles the bets placed on it (paying double on a match) and moves
/// the duration to the next period.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct Mock {
    pub state: Arc<Mutex<MockState>>,
}

#[cfg(test)]
impl Mock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_remaining(&self, duration: RoundDuration, seconds: u64) {
        self.lock().remaining.insert(duration, seconds);
    }

    /// Answers the timer for `duration` with exactly `response`.
    pub fn set_timer_response(&self, duration: RoundDuration, response: TimerResponse) {
        self.lock().raw_timers.insert(duration, response);
    }

    pub fn set_period(&self, duration: RoundDuration, period: PeriodNumber) {
        self.lock().periods.insert(duration, period);
    }

    pub fn script(&self, duration: RoundDuration, period: PeriodNumber, number: u8) {
        self.lock().draws.insert((duration, period), number);
    }

    pub fn set_results(&self, duration: RoundDuration, outcomes: Vec<RoundOutcome>) {
        self.lock().outcomes.insert(duration, outcomes);
    }

    pub fn set_bet_record(&self, record: BetRecord) {
        self.lock().last_bet = Some(record);
    }

    pub fn set_timer_delay(&self, delay: Duration) {
        self.lock().timer_delay = Some(delay);
    }

    pub fn fail(&self, call: MockCall) {
        self.lock().failing.insert(call);
    }

    pub fn recover(&self, call: MockCall) {
        self.lock().failing.remove(&call);
    }

    pub fn pending(&self, user: &str, duration: RoundDuration) -> u64 {
        self.lock()
            .pending
            .get(&(user.to_string(), duration))
            .copied()
            .unwrap_or(0)
    }

    pub fn placed(&self) -> Vec<PlaceBetRequest> {
        self.lock().placed.iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn latest_result_calls(&self, duration: RoundDuration) -> usize {
        self.lock()
            .latest_result_calls
            .iter()
            .filter(|(d, _)| *d == duration)
            .count()
    }

    pub fn timer_calls(&self, duration: RoundDuration) -> usize {
        self.lock()
            .timer_calls
            .iter()
            .filter(|d| **d == duration)
            .count()
    }

    fn period(state: &MockState, duration: RoundDuration) -> PeriodNumber {
        state
            .periods
            .get(&duration)
            .copied()
            .unwrap_or(PeriodNumber(1))
    }
}

#[cfg(test)]
impl RoundAuthority for Mock {
    type Error = MockError;

    async fn timer(&self, duration: RoundDuration) -> Result<TimerResponse, Self::Error> {
        let delay = {
            let mut state = self.lock();
            state.timer_calls.push(duration);
            state.timer_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.failing.contains(&MockCall::Timer(duration)) {
            return Err(MockError::transient("timer unavailable"));
        }
        if state.failing.contains(&MockCall::MalformedTimer(duration)) {
            return Ok(TimerResponse {
                remaining_time_seconds: Some("soon".into()),
                ..Default::default()
            });
        }
        if let Some(response) = state.raw_timers.get(&duration) {
            return Ok(response.clone());
        }
        let seconds = state
            .remaining
            .get(&duration)
            .copied()
            .unwrap_or(duration.seconds());
        Ok(TimerResponse::seconds(
            seconds,
            Some(Self::period(&state, duration)),
        ))
    }

    async fn results(&self, duration: RoundDuration) -> Result<Vec<RoundOutcome>, Self::Error> {
        let state = self.lock();
        if state.failing.contains(&MockCall::Results(duration)) {
            return Err(MockError::transient("results unavailable"));
        }
        Ok(state.outcomes.get(&duration).cloned().unwrap_or_default())
    }

    async fn latest_result(
        &self,
        duration: RoundDuration,
        period: PeriodNumber,
    ) -> Result<RoundOutcome, Self::Error> {
        let mut state = self.lock();
        state.latest_result_calls.push((duration, period));
        if state.failing.contains(&MockCall::LatestResult(duration)) {
            return Err(MockError::transient("latest result unavailable"));
        }

        // Drawing is idempotent
        if let Some(outcome) = state
            .outcomes
            .get(&duration)
            .and_then(|outcomes| outcomes.iter().find(|o| o.period_number == period))
        {
            return Ok(outcome.clone());
        }
        let number = state.draws.get(&(duration, period)).copied().unwrap_or(0);
        let outcome = RoundOutcome::from_number(period, number);
        state
            .outcomes
            .entry(duration)
            .or_default()
            .insert(0, outcome.clone());

        // Settle bets on the drawn round
        let mut settled = Vec::new();
        for (request, done) in state.placed.iter_mut() {
            if *done || request.duration != duration || request.period_number != period {
                continue;
            }
            *done = true;
            settled.push(request.clone());
        }
        for request in settled {
            let won = request
                .selection()
                .map(|selection| outcome.matches(&selection))
                .unwrap_or(false);
            state.last_bet = Some(BetRecord {
                period_number: period,
                duration: Some(duration),
                status: if won {
                    roundplay_types::BetOutcome::Won
                } else {
                    roundplay_types::BetOutcome::Lost
                },
                amount: request.amount,
                amount_received: if won { request.amount * 2 } else { 0 },
            });
            if let Some(count) = state.pending.get_mut(&(request.user_id.clone(), duration)) {
                *count = count.saturating_sub(1);
            }
        }

        if period >= Self::period(&state, duration) {
            state.periods.insert(duration, period.next());
        }
        Ok(outcome)
    }

    async fn bet_history(&self, _user: &str) -> Result<Option<BetRecord>, Self::Error> {
        let mut state = self.lock();
        state.bet_history_calls += 1;
        if state.failing.contains(&MockCall::BetHistory) {
            return Err(MockError::transient("bet history unavailable"));
        }
        Ok(state.last_bet.clone())
    }

    async fn check_valid_bet(
        &self,
        user: &str,
        duration: RoundDuration,
    ) -> Result<u64, Self::Error> {
        let state = self.lock();
        if state.failing.contains(&MockCall::CheckValidBet) {
            return Err(MockError::transient("pending check unavailable"));
        }
        Ok(state
            .pending
            .get(&(user.to_string(), duration))
            .copied()
            .unwrap_or(0))
    }

    async fn place_bet(&self, request: PlaceBetRequest) -> Result<(), Self::Error> {
        let mut state = self.lock();
        if state.failing.contains(&MockCall::PlaceBet) {
            return Err(MockError::transient("ledger unreachable"));
        }
        if state.failing.contains(&MockCall::RefuseBet) {
            return Err(MockError::rejected("bet refused"));
        }
        let key = (request.user_id.clone(), request.duration);
        if state.pending.get(&key).copied().unwrap_or(0) > 0 {
            return Err(MockError::rejected("bet already pending"));
        }
        *state.pending.entry(key).or_default() += 1;
        state.placed.push((request, false));
        Ok(())
    }
}
