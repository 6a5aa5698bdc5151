use axum::{
    extract::State as AxumState,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use roundplay_types::{
    api::{
        BetHistoryRequest, BetRecord, CheckValidBetRequest, CheckValidBetResponse,
        LatestResultRequest, PlaceBetRequest, ResultsRequest, RoundOutcome, TimerRequest,
        TimerResponse, BET_HISTORY_PATH, CHECK_VALID_BET_PATH, LATEST_RESULT_PATH,
        PLACE_BET_PATH, RESULTS_PATH, TIMER_PATH,
    },
    BetOutcome, Color, PeriodNumber, RoundDuration, Selection, COLOR_MULTIPLIER,
    GRACE_WINDOW_SECS, HISTORY_CAPACITY, MAX_NUMBER, NUMBER_MULTIPLIER, SIZE_MULTIPLIER,
    VIOLET_MULTIPLIER,
};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::time::Instant;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// A failure the simulator can be told to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `/timer` answers 503 for the duration.
    Timer(RoundDuration),
    /// `/timer` answers with non-numeric fields for the duration.
    MalformedTimer(RoundDuration),
    Results(RoundDuration),
    LatestResult(RoundDuration),
    BetHistory,
    CheckValidBet,
    PlaceBet,
}

/// Why the simulated ledger refused a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("period {requested} is not open for {duration} (current {current})")]
    WrongPeriod {
        duration: RoundDuration,
        requested: PeriodNumber,
        current: PeriodNumber,
    },
    #[error("round closed")]
    RoundClosed,
    #[error("a bet is already pending for this round")]
    AlreadyPending,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("invalid selection")]
    InvalidSelection,
}

impl Rejection {
    fn status(&self) -> StatusCode {
        match self {
            Rejection::AlreadyPending => StatusCode::CONFLICT,
            Rejection::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

struct Lane {
    period: PeriodNumber,
    ends_at: Instant,
}

impl Lane {
    /// Advances past every round that ended before `now`.
    fn roll(&mut self, duration: RoundDuration, now: Instant) {
        if now < self.ends_at {
            return;
        }
        let length = duration.seconds();
        let skipped = (now - self.ends_at).as_secs() / length;
        self.period = PeriodNumber(self.period.0 + 1 + skipped);
        self.ends_at += Duration::from_secs(length * (1 + skipped));
    }

    fn remaining(&self, now: Instant) -> u64 {
        let left = self.ends_at.saturating_duration_since(now);
        let mut seconds = left.as_secs();
        if left.subsec_nanos() > 0 {
            seconds += 1;
        }
        seconds
    }
}

struct StoredBet {
    id: Uuid,
    user: String,
    duration: RoundDuration,
    period: PeriodNumber,
    selection: Selection,
    amount: u64,
    status: BetOutcome,
    received: u64,
}

impl StoredBet {
    fn record(&self) -> BetRecord {
        BetRecord {
            period_number: self.period,
            duration: Some(self.duration),
            status: self.status,
            amount: self.amount,
            amount_received: self.received,
        }
    }
}

pub struct State {
    lanes: HashMap<RoundDuration, Lane>,
    outcomes: HashMap<(RoundDuration, PeriodNumber), RoundOutcome>,
    history: HashMap<RoundDuration, VecDeque<RoundOutcome>>,
    scripted: HashMap<(RoundDuration, PeriodNumber), u8>,
    bets: Vec<StoredBet>,
    settled_order: Vec<usize>,
    balances: HashMap<String, u64>,
    faults: HashSet<Fault>,
    rng: StdRng,
}

impl State {
    fn new(seed: u64) -> Self {
        let now = Instant::now();
        let lanes = RoundDuration::ALL
            .into_iter()
            .map(|duration| {
                let lane = Lane {
                    period: PeriodNumber(1),
                    ends_at: now + Duration::from_secs(duration.seconds()),
                };
                (duration, lane)
            })
            .collect();
        Self {
            lanes,
            outcomes: HashMap::new(),
            history: HashMap::new(),
            scripted: HashMap::new(),
            bets: Vec::new(),
            settled_order: Vec::new(),
            balances: HashMap::new(),
            faults: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn lane(&mut self, duration: RoundDuration) -> &mut Lane {
        let lane = self
            .lanes
            .entry(duration)
            .or_insert_with(|| Lane {
                period: PeriodNumber(1),
                ends_at: Instant::now() + Duration::from_secs(duration.seconds()),
            });
        lane.roll(duration, Instant::now());
        lane
    }
}

/// An in-memory round authority and bet ledger.
pub struct Simulator {
    state: Mutex<State>,
}

impl Simulator {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(State::new(seed)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ends the current round of `duration` in `seconds`.
    pub fn set_remaining(&self, duration: RoundDuration, seconds: u64) {
        let mut state = self.state();
        let lane = state.lane(duration);
        lane.ends_at = Instant::now() + Duration::from_secs(seconds);
    }

    pub fn set_period(&self, duration: RoundDuration, period: PeriodNumber) {
        self.state().lane(duration).period = period;
    }

    /// Fixes the number drawn for a future round.
    pub fn script(&self, duration: RoundDuration, period: PeriodNumber, number: u8) {
        self.state().scripted.insert((duration, period), number);
    }

    pub fn credit(&self, user: &str, amount: u64) {
        *self.state().balances.entry(user.to_string()).or_default() += amount;
    }

    pub fn balance(&self, user: &str) -> u64 {
        self.state().balances.get(user).copied().unwrap_or_default()
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.insert(fault);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.state().faults.contains(&fault)
    }

    pub fn timer(&self, duration: RoundDuration) -> TimerResponse {
        let mut state = self.state();
        let lane = state.lane(duration);
        let remaining = lane.remaining(Instant::now());
        let period = Some(lane.period);
        match duration {
            RoundDuration::OneMinute | RoundDuration::ThreeMinutes => {
                TimerResponse::seconds(remaining, period)
            }
            RoundDuration::FiveMinutes | RoundDuration::TenMinutes => {
                TimerResponse::minutes_and_seconds(remaining / 60, remaining % 60, period)
            }
        }
    }

    pub fn results(&self, duration: RoundDuration) -> Vec<RoundOutcome> {
        self.state()
            .history
            .get(&duration)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Draws the outcome of a round (once) and settles every bet on it.
    pub fn draw(
        &self,
        duration: RoundDuration,
        period: PeriodNumber,
    ) -> Result<RoundOutcome, Rejection> {
        let mut state = self.state();
        if let Some(outcome) = state.outcomes.get(&(duration, period)) {
            return Ok(outcome.clone());
        }
        let current = state.lane(duration).period;
        if period > current {
            return Err(Rejection::WrongPeriod {
                duration,
                requested: period,
                current,
            });
        }

        let number = match state.scripted.remove(&(duration, period)) {
            Some(number) => number,
            None => state.rng.gen_range(0..=MAX_NUMBER),
        };
        let outcome = RoundOutcome::from_number(period, number);
        state.outcomes.insert((duration, period), outcome.clone());
        let history = state.history.entry(duration).or_default();
        history.push_front(outcome.clone());
        history.truncate(HISTORY_CAPACITY);

        let State {
            bets,
            balances,
            settled_order,
            ..
        } = &mut *state;
        for (index, bet) in bets.iter_mut().enumerate() {
            if bet.duration != duration || bet.period != period || bet.status != BetOutcome::Pending
            {
                continue;
            }
            if outcome.matches(&bet.selection) {
                bet.status = BetOutcome::Won;
                bet.received = bet.amount * multiplier(&bet.selection);
                *balances.entry(bet.user.clone()).or_default() += bet.received;
            } else {
                bet.status = BetOutcome::Lost;
            }
            settled_order.push(index);
        }
        tracing::info!(%duration, %period, number, "drew round");
        Ok(outcome)
    }

    /// The user's most recently settled bet.
    pub fn latest_bet(&self, user: &str) -> Option<BetRecord> {
        let state = self.state();
        state
            .settled_order
            .iter()
            .rev()
            .map(|index| &state.bets[*index])
            .find(|bet| bet.user == user)
            .map(StoredBet::record)
    }

    pub fn pending_bets(&self, user: &str, duration: RoundDuration) -> u64 {
        self.state()
            .bets
            .iter()
            .filter(|bet| {
                bet.user == user && bet.duration == duration && bet.status == BetOutcome::Pending
            })
            .count() as u64
    }

    pub fn place_bet(&self, request: &PlaceBetRequest) -> Result<Uuid, Rejection> {
        let selection = request
            .selection()
            .map_err(|_| Rejection::InvalidSelection)?;
        if request.amount == 0 {
            return Err(Rejection::InvalidAmount);
        }

        let mut state = self.state();
        let now = Instant::now();
        let lane = state.lane(request.duration);
        let (current, remaining) = (lane.period, lane.remaining(now));
        if request.period_number != current {
            return Err(Rejection::WrongPeriod {
                duration: request.duration,
                requested: request.period_number,
                current,
            });
        }
        if remaining < GRACE_WINDOW_SECS
            || state
                .outcomes
                .contains_key(&(request.duration, request.period_number))
        {
            return Err(Rejection::RoundClosed);
        }
        let duplicate = state.bets.iter().any(|bet| {
            bet.user == request.user_id
                && bet.duration == request.duration
                && bet.period == request.period_number
                && bet.status == BetOutcome::Pending
        });
        if duplicate {
            return Err(Rejection::AlreadyPending);
        }
        let balance = state.balances.entry(request.user_id.clone()).or_default();
        if *balance < request.amount {
            return Err(Rejection::InsufficientFunds);
        }
        *balance -= request.amount;

        let id = Uuid::new_v4();
        state.bets.push(StoredBet {
            id,
            user: request.user_id.clone(),
            duration: request.duration,
            period: request.period_number,
            selection,
            amount: request.amount,
            status: BetOutcome::Pending,
            received: 0,
        });
        Ok(id)
    }

    /// Identifiers of every bet the user placed, oldest first.
    pub fn bet_ids(&self, user: &str) -> Vec<Uuid> {
        self.state()
            .bets
            .iter()
            .filter(|bet| bet.user == user)
            .map(|bet| bet.id)
            .collect()
    }
}

fn multiplier(selection: &Selection) -> u64 {
    match selection {
        Selection::Number(_) => NUMBER_MULTIPLIER,
        Selection::Color(Color::Violet) => VIOLET_MULTIPLIER,
        Selection::Color(_) => COLOR_MULTIPLIER,
        Selection::Size(_) => SIZE_MULTIPLIER,
    }
}

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        // Local development never needs rate limiting, so keep the burst large
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_millisecond(1)
                .burst_size(100_000)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .expect("static governor configuration is valid"),
        );

        Router::new()
            .route(&format!("/{TIMER_PATH}"), post(timer))
            .route(&format!("/{RESULTS_PATH}"), post(results))
            .route(&format!("/{LATEST_RESULT_PATH}"), post(latest_result))
            .route(&format!("/{BET_HISTORY_PATH}"), post(bet_history))
            .route(&format!("/{CHECK_VALID_BET_PATH}"), post(check_valid_bet))
            .route(&format!("/{PLACE_BET_PATH}"), post(place_bet))
            .layer(cors)
            .layer(GovernorLayer {
                config: governor_conf,
            })
            .with_state(self.simulator.clone())
    }
}

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "injected fault").into_response()
}

async fn timer(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<TimerRequest>,
) -> Response {
    if simulator.faulted(Fault::Timer(request.duration)) {
        return unavailable();
    }
    if simulator.faulted(Fault::MalformedTimer(request.duration)) {
        return Json(json!({ "remainingTimeSeconds": "--" })).into_response();
    }
    Json(simulator.timer(request.duration)).into_response()
}

async fn results(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<ResultsRequest>,
) -> Response {
    if simulator.faulted(Fault::Results(request.duration)) {
        return unavailable();
    }
    Json(simulator.results(request.duration)).into_response()
}

async fn latest_result(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<LatestResultRequest>,
) -> Response {
    if simulator.faulted(Fault::LatestResult(request.duration)) {
        return unavailable();
    }
    match simulator.draw(request.duration, request.period_number) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(rejection) => (rejection.status(), rejection.to_string()).into_response(),
    }
}

async fn bet_history(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<BetHistoryRequest>,
) -> Response {
    if simulator.faulted(Fault::BetHistory) {
        return unavailable();
    }
    Json(simulator.latest_bet(&request.user_id)).into_response()
}

async fn check_valid_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<CheckValidBetRequest>,
) -> Response {
    if simulator.faulted(Fault::CheckValidBet) {
        return unavailable();
    }
    let pending_bets = simulator.pending_bets(&request.user_id, request.duration);
    Json(CheckValidBetResponse { pending_bets }).into_response()
}

async fn place_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<PlaceBetRequest>,
) -> Response {
    if simulator.faulted(Fault::PlaceBet) {
        return unavailable();
    }
    match simulator.place_bet(&request) {
        Ok(id) => {
            tracing::info!(user = %request.user_id, %id, period = %request.period_number, "accepted bet");
            Json(json!({ "betId": id.to_string() })).into_response()
        }
        Err(rejection) => {
            tracing::debug!(user = %request.user_id, %rejection, "refused bet");
            (rejection.status(), rejection.to_string()).into_response()
        }
    }
}
