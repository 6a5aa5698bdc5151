use crate::{Error, Result};
use reqwest::Client as HttpClient;
use roundplay_types::{
    api::{
        BetHistoryRequest, BetRecord, CheckValidBetRequest, CheckValidBetResponse,
        LatestResultRequest, PlaceBetRequest, ResultsRequest, RoundOutcome, TimerRequest,
        TimerResponse, BET_HISTORY_PATH, CHECK_VALID_BET_PATH, LATEST_RESULT_PATH,
        PLACE_BET_PATH, RESULTS_PATH, TIMER_PATH,
    },
    PeriodNumber, RoundDuration,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether bet placement may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// Round authority client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        // Endpoints are joined relative to the base, so it must end in a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60)) // Keep connections alive
            .tcp_keepalive(Duration::from_secs(30)) // TCP keepalive
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sets the retry policy for subsequent HTTP requests.
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Authoritative remaining time for `duration`.
    pub async fn timer(&self, duration: RoundDuration) -> Result<TimerResponse> {
        self.query(TIMER_PATH, &TimerRequest { duration }).await
    }

    /// Past round outcomes for `duration`, newest first.
    pub async fn results(&self, duration: RoundDuration) -> Result<Vec<RoundOutcome>> {
        self.query(RESULTS_PATH, &ResultsRequest { duration }).await
    }

    /// Generates (or fetches, if already drawn) the outcome of a round.
    pub async fn latest_result(
        &self,
        duration: RoundDuration,
        period_number: PeriodNumber,
    ) -> Result<RoundOutcome> {
        let request = LatestResultRequest {
            period_number,
            duration,
        };
        self.query(LATEST_RESULT_PATH, &request).await
    }

    /// The user's most recent bet, if any.
    pub async fn bet_history(&self, user_id: &str) -> Result<Option<BetRecord>> {
        let request = BetHistoryRequest {
            user_id: user_id.to_string(),
        };
        self.query(BET_HISTORY_PATH, &request).await
    }

    /// Number of bets the user has pending for `duration`.
    pub async fn check_valid_bet(&self, user_id: &str, duration: RoundDuration) -> Result<u64> {
        let request = CheckValidBetRequest {
            user_id: user_id.to_string(),
            duration,
        };
        let response: CheckValidBetResponse = self.query(CHECK_VALID_BET_PATH, &request).await?;
        Ok(response.pending_bets)
    }

    /// Submits a wager. Any success status means the ledger accepted it.
    pub async fn place_bet(&self, request: &PlaceBetRequest) -> Result<()> {
        let url = self.base_url.join(PLACE_BET_PATH)?;
        debug!(%url, period = %request.period_number, "placing bet");
        let response = self
            .send_with_retry(self.retry_policy.retry_non_idempotent, || {
                self.http_client.post(url.clone()).json(request)
            })
            .await?;
        if !response.status().is_success() {
            return Err(Error::Failed(response.status()));
        }
        Ok(())
    }

    /// Every read is a `POST` with a JSON body, but all of them are safe to
    /// repeat.
    async fn query<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        debug!(%url, "querying round authority");
        let response = self
            .send_with_retry(true, || self.http_client.post(url.clone()).json(body))
            .await?;
        if !response.status().is_success() {
            return Err(Error::Failed(response.status()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(Error::Malformed)
    }

    async fn send_with_retry(
        &self,
        idempotent: bool,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts = if idempotent {
            self.retry_policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }
}

pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
