use super::*;
use authority::{Mock, MockCall};
use metrics::Metrics;
use prometheus_client::registry::Registry;
use roundplay_types::{
    api::{BetRecord, PlaceBetRequest, RoundOutcome, TimerResponse},
    BetOutcome, Color, PeriodNumber, RoundDuration, RoundStatus, Selection,
};
use std::time::Duration;
use sync::{ResyncError, SeedSource};
use tokio::{
    sync::broadcast,
    time::{sleep, timeout},
};

const USER: &str = "alice";
const CURRENCY: &str = "INR";

fn raw_config() -> Config {
    Config {
        authority: "http://localhost:8080/api".to_string(),
        user_id: USER.to_string(),
        currency: CURRENCY.to_string(),
        initial_balance: 1_000,
        min_stake: 10,
        max_stake: 1_000,
        grace_window_secs: 10,
        history_capacity: 100,
        history_page_size: 10,
        mailbox_size: 16,
        log_level: "info".to_string(),
        log_json: false,
        metrics_port: None,
        retry_attempts: 1,
    }
}

fn start(mock: &Mock) -> Scheduler<Mock> {
    let config = raw_config().validate().unwrap();
    Scheduler::start(&config, mock.clone(), &mut Registry::default())
}

/// Lets every runnable task make progress without advancing whole seconds.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

async fn expect_notification(
    receiver: &mut broadcast::Receiver<Notification>,
    matches: impl Fn(&Notification) -> bool,
) -> Notification {
    timeout(Duration::from_secs(120), async {
        loop {
            let notification = receiver.recv().await.unwrap();
            if matches(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification not received")
}

#[test]
fn test_config_from_yaml() {
    let yaml = r#"
authority: "https://rounds.example.com"
user_id: "alice"
currency: "INR"
initial_balance: 500
log_level: "debug"
metrics_port: 9090
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let config = config.validate().unwrap();
    assert_eq!(config.authority.as_str(), "https://rounds.example.com/");
    assert_eq!(config.grace_window, 10);
    assert_eq!(config.stake_limits, StakeLimits { min: 10, max: 100_000 });
    assert_eq!(config.history_page_size, 10);
    assert_eq!(config.history_capacity, 100);
    assert_eq!(config.mailbox_size, 64);
    assert_eq!(config.retry_attempts, 3);
    assert_eq!(config.metrics_port, Some(9090));
    assert_eq!(config.log_level, tracing::Level::DEBUG);
    assert!(!config.log_json);
}

#[test]
fn test_config_validation() {
    let mut config = raw_config();
    config.log_level = "loud".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidLogLevel { .. })
    ));

    let mut config = raw_config();
    config.min_stake = 500;
    config.max_stake = 100;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidStakeRange { min: 500, max: 100 })
    ));

    let mut config = raw_config();
    config.mailbox_size = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidNonZero {
            field: "mailbox_size",
            ..
        })
    ));

    let mut config = raw_config();
    config.authority = "not a url".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidAuthority { .. })
    ));

    let mut config = raw_config();
    config.user_id = " ".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Empty { field: "user_id" })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_clocks_expire_independently() {
    let mock = Mock::new();
    mock.set_remaining(RoundDuration::OneMinute, 5);
    mock.set_remaining(RoundDuration::ThreeMinutes, 95);
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(scheduler.remaining(RoundDuration::OneMinute), 5);
    assert_eq!(scheduler.remaining(RoundDuration::ThreeMinutes), 95);
    assert_eq!(scheduler.remaining(RoundDuration::TenMinutes), 600);

    // Selecting another duration does not pause anything
    scheduler.select(RoundDuration::TenMinutes);
    sleep(Duration::from_millis(5_500)).await;

    // Only the 1-minute round settled
    assert_eq!(mock.latest_result_calls(RoundDuration::OneMinute), 1);
    assert_eq!(mock.latest_result_calls(RoundDuration::ThreeMinutes), 0);
    assert_eq!(scheduler.remaining(RoundDuration::ThreeMinutes), 90);
    assert_eq!(scheduler.remaining(RoundDuration::TenMinutes), 595);
    assert_eq!(
        scheduler.round(RoundDuration::ThreeMinutes).unwrap().period,
        PeriodNumber(1)
    );

    // The next 1-minute round is already running
    let round = scheduler.round(RoundDuration::OneMinute).unwrap();
    assert_eq!(round.period, PeriodNumber(2));
    assert_eq!(round.status(), RoundStatus::Active);
    assert_eq!(scheduler.remaining(RoundDuration::OneMinute), 5);

    let page = scheduler.history(RoundDuration::OneMinute, 1);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].period_number, PeriodNumber(1));
    assert!(scheduler.history(RoundDuration::ThreeMinutes, 1).items.is_empty());

    assert_eq!(
        Metrics::count(
            &scheduler.metrics().settlements,
            RoundDuration::OneMinute,
            "settled"
        ),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_resync_failure_falls_back() {
    let mock = Mock::new();
    mock.fail(MockCall::Timer(RoundDuration::FiveMinutes));
    let scheduler = start(&mock);
    let mut notifications = scheduler.subscribe();
    settle().await;

    expect_notification(&mut notifications, |n| {
        matches!(
            n,
            Notification::Failure {
                duration: RoundDuration::FiveMinutes,
                action: Action::FetchTimer,
                ..
            }
        )
    })
    .await;
    let fallback = expect_notification(&mut notifications, |n| {
        matches!(n, Notification::Fallback { .. })
    })
    .await;
    assert_eq!(
        fallback,
        Notification::Fallback {
            duration: RoundDuration::FiveMinutes,
            seconds: 300
        }
    );

    // The clock keeps ticking on the fallback
    let clock = scheduler.clock(RoundDuration::FiveMinutes);
    assert!(clock.running);
    assert_eq!(clock.remaining, 300);
    sleep(Duration::from_secs(3)).await;
    assert_eq!(scheduler.remaining(RoundDuration::FiveMinutes), 297);

    // The guessed round stays unconfirmed but open for betting
    let round = scheduler.round(RoundDuration::FiveMinutes).unwrap();
    assert_eq!(round.period, PeriodNumber(1));
    assert_eq!(round.status(), RoundStatus::Pending);
    assert!(scheduler.can_bet_on(RoundDuration::FiveMinutes));
    assert!(scheduler.can_bet_on(RoundDuration::OneMinute));
    assert_eq!(
        Metrics::count(
            &scheduler.metrics().resyncs,
            RoundDuration::FiveMinutes,
            "fallback"
        ),
        1
    );

    // A manual retry after recovery confirms the round
    mock.recover(MockCall::Timer(RoundDuration::FiveMinutes));
    mock.set_remaining(RoundDuration::FiveMinutes, 120);
    let seeded = scheduler.resync(RoundDuration::FiveMinutes).await.unwrap();
    assert_eq!(seeded.source, SeedSource::Authority);
    assert_eq!(seeded.seconds, 120);
    assert_eq!(
        scheduler.round(RoundDuration::FiveMinutes).unwrap().status(),
        RoundStatus::Active
    );
    assert!(scheduler.can_bet_on(RoundDuration::FiveMinutes));
}

#[tokio::test(start_paused = true)]
async fn test_bet_on_fallback_round() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    mock.fail(MockCall::Timer(duration));
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(scheduler.remaining(duration), 60);
    assert!(scheduler.can_bet_on(duration));
    let bet = scheduler.place_bet(Selection::Number(1), 10).await.unwrap();
    assert_eq!(bet.period, PeriodNumber(1));
    assert_eq!(scheduler.wallet().balance(CURRENCY), 990);

    // The ledger accepting the bet confirms the round
    assert_eq!(
        scheduler.round(duration).unwrap().status(),
        RoundStatus::Active
    );

    // Expiry settles it even though the timer is still down
    sleep(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(mock.latest_result_calls(duration), 1);
    assert!(scheduler.pending(duration).is_none());
    assert_eq!(scheduler.wallet().balance(CURRENCY), 990);
    let round = scheduler.round(duration).unwrap();
    assert_eq!(round.period, PeriodNumber(2));
    assert_eq!(round.status(), RoundStatus::Pending);
    assert_eq!(scheduler.remaining(duration), 60);
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_sees_initial_banners() {
    let mock = Mock::new();
    mock.fail(MockCall::Timer(RoundDuration::ThreeMinutes));
    let notifier = notify::Notifier::new(scheduler::NOTIFICATION_BACKLOG);
    let mut notifications = notifier.subscribe();
    let config = raw_config().validate().unwrap();
    let _scheduler = Scheduler::start_with_notifier(
        &config,
        mock.clone(),
        &mut Registry::default(),
        notifier,
    );

    expect_notification(&mut notifications, |n| {
        matches!(
            n,
            Notification::Failure {
                duration: RoundDuration::ThreeMinutes,
                action: Action::FetchTimer,
                ..
            }
        )
    })
    .await;
    let fallback = expect_notification(&mut notifications, |n| {
        matches!(n, Notification::Fallback { .. })
    })
    .await;
    assert_eq!(
        fallback,
        Notification::Fallback {
            duration: RoundDuration::ThreeMinutes,
            seconds: 180
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_timer_falls_back() {
    let mock = Mock::new();
    mock.fail(MockCall::MalformedTimer(RoundDuration::TenMinutes));
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(scheduler.remaining(RoundDuration::TenMinutes), 600);
    let round = scheduler.round(RoundDuration::TenMinutes).unwrap();
    assert_eq!(round.status(), RoundStatus::Pending);
    assert!(round.server_synced_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_resync_keeps_running_clock() {
    let mock = Mock::new();
    mock.set_remaining(RoundDuration::ThreeMinutes, 100);
    let scheduler = start(&mock);
    settle().await;
    sleep(Duration::from_secs(4)).await;

    mock.fail(MockCall::Timer(RoundDuration::ThreeMinutes));
    let seeded = scheduler.resync(RoundDuration::ThreeMinutes).await.unwrap();
    assert_eq!(seeded.source, SeedSource::Kept);
    assert_eq!(seeded.seconds, 96);
    assert_eq!(scheduler.remaining(RoundDuration::ThreeMinutes), 96);
}

#[tokio::test(start_paused = true)]
async fn test_zero_remaining_seeds_next_round() {
    let mock = Mock::new();
    mock.set_period(RoundDuration::FiveMinutes, PeriodNumber(40));
    mock.set_remaining(RoundDuration::FiveMinutes, 0);
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(scheduler.remaining(RoundDuration::FiveMinutes), 300);
    assert_eq!(
        scheduler.round(RoundDuration::FiveMinutes).unwrap().period,
        PeriodNumber(41)
    );
}

#[tokio::test(start_paused = true)]
async fn test_period_derived_from_history() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    mock.set_results(
        duration,
        vec![
            RoundOutcome::from_number(PeriodNumber(4), 7),
            RoundOutcome::from_number(PeriodNumber(3), 2),
        ],
    );
    mock.set_timer_response(duration, TimerResponse::seconds(40, None));
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(scheduler.history(duration, 1).items.len(), 2);
    assert_eq!(scheduler.round(duration).unwrap().period, PeriodNumber(5));
    assert_eq!(scheduler.remaining(duration), 40);
}

#[tokio::test(start_paused = true)]
async fn test_bet_accepted_with_time_left() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    mock.set_remaining(duration, 11);
    let scheduler = start(&mock);
    settle().await;

    scheduler.select(duration);
    assert!(scheduler.can_bet());
    let bet = scheduler
        .place_bet(Selection::Color(Color::Green), 50)
        .await
        .unwrap();
    assert_eq!(bet.period, PeriodNumber(1));
    assert_eq!(bet.stake, 50);
    assert!(bet.is_pending());

    // Debited once, and the ledger sees the pending bet
    assert_eq!(scheduler.wallet().balance(CURRENCY), 950);
    assert_eq!(mock.check_valid_bet(USER, duration).await.unwrap(), 1);
    assert_eq!(scheduler.pending(duration), Some(bet));

    // A second bet on the same round is refused locally
    assert_eq!(
        scheduler.place_bet(Selection::Number(4), 20).await,
        Err(Rejection::AlreadyPending)
    );
    assert!(!scheduler.can_bet());
    assert_eq!(mock.placed().len(), 1);
    assert_eq!(scheduler.wallet().balance(CURRENCY), 950);

    // Other durations are independent
    scheduler.select(RoundDuration::ThreeMinutes);
    scheduler
        .place_bet(Selection::Number(4), 20)
        .await
        .unwrap();
    assert_eq!(scheduler.wallet().balance(CURRENCY), 930);
}

#[tokio::test(start_paused = true)]
async fn test_bet_rejected_inside_grace_window() {
    let mock = Mock::new();
    mock.set_remaining(RoundDuration::OneMinute, 3);
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(
        scheduler.place_bet(Selection::Color(Color::Red), 50).await,
        Err(Rejection::RoundClosed)
    );
    assert_eq!(scheduler.wallet().balance(CURRENCY), 1_000);
    assert!(mock.placed().is_empty());
    assert!(scheduler.pending(RoundDuration::OneMinute).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_gate_closes_at_grace_boundary() {
    let mock = Mock::new();
    mock.set_remaining(RoundDuration::OneMinute, 12);
    let scheduler = start(&mock);
    settle().await;

    assert!(scheduler.can_bet());
    sleep(Duration::from_secs(2)).await;
    assert_eq!(scheduler.remaining(RoundDuration::OneMinute), 10);
    assert!(scheduler.can_bet());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.remaining(RoundDuration::OneMinute), 9);
    assert!(!scheduler.can_bet());
}

#[tokio::test(start_paused = true)]
async fn test_stake_out_of_range() {
    let mock = Mock::new();
    let scheduler = start(&mock);
    settle().await;

    assert_eq!(
        scheduler.place_bet(Selection::Number(1), 5).await,
        Err(Rejection::StakeOutOfRange {
            min: 10,
            max: 1_000,
            stake: 5
        })
    );
    assert!(matches!(
        scheduler.place_bet(Selection::Number(1), 5_000).await,
        Err(Rejection::StakeOutOfRange { .. })
    ));
    assert!(mock.placed().is_empty());
    assert_eq!(
        Metrics::count(
            &scheduler.metrics().bets,
            RoundDuration::OneMinute,
            "rejected"
        ),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_pending_bet_known_only_to_ledger() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    let scheduler = start(&mock);
    settle().await;

    // Placed from another session
    mock.place_bet(PlaceBetRequest::new(
        USER.to_string(),
        duration,
        PeriodNumber(1),
        &Selection::Number(8),
        10,
    ))
    .await
    .unwrap();

    assert!(scheduler.can_bet());
    assert_eq!(
        scheduler.place_bet(Selection::Number(3), 10).await,
        Err(Rejection::AlreadyPending)
    );
    assert_eq!(scheduler.wallet().balance(CURRENCY), 1_000);
    assert_eq!(mock.placed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ledger_failures() {
    let mock = Mock::new();
    let scheduler = start(&mock);
    let mut notifications = scheduler.subscribe();
    settle().await;

    mock.fail(MockCall::PlaceBet);
    assert!(matches!(
        scheduler.place_bet(Selection::Number(3), 10).await,
        Err(Rejection::LedgerUnreachable(_))
    ));
    expect_notification(&mut notifications, |n| {
        matches!(
            n,
            Notification::Failure {
                action: Action::PlaceBet,
                ..
            }
        )
    })
    .await;
    mock.recover(MockCall::PlaceBet);

    mock.fail(MockCall::CheckValidBet);
    assert!(matches!(
        scheduler.place_bet(Selection::Number(3), 10).await,
        Err(Rejection::LedgerUnreachable(_))
    ));
    mock.recover(MockCall::CheckValidBet);

    mock.fail(MockCall::RefuseBet);
    assert!(matches!(
        scheduler.place_bet(Selection::Number(3), 10).await,
        Err(Rejection::Refused(_))
    ));
    mock.recover(MockCall::RefuseBet);

    // Nothing was debited
    assert_eq!(scheduler.wallet().balance(CURRENCY), 1_000);
    assert!(scheduler.pending(RoundDuration::OneMinute).is_none());

    // The same bet goes through once the ledger is back
    scheduler.place_bet(Selection::Number(3), 10).await.unwrap();
    assert_eq!(scheduler.wallet().balance(CURRENCY), 990);
}

#[tokio::test(start_paused = true)]
async fn test_win_is_credited() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    mock.set_remaining(duration, 20);
    mock.script(duration, PeriodNumber(1), 3);
    let scheduler = start(&mock);
    let mut notifications = scheduler.subscribe();
    settle().await;

    scheduler
        .place_bet(Selection::Color(Color::Green), 50)
        .await
        .unwrap();
    assert_eq!(scheduler.wallet().balance(CURRENCY), 950);

    let won = expect_notification(&mut notifications, |n| {
        matches!(n, Notification::Won { .. })
    })
    .await;
    assert_eq!(
        won,
        Notification::Won {
            duration,
            period: PeriodNumber(1),
            payout: 100
        }
    );
    settle().await;
    assert_eq!(scheduler.wallet().balance(CURRENCY), 1_050);
    assert!(scheduler.pending(duration).is_none());
    assert_eq!(mock.pending(USER, duration), 0);
    assert_eq!(scheduler.round(duration).unwrap().period, PeriodNumber(2));
}

#[tokio::test(start_paused = true)]
async fn test_loss_is_not_credited() {
    let mock = Mock::new();
    let duration = RoundDuration::ThreeMinutes;
    mock.set_remaining(duration, 15);
    mock.script(duration, PeriodNumber(1), 4);
    let scheduler = start(&mock);
    let mut notifications = scheduler.subscribe();
    settle().await;

    scheduler.select(duration);
    scheduler
        .place_bet(Selection::Color(Color::Green), 100)
        .await
        .unwrap();

    let lost = expect_notification(&mut notifications, |n| {
        matches!(n, Notification::Lost { .. })
    })
    .await;
    assert_eq!(
        lost,
        Notification::Lost {
            duration,
            period: PeriodNumber(1),
            stake: 100
        }
    );
    assert_eq!(scheduler.wallet().balance(CURRENCY), 900);
    assert!(scheduler.pending(duration).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_settlement_is_ignored() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    mock.set_remaining(duration, 30);
    let scheduler = start(&mock);
    settle().await;

    // Hold the first pass in its follow-up resync
    mock.set_timer_delay(Duration::from_secs(2));
    let resolver = scheduler.resolver();
    let (first, second) = tokio::join!(
        resolver.on_expired(duration),
        resolver.on_expired(duration)
    );

    assert!(matches!(
        first,
        Settlement::Settled {
            period: PeriodNumber(1),
            bet: None,
            ..
        }
    ));
    assert_eq!(second, Settlement::Duplicate);
    assert_eq!(mock.latest_result_calls(duration), 1);
    assert_eq!(scheduler.history(duration, 1).items.len(), 1);
    assert_eq!(
        Metrics::count(&scheduler.metrics().settlements, duration, "duplicate"),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_round_is_not_settled() {
    let mock = Mock::new();
    let duration = RoundDuration::TenMinutes;
    mock.fail(MockCall::Timer(duration));
    let scheduler = start(&mock);
    settle().await;

    // Nobody bet on the guessed round, so there is nothing to settle
    mock.recover(MockCall::Timer(duration));
    assert_eq!(
        scheduler.resolver().on_expired(duration).await,
        Settlement::Skipped
    );
    assert_eq!(mock.latest_result_calls(duration), 0);

    // The follow-up resync confirmed a round
    assert_eq!(
        scheduler.round(duration).unwrap().status(),
        RoundStatus::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resync_is_skipped() {
    let mock = Mock::new();
    let scheduler = start(&mock);
    settle().await;

    mock.set_timer_delay(Duration::from_secs(1));
    let duration = RoundDuration::ThreeMinutes;
    let (first, second) = tokio::join!(scheduler.resync(duration), scheduler.resync(duration));
    assert_eq!(first.unwrap().source, SeedSource::Authority);
    assert!(matches!(second, Err(ResyncError::InFlight)));

    // Other durations are not blocked
    let (three, five) = tokio::join!(
        scheduler.resync(duration),
        scheduler.resync(RoundDuration::FiveMinutes)
    );
    assert!(three.is_ok());
    assert!(five.is_ok());
    assert_eq!(
        Metrics::count(&scheduler.metrics().resyncs, duration, "skipped"),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_settlement_failure_is_isolated() {
    let mock = Mock::new();
    mock.set_remaining(RoundDuration::OneMinute, 5);
    mock.set_remaining(RoundDuration::ThreeMinutes, 8);
    mock.fail(MockCall::LatestResult(RoundDuration::OneMinute));
    let scheduler = start(&mock);
    let mut notifications = scheduler.subscribe();
    settle().await;

    sleep(Duration::from_millis(8_500)).await;
    expect_notification(&mut notifications, |n| {
        matches!(
            n,
            Notification::Failure {
                duration: RoundDuration::OneMinute,
                action: Action::FetchResults,
                ..
            }
        )
    })
    .await;

    // The failed duration moved on to its next round
    let round = scheduler.round(RoundDuration::OneMinute).unwrap();
    assert_eq!(round.period, PeriodNumber(2));
    assert_eq!(scheduler.remaining(RoundDuration::OneMinute), 57);
    assert_eq!(
        Metrics::count(
            &scheduler.metrics().settlements,
            RoundDuration::OneMinute,
            "failed"
        ),
        1
    );

    // The other duration settled normally
    assert_eq!(mock.latest_result_calls(RoundDuration::ThreeMinutes), 1);
    assert_eq!(
        scheduler.history(RoundDuration::ThreeMinutes, 1).items.len(),
        1
    );
    assert_eq!(
        scheduler
            .round(RoundDuration::ThreeMinutes)
            .unwrap()
            .period,
        PeriodNumber(2)
    );
}

#[tokio::test(start_paused = true)]
async fn test_bet_history_failure_still_advances() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    mock.set_remaining(duration, 15);
    mock.script(duration, PeriodNumber(1), 7);
    let scheduler = start(&mock);
    let mut notifications = scheduler.subscribe();
    settle().await;

    scheduler.place_bet(Selection::Number(7), 10).await.unwrap();
    mock.fail(MockCall::BetHistory);

    let settled = scheduler.resolver().on_expired(duration).await;
    assert!(matches!(settled, Settlement::Settled { bet: None, .. }));
    expect_notification(&mut notifications, |n| {
        matches!(
            n,
            Notification::Failure {
                action: Action::FetchBetHistory,
                ..
            }
        )
    })
    .await;

    // No credit without the ledger's verdict, but the round still closed
    assert_eq!(scheduler.wallet().balance(CURRENCY), 990);
    assert!(scheduler.pending(duration).is_none());
    assert_eq!(scheduler.round(duration).unwrap().period, PeriodNumber(2));
}

#[tokio::test(start_paused = true)]
async fn test_reload_history() {
    let mock = Mock::new();
    let duration = RoundDuration::FiveMinutes;
    let scheduler = start(&mock);
    settle().await;
    assert!(scheduler.history(duration, 1).items.is_empty());

    mock.set_results(
        duration,
        (1..=12)
            .map(|period| RoundOutcome::from_number(PeriodNumber(period), 1))
            .collect(),
    );
    assert!(scheduler.reload_history(duration).await);
    let page = scheduler.history(duration, 2);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.len(), 2);

    mock.fail(MockCall::Results(duration));
    assert!(!scheduler.reload_history(duration).await);
    assert_eq!(scheduler.history(duration, 1).items.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_clocks() {
    let mock = Mock::new();
    let mut scheduler = start(&mock);
    settle().await;
    sleep(Duration::from_secs(2)).await;

    scheduler.shutdown().await;
    let remaining = scheduler.remaining(RoundDuration::OneMinute);
    assert_eq!(remaining, 58);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.remaining(RoundDuration::OneMinute), remaining);

    assert!(matches!(
        scheduler.resync(RoundDuration::OneMinute).await,
        Err(ResyncError::Clock(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_number_hit_is_credited() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    let scheduler = start(&mock);
    settle().await;

    scheduler.place_bet(Selection::Number(0), 10).await.unwrap();
    let settled = scheduler.resolver().on_expired(duration).await;

    // Default draw is 0, so the bet won
    assert!(matches!(
        settled,
        Settlement::Settled {
            bet: Some(BetOutcome::Won),
            ..
        }
    ));
    assert_eq!(scheduler.wallet().balance(CURRENCY), 1_010);
}

#[tokio::test(start_paused = true)]
async fn test_unattributed_record_is_ignored() {
    let mock = Mock::new();
    let duration = RoundDuration::OneMinute;
    let scheduler = start(&mock);
    settle().await;

    // A win on the same period number of some other duration
    mock.set_bet_record(BetRecord {
        period_number: PeriodNumber(1),
        duration: None,
        status: BetOutcome::Won,
        amount: 10,
        amount_received: 20,
    });
    let settled = scheduler.resolver().on_expired(duration).await;
    assert!(matches!(settled, Settlement::Settled { bet: None, .. }));
    assert_eq!(scheduler.wallet().balance(CURRENCY), 1_000);
}
