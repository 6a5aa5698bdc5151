//! The coordinating object.
//!
//! A [Scheduler] owns one clock actor per [RoundDuration]. Expiry events from
//! all four clocks arrive on a single channel and each is settled in its own
//! task, so a slow or failing settlement for one duration never holds up the
//! others. All four clocks tick regardless of which duration is selected.

use crate::{
    authority::RoundAuthority,
    clock::{self, ClockState, Expired},
    gate::BetGate,
    history::{Page, RoundHistoryCache},
    lane::Lanes,
    metrics::Metrics,
    notify::{Notification, Notifier},
    settle::SettlementResolver,
    submit::{BetSubmitter, Rejection},
    sync::{ResyncError, Seeded, Synchronizer},
    wallet::Wallet,
    ValidatedConfig,
};
use prometheus_client::registry::Registry;
use roundplay_types::{Bet, Round, RoundDuration, Selection};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinSet,
};
use tracing::{debug, error, info};

/// Capacity of the notification channel.
pub const NOTIFICATION_BACKLOG: usize = 256;

pub struct Scheduler<A: RoundAuthority> {
    authority: A,
    user: String,
    lanes: Lanes,
    selected: watch::Sender<RoundDuration>,

    gate: BetGate<A>,
    submitter: BetSubmitter<A>,
    synchronizer: Synchronizer<A>,
    resolver: SettlementResolver<A>,
    history: RoundHistoryCache,
    wallet: Wallet,
    notifier: Notifier,
    metrics: Metrics,

    tasks: JoinSet<()>,
}

impl<A: RoundAuthority> Scheduler<A> {
    /// Starts the clocks and the initial synchronization of every duration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &ValidatedConfig, authority: A, registry: &mut Registry) -> Self {
        Self::start_with_notifier(
            config,
            authority,
            registry,
            Notifier::new(NOTIFICATION_BACKLOG),
        )
    }

    /// Like [Scheduler::start], publishing on `notifier`. Subscribing to it
    /// first guarantees the banners of the initial synchronization are seen.
    pub fn start_with_notifier(
        config: &ValidatedConfig,
        authority: A,
        registry: &mut Registry,
        notifier: Notifier,
    ) -> Self {
        let metrics = Metrics::register(registry);
        let history = RoundHistoryCache::new(config.history_capacity, config.history_page_size);
        let wallet = Wallet::new(&config.currency, config.initial_balance);
        let mut tasks = JoinSet::new();

        // Start clocks
        let (expired_sender, expired) = mpsc::channel(config.mailbox_size);
        let mut mailboxes = Vec::with_capacity(RoundDuration::ALL.len());
        for duration in RoundDuration::ALL {
            let (actor, mailbox) =
                clock::Actor::new(duration, config.mailbox_size, expired_sender.clone());
            tasks.spawn(actor.run());
            mailboxes.push(mailbox);
        }
        drop(expired_sender);
        let lanes = Lanes::new(mailboxes);

        // Wire components
        let synchronizer = Synchronizer::new(
            authority.clone(),
            lanes.clone(),
            history.clone(),
            notifier.clone(),
            metrics.clone(),
        );
        let gate = BetGate::new(authority.clone(), lanes.clone(), config.grace_window);
        let submitter = BetSubmitter::new(
            authority.clone(),
            gate.clone(),
            lanes.clone(),
            wallet.clone(),
            config.currency.clone(),
            config.stake_limits,
            notifier.clone(),
            metrics.clone(),
        );
        let resolver = SettlementResolver::new(
            authority.clone(),
            lanes.clone(),
            synchronizer.clone(),
            history.clone(),
            wallet.clone(),
            config.user_id.clone(),
            config.currency.clone(),
            notifier.clone(),
            metrics.clone(),
        );

        tasks.spawn(dispatch(expired, resolver.clone(), metrics.clone()));

        // Durations synchronize independently and in parallel
        for duration in RoundDuration::ALL {
            let authority = authority.clone();
            let history = history.clone();
            let notifier = notifier.clone();
            let synchronizer = synchronizer.clone();
            tasks.spawn(async move {
                history.load(&authority, &notifier, duration).await;
                if let Err(err) = synchronizer.resync(duration).await {
                    debug!(%duration, %err, "initial resync skipped");
                }
            });
        }
        info!(user = config.user_id, "scheduler started");

        let (selected, _) = watch::channel(RoundDuration::OneMinute);
        Self {
            authority,
            user: config.user_id.clone(),
            lanes,
            selected,
            gate,
            submitter,
            synchronizer,
            resolver,
            history,
            wallet,
            notifier,
            metrics,
            tasks,
        }
    }

    /// Changes which duration is rendered and bet on. Clocks are unaffected.
    pub fn select(&self, duration: RoundDuration) {
        self.selected.send_replace(duration);
    }

    pub fn selected(&self) -> RoundDuration {
        *self.selected.borrow()
    }

    pub fn watch_selected(&self) -> watch::Receiver<RoundDuration> {
        self.selected.subscribe()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn remaining(&self, duration: RoundDuration) -> u64 {
        self.lanes.get(duration).remaining()
    }

    pub fn clock(&self, duration: RoundDuration) -> ClockState {
        self.lanes.get(duration).clock().state()
    }

    pub fn round(&self, duration: RoundDuration) -> Option<Round> {
        self.lanes.get(duration).round()
    }

    pub fn pending(&self, duration: RoundDuration) -> Option<Bet> {
        self.lanes.get(duration).pending()
    }

    /// Whether the selected duration accepts bets right now.
    pub fn can_bet(&self) -> bool {
        self.gate.can_bet(self.selected())
    }

    pub fn can_bet_on(&self, duration: RoundDuration) -> bool {
        self.gate.can_bet(duration)
    }

    /// Bets on the open round of the selected duration.
    pub async fn place_bet(&self, selection: Selection, stake: u64) -> Result<Bet, Rejection> {
        self.submitter
            .submit_open(&self.user, self.selected(), selection, stake)
            .await
    }

    /// Manually re-reads the authority's timer for `duration`.
    pub async fn resync(&self, duration: RoundDuration) -> Result<Seeded, ResyncError> {
        self.synchronizer.resync(duration).await
    }

    /// Manually reloads the outcome history for `duration`.
    pub async fn reload_history(&self, duration: RoundDuration) -> bool {
        self.history
            .load(&self.authority, &self.notifier, duration)
            .await
    }

    pub fn history(&self, duration: RoundDuration, page: usize) -> Page {
        self.history.page(duration, page)
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn gate(&self) -> &BetGate<A> {
        &self.gate
    }

    pub fn submitter(&self) -> &BetSubmitter<A> {
        &self.submitter
    }

    pub fn synchronizer(&self) -> &Synchronizer<A> {
        &self.synchronizer
    }

    pub fn resolver(&self) -> &SettlementResolver<A> {
        &self.resolver
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stops all clocks and abandons in-flight resyncs and settlements.
    pub async fn shutdown(&mut self) {
        self.tasks.abort_all();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                if err.is_panic() {
                    error!(?err, "scheduler task panicked");
                }
            }
        }
        info!("scheduler stopped");
    }
}

/// Runs the resolver once per expiry, each in its own task.
async fn dispatch<A: RoundAuthority>(
    mut expired: mpsc::Receiver<Expired>,
    resolver: SettlementResolver<A>,
    metrics: Metrics,
) {
    // Dropping the set (on abort) cancels in-flight settlements
    let mut settlements = JoinSet::new();
    loop {
        tokio::select! {
            event = expired.recv() => {
                let Some(event) = event else {
                    debug!("all clocks stopped");
                    break;
                };
                metrics.expired(event.duration);
                let resolver = resolver.clone();
                settlements.spawn(async move {
                    resolver.on_expired(event.duration).await;
                });
            }
            Some(result) = settlements.join_next(), if !settlements.is_empty() => {
                if let Err(err) = result {
                    if err.is_panic() {
                        error!(?err, "settlement task panicked");
                    }
                }
            }
        }
    }
}
