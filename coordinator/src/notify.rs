use roundplay_types::{PeriodNumber, RoundDuration};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{error, warn};

/// The action a failure banner refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    FetchTimer,
    FetchResults,
    FetchBetHistory,
    CheckPendingBet,
    PlaceBet,
}

impl Action {
    pub fn banner(self) -> &'static str {
        match self {
            Action::FetchTimer => "Failed to fetch timer",
            Action::FetchResults => "Failed to fetch results",
            Action::FetchBetHistory => "Failed to fetch bet history",
            Action::CheckPendingBet => "Failed to check pending bets",
            Action::PlaceBet => "Failed to place bet",
        }
    }
}

/// Something the user should see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Won {
        duration: RoundDuration,
        period: PeriodNumber,
        payout: u64,
    },
    Lost {
        duration: RoundDuration,
        period: PeriodNumber,
        stake: u64,
    },
    /// A duration-scoped failure. Retrying is left to the user.
    Failure {
        duration: RoundDuration,
        action: Action,
        reason: String,
    },
    /// The clock was seeded with a default because the authority could not
    /// be read.
    Fallback {
        duration: RoundDuration,
        seconds: u64,
    },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Won {
                duration,
                period,
                payout,
            } => write!(f, "[{duration}] round {period}: you won {payout}"),
            Notification::Lost {
                duration,
                period,
                stake,
            } => write!(f, "[{duration}] round {period}: you lost {stake}"),
            Notification::Failure {
                duration,
                action,
                reason,
            } => write!(f, "[{duration}] {} ({reason})", action.banner()),
            Notification::Fallback { duration, seconds } => {
                write!(f, "[{duration}] timer unavailable, assuming {seconds}s")
            }
        }
    }
}

/// Fan-out of [Notification]s to any number of subscribers.
///
/// Publishing never fails: with no subscribers the notification is dropped.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }

    /// Logs and publishes a failure banner.
    pub fn failure(&self, duration: RoundDuration, action: Action, reason: impl fmt::Display) {
        let reason = reason.to_string();
        error!(%duration, ?action, %reason, "{}", action.banner());
        self.publish(Notification::Failure {
            duration,
            action,
            reason,
        });
    }

    pub fn fallback(&self, duration: RoundDuration, seconds: u64) {
        warn!(%duration, seconds, "seeding clock with fallback");
        self.publish(Notification::Fallback { duration, seconds });
    }
}
