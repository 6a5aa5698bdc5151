use super::{ClockState, Expired, Mailbox, Message, RoundClock};
use roundplay_types::RoundDuration;
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

const TICK: Duration = Duration::from_secs(1);

pub struct Actor {
    clock: RoundClock,
    mailbox: mpsc::Receiver<Message>,
    state: watch::Sender<ClockState>,
    expired: mpsc::Sender<Expired>,
}

impl Actor {
    pub fn new(
        duration: RoundDuration,
        mailbox_size: usize,
        expired: mpsc::Sender<Expired>,
    ) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(mailbox_size);
        let (state, watcher) = watch::channel(ClockState::default());
        (
            Self {
                clock: RoundClock::new(duration),
                mailbox,
                state,
                expired,
            },
            Mailbox::new(duration, sender, watcher),
        )
    }

    pub async fn run(mut self) {
        let duration = self.clock.duration();
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                now = ticker.tick() => {
                    let expired = self.clock.tick(now);
                    self.publish();
                    let Some(expired) = expired else {
                        continue;
                    };
                    debug!(%duration, seeding = expired.seeding, "round clock expired");
                    if self.expired.send(expired).await.is_err() {
                        warn!(%duration, "expiry receiver dropped");
                        break;
                    }
                }
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        debug!(%duration, "clock mailbox closed");
                        break;
                    };
                    match message {
                        Message::Start { seconds, response } => {
                            self.clock.start(seconds);

                            // Count whole seconds from the moment of seeding
                            ticker.reset();
                            self.publish();
                            trace!(%duration, seconds, "round clock seeded");
                            let _ = response.send(self.clock.state());
                        }
                        Message::Stop => {
                            self.clock.stop();
                            self.publish();
                        }
                    }
                }
            }
        }
        info!(%duration, "round clock stopped");
    }

    fn publish(&self) {
        let state = self.clock.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
