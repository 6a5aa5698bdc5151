use super::ClockState;
use roundplay_types::RoundDuration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

pub enum Message {
    /// Seed the countdown and start ticking.
    Start {
        seconds: u64,
        response: oneshot::Sender<ClockState>,
    },
    Stop,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("clock mailbox closed")]
    Closed,
    #[error("clock request canceled")]
    Canceled,
}

/// Handle to a clock actor.
#[derive(Clone)]
pub struct Mailbox {
    duration: RoundDuration,
    sender: mpsc::Sender<Message>,
    state: watch::Receiver<ClockState>,
}

impl Mailbox {
    pub(super) fn new(
        duration: RoundDuration,
        sender: mpsc::Sender<Message>,
        state: watch::Receiver<ClockState>,
    ) -> Self {
        Self {
            duration,
            sender,
            state,
        }
    }

    pub fn duration(&self) -> RoundDuration {
        self.duration
    }

    /// Reseeds the clock, returning its state once applied.
    pub async fn start(&self, seconds: u64) -> Result<ClockState, MailboxError> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Message::Start { seconds, response })
            .await
            .map_err(|_| MailboxError::Closed)?;
        receiver.await.map_err(|_| MailboxError::Canceled)
    }

    pub async fn stop(&self) -> Result<(), MailboxError> {
        self.sender
            .send(Message::Stop)
            .await
            .map_err(|_| MailboxError::Closed)
    }

    pub fn state(&self) -> ClockState {
        *self.state.borrow()
    }

    pub fn remaining(&self) -> u64 {
        self.state.borrow().remaining
    }
}
