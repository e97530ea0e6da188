//! Fire-and-forget notifications with repeat suppression.
//!
//! [`Notifier::notify`] never waits on the network: messages that pass the
//! throttle are queued for a background worker that owns the channel.

mod channel;
mod commands;
mod throttle;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use channel::{LogChannel, NotificationChannel, TelegramChannel};
pub use commands::{BotCommand, TelegramCommandListener};
use throttle::NotificationThrottle;

#[derive(Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<String>,
    throttle: Arc<Mutex<NotificationThrottle>>,
}

impl Notifier {
    /// Create a notifier and spawn its delivery worker on the current runtime.
    ///
    /// The worker drains the queue and exits once every clone of the notifier
    /// has been dropped; await its handle to flush pending messages.
    pub fn spawn(
        channel: Arc<dyn NotificationChannel>,
        cooldown_secs: u64,
    ) -> (Self, JoinHandle<()>) {
        let (notifier, receiver) = Self::queue(cooldown_secs);
        let worker = tokio::spawn(delivery_worker(channel, receiver));
        (notifier, worker)
    }

    /// Create a notifier whose queue is drained by the caller.
    pub fn queue(cooldown_secs: u64) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let notifier = Self {
            sender,
            throttle: Arc::new(Mutex::new(NotificationThrottle::new(cooldown_secs))),
        };
        (notifier, receiver)
    }

    /// Queue a message unless an identical one was sent within the cooldown.
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();

        let allowed = match self.throttle.lock() {
            Ok(mut throttle) => throttle.should_send(&message),
            Err(poisoned) => poisoned.into_inner().should_send(&message),
        };
        if !allowed {
            debug!(message = %message, "Notification throttled");
            return;
        }

        if self.sender.send(message).is_err() {
            warn!("Notification worker has shut down");
        }
    }
}

async fn delivery_worker(
    channel: Arc<dyn NotificationChannel>,
    mut receiver: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = receiver.recv().await {
        if let Err(e) = channel.send(&text).await {
            error!(error = %e, "Failed to deliver notification");
        }
    }
    debug!("Notification worker stopped");
}
