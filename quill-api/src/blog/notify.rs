//! Delivery of new-post notifications.
//!
//! Posting only queues messages. A separate dispatcher task hands them to a
//! [`Mailer`], so a failing transport never affects the post itself.

use async_trait::async_trait;
use quill_common::model::{notification::Notification, user::UserEmail};
use std::{fmt::Debug, sync::Arc};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
#[error("Delivering notification to {to} failed: {reason}")]
pub struct MailError {
    pub to: String,
    pub reason: String,
}

/// Transport for notifications.
#[async_trait]
pub trait Mailer: Send + Sync + Debug {
    async fn send(&self, notification: &Notification) -> Result<(), MailError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Clone, Debug)]
pub struct LogMailer {
    from: UserEmail,
}

impl LogMailer {
    #[must_use]
    pub fn new(from: UserEmail) -> Self {
        Self { from }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, notification: &Notification) -> Result<(), MailError> {
        info!(
            from = self.from.get(),
            to = notification.to.get(),
            subject = %notification.subject,
            message = %notification.message,
            "Sending notification"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Notifier {
    sender: UnboundedSender<Notification>,
}

impl Notifier {
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queues `notification`. Returns `false` if the dispatcher is gone.
    pub fn notify(&self, notification: Notification) -> bool {
        match self.sender.send(notification) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    recipient = %err.0.recipient,
                    post = %err.0.post,
                    "Notification dispatcher has stopped, dropping notification"
                );
                false
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers queued notifications until `shutdown` fires or every
/// [`Notifier`] is dropped. Messages already queued at shutdown are still
/// delivered.
pub async fn run_dispatcher(
    mut receiver: UnboundedReceiver<Notification>,
    mailer: Arc<dyn Mailer>,
    shutdown: CancellationToken,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    loop {
        let notification = tokio::select! {
            () = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(notification) => notification,
                None => break,
            },
        };
        deliver(mailer.as_ref(), &notification, &mut summary).await;
    }

    receiver.close();
    while let Some(notification) = receiver.recv().await {
        deliver(mailer.as_ref(), &notification, &mut summary).await;
    }

    debug!(?summary, "Notification dispatcher stopped");
    summary
}

async fn deliver(mailer: &dyn Mailer, notification: &Notification, summary: &mut DispatchSummary) {
    match mailer.send(notification).await {
        Ok(()) => summary.delivered += 1,
        Err(err) => {
            warn!(error = %err, post = %notification.post, "Notification was not delivered");
            summary.failed += 1;
        }
    }
}
