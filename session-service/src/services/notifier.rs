//! Outbound notification queue.
//!
//! The session service never talks SMTP directly. It enqueues a
//! [`Notification`] and a single [`MailWorker`] drains the bounded queue,
//! retrying each delivery with exponential backoff.
//!
//! Flows whose mail must go out reserve a [`MailSlot`] before writing
//! anything, so a full queue is reported before any row is committed.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::email::Mailer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub message_id: String,
}

impl Notification {
    pub fn new(recipient: &str, subject: &str, body: String) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body,
            message_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification queue full")]
    QueueFull,

    #[error("Notification queue closed")]
    Closed,
}

/// A held place in the queue. Sending on it cannot fail; dropping it
/// unused gives the place back.
pub trait MailSlot: Send {
    fn send(self: Box<Self>, notification: Notification);
}

/// Accepts messages for asynchronous delivery. Never blocks.
pub trait Notifier: Send + Sync {
    fn reserve(&self) -> Result<Box<dyn MailSlot>, NotifyError>;

    fn enqueue(&self, notification: Notification) -> Result<(), NotifyError> {
        self.reserve()?.send(notification);
        Ok(())
    }
}

/// Producer half of the bounded mail queue.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<Notification>,
}

impl MailQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for MailQueue {
    fn reserve(&self) -> Result<Box<dyn MailSlot>, NotifyError> {
        let permit = self.tx.clone().try_reserve_owned().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })?;
        Ok(Box::new(permit))
    }
}

impl MailSlot for mpsc::OwnedPermit<Notification> {
    fn send(self: Box<Self>, notification: Notification) {
        mpsc::OwnedPermit::send(*self, notification);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_elapsed,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Single consumer of the mail queue.
pub struct MailWorker {
    rx: mpsc::Receiver<Notification>,
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
}

impl MailWorker {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        mailer: Arc<dyn Mailer>,
        retry: RetryPolicy,
    ) -> Self {
        Self { rx, mailer, retry }
    }

    /// Deliver until every producer is dropped.
    pub async fn run(mut self) {
        tracing::info!("Mail worker started");

        while let Some(notification) = self.rx.recv().await {
            self.deliver(notification).await;
        }

        tracing::info!("Mail queue closed, mail worker exiting");
    }

    async fn deliver(&self, notification: Notification) {
        let mailer = self.mailer.clone();
        let result = retry(self.retry.backoff(), || async {
            mailer.send(&notification).await.map_err(|e| {
                tracing::warn!(
                    error = %e,
                    message_id = %notification.message_id,
                    "Mail delivery attempt failed"
                );
                backoff::Error::transient(e)
            })
        })
        .await;

        match result {
            Ok(()) => tracing::info!(
                message_id = %notification.message_id,
                subject = %notification.subject,
                "Mail delivered"
            ),
            Err(e) => tracing::error!(
                error = %e,
                message_id = %notification.message_id,
                recipient = %notification.recipient,
                "Mail delivery abandoned after retries"
            ),
        }
    }
}

/// Records every enqueued notification.
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail_with: Mutex<Option<NotifyError>>,
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_with: Mutex::new(None),
        }
    }

    /// Rejects every message as if the queue were full.
    pub fn failing() -> Self {
        let notifier = Self::new();
        notifier.set_failure(Some(NotifyError::QueueFull));
        notifier
    }

    /// `None` makes the queue accept messages again.
    pub fn set_failure(&self, failure: Option<NotifyError>) {
        if let Ok(mut fail_with) = self.fail_with.lock() {
            *fail_with = failure;
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .collect()
    }
}

struct RecordingSlot(Arc<Mutex<Vec<Notification>>>);

impl MailSlot for RecordingSlot {
    fn send(self: Box<Self>, notification: Notification) {
        if let Ok(mut sent) = self.0.lock() {
            sent.push(notification);
        }
    }
}

impl Notifier for MockNotifier {
    fn reserve(&self) -> Result<Box<dyn MailSlot>, NotifyError> {
        let failure = self.fail_with.lock().map_err(|_| NotifyError::Closed)?.clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(Box::new(RecordingSlot(self.sent.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::MockMailer;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_queue_full() {
        let (queue, _rx) = MailQueue::new(1);
        assert!(queue
            .enqueue(Notification::new("a@x.com", "one", String::new()))
            .is_ok());
        assert_eq!(
            queue.enqueue(Notification::new("a@x.com", "two", String::new())),
            Err(NotifyError::QueueFull)
        );
    }

    #[test]
    fn test_queue_closed() {
        let (queue, rx) = MailQueue::new(4);
        drop(rx);
        assert_eq!(
            queue.enqueue(Notification::new("a@x.com", "s", String::new())),
            Err(NotifyError::Closed)
        );
    }

    #[tokio::test]
    async fn test_reserved_slot_holds_capacity_until_used() {
        let (queue, mut rx) = MailQueue::new(1);

        let slot = queue.reserve().unwrap();
        assert_eq!(
            queue.enqueue(Notification::new("a@x.com", "other", String::new())),
            Err(NotifyError::QueueFull)
        );

        slot.send(Notification::new("a@x.com", "held", String::new()));
        assert_eq!(rx.recv().await.unwrap().subject, "held");

        // An unused slot gives its place back when dropped.
        drop(queue.reserve().unwrap());
        assert!(queue
            .enqueue(Notification::new("a@x.com", "after", String::new()))
            .is_ok());
    }

    #[tokio::test]
    async fn test_worker_retries_until_success() {
        let mailer = Arc::new(MockMailer::failing_times(2));
        let (queue, rx) = MailQueue::new(4);
        let worker = MailWorker::new(rx, mailer.clone(), fast_retry());

        queue
            .enqueue(Notification::new("a@x.com", "Welcome", "hi".to_string()))
            .unwrap();
        drop(queue);
        worker.run().await;

        assert_eq!(mailer.attempts(), 3);
        let delivered = mailer.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].subject, "Welcome");
    }

    #[tokio::test]
    async fn test_worker_gives_up_and_continues() {
        let mailer = Arc::new(MockMailer::failing_times(usize::MAX));
        let (queue, rx) = MailQueue::new(4);
        let retry = RetryPolicy {
            initial_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_millis(50),
        };

        queue
            .enqueue(Notification::new("a@x.com", "one", String::new()))
            .unwrap();
        queue
            .enqueue(Notification::new("b@x.com", "two", String::new()))
            .unwrap();
        drop(queue);
        MailWorker::new(rx, mailer.clone(), retry).run().await;

        assert!(mailer.delivered().is_empty());
        assert!(mailer.attempts() >= 2);
    }

    #[test]
    fn test_mock_notifier() {
        let notifier = MockNotifier::new();
        notifier
            .enqueue(Notification::new("a@x.com", "s", String::new()))
            .unwrap();
        assert_eq!(notifier.sent_to("a@x.com").len(), 1);

        let failing = MockNotifier::failing();
        assert_eq!(
            failing.enqueue(Notification::new("a@x.com", "s", String::new())),
            Err(NotifyError::QueueFull)
        );
        assert!(failing.reserve().is_err());

        failing.set_failure(None);
        failing.reserve().unwrap().send(Notification::new("b@x.com", "s", String::new()));
        assert_eq!(failing.sent_to("b@x.com").len(), 1);
    }
}
