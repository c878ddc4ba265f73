// src/workers/dispatcher.rs

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::services::notifications::{self, Channel, NotificationStatus};

#[derive(Debug, thiserror::Error)]
#[error("send failed: {0}")]
pub struct SendError(pub String);

/// Outbound delivery. Returns the provider's message id.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, channel: Channel, message: &str) -> Result<String, SendError>;
}

/// Writes messages to the log instead of a real provider.
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    async fn send(&self, channel: Channel, message: &str) -> Result<String, SendError> {
        info!(channel = channel.as_str(), %message, "outbound message");
        Ok(format!("log-{}", Uuid::new_v4()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    /// Failed this round but left PENDING for a retry.
    pub failed: usize,
    /// Reached the attempt ceiling and moved to FAILED.
    pub gave_up: usize,
}

enum Outcome {
    Sent,
    Retry,
    GaveUp,
    Skipped,
}

pub struct Dispatcher {
    pool: PgPool,
    sender: Arc<dyn MessageSender>,
    interval: StdDuration,
    batch_size: i64,
    max_attempts: i32,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        sender: Arc<dyn MessageSender>,
        interval: StdDuration,
        batch_size: i64,
        max_attempts: i32,
    ) -> Self {
        Self {
            pool,
            sender,
            interval,
            batch_size,
            max_attempts,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "notification dispatcher started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(report) if report != DispatchReport::default() => {
                            info!(?report, "dispatch round finished");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "dispatch round aborted"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("notification dispatcher stopped");
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, ApiError> {
        let ids = {
            let mut conn = self.pool.acquire().await?;
            notifications::due_ids(&mut conn, now, self.max_attempts, self.batch_size).await?
        };

        let mut report = DispatchReport::default();
        for id in ids {
            match self.deliver(id, now).await {
                Ok(Outcome::Sent) => report.sent += 1,
                Ok(Outcome::Retry) => report.failed += 1,
                Ok(Outcome::GaveUp) => report.gave_up += 1,
                Ok(Outcome::Skipped) => {}
                Err(e) => {
                    warn!(notification_id = %id, error = %e, "could not record delivery result");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn deliver(&self, notification_id: Uuid, now: DateTime<Utc>) -> Result<Outcome, ApiError> {
        let mut tx = self.pool.begin().await?;

        // Already handled, cancelled, or claimed by another dispatcher.
        let Some(n) = notifications::claim(&mut tx, notification_id, self.max_attempts).await? else {
            return Ok(Outcome::Skipped);
        };

        let channel = Channel::parse(&n.channel).ok_or_else(|| {
            ApiError::Internal(format!("notification {notification_id} has unknown channel '{}'", n.channel))
        })?;

        let outcome = match self.sender.send(channel, &n.message).await {
            Ok(provider_id) => {
                notifications::mark_sent(&mut tx, notification_id, &provider_id, now).await?;
                debug!(%notification_id, appointment_id = ?n.appointment_id, kind = %n.kind, "notification sent");
                Outcome::Sent
            }
            Err(e) => {
                let status =
                    notifications::record_failure(&mut tx, notification_id, &e.to_string(), self.max_attempts)
                        .await?;
                warn!(
                    %notification_id,
                    appointment_id = ?n.appointment_id,
                    kind = %n.kind,
                    attempt = n.attempts + 1,
                    error = %e,
                    "delivery failed"
                );
                if status == NotificationStatus::Failed {
                    Outcome::GaveUp
                } else {
                    Outcome::Retry
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
