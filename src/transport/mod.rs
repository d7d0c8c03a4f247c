//! Message transport abstraction and the generic receive loop.

#[cfg(test)]
pub mod memory;
pub mod pubsub;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DeliveryError, TransportError};

/// What the transport should do with a message after its cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Consume the message.
    Ack,
    /// Hand the message back for redelivery.
    Nack,
}

/// A message pulled from a subscription.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub data: Vec<u8>,
}

/// Per-message callback invoked concurrently by [`receive`].
pub trait MessageHandler: Send + Sync {
    fn handle(&self, data: &[u8]) -> Result<Disposition, DeliveryError>;
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn topic_exists(&self, topic: &str) -> Result<bool, TransportError>;

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, TransportError>;

    /// Create a subscription. Returns `false` if it already existed.
    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> Result<bool, TransportError>;

    async fn delete_subscription(&self, subscription: &str) -> Result<(), TransportError>;

    /// Wait for the next batch of at most `max_messages` messages.
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> Result<(), TransportError>;

    async fn reject(&self, subscription: &str, ack_id: &str) -> Result<(), TransportError>;
}

/// Make sure `subscription` exists on `topic`. Returns `true` if it was created.
pub async fn ensure_subscription<T: Transport + ?Sized>(
    transport: &T,
    subscription: &str,
    topic: &str,
    ack_deadline: Duration,
) -> Result<bool, TransportError> {
    if transport.subscription_exists(subscription).await? {
        debug!("Subscription '{}' already exists", subscription);
        return Ok(false);
    }

    let created = transport
        .create_subscription(subscription, topic, ack_deadline)
        .await?;
    if created {
        info!("Created subscription: {}", subscription);
    }
    Ok(created)
}

/// Pull messages from `subscription` and run `handler` on each of them until
/// `cancel` fires or an error becomes fatal.
///
/// Messages of a batch are handled concurrently; the next batch is only
/// pulled once the current one has been settled. After cancellation, cycles
/// already running are allowed to finish.
pub async fn receive<T: Transport>(
    transport: Arc<T>,
    subscription: &str,
    max_messages: usize,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let subscription: Arc<str> = Arc::from(subscription);

    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = transport.pull(&subscription, max_messages) => batch?,
        };
        debug!("Pulled {} messages", batch.len());

        let mut in_flight = JoinSet::new();
        for message in batch {
            let transport = Arc::clone(&transport);
            let handler = Arc::clone(&handler);
            let subscription = Arc::clone(&subscription);
            in_flight.spawn(async move {
                settle(transport.as_ref(), handler.as_ref(), &subscription, message).await
            });
        }

        let mut failure = None;
        while let Some(joined) = in_flight.join_next().await {
            let outcome = joined.map_err(TransportError::from).and_then(|r| r);
            if let Err(e) = outcome
                && failure.is_none()
            {
                cancel.cancel();
                failure = Some(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
    }

    Ok(())
}

/// Run one message's cycle and report its disposition back to the transport.
async fn settle<T: Transport>(
    transport: &T,
    handler: &dyn MessageHandler,
    subscription: &str,
    message: ReceivedMessage,
) -> Result<(), TransportError> {
    match handler.handle(&message.data)? {
        Disposition::Ack => transport.acknowledge(subscription, &message.ack_id).await,
        Disposition::Nack => transport.reject(subscription, &message.ack_id).await,
    }
}
