use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::delivery::{ControllerState, DeliveryController};
use crate::error::{ConfigError, TransportError};
use crate::transport::{self, Transport};

/// How long in-flight cycles may keep running after a shutdown request.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Why a session stopped receiving without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    BudgetExhausted,
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Unable to look up topic '{topic}': {source}")]
    TopicLookup {
        topic: String,
        source: TransportError,
    },
    #[error("Unable to create subscription '{subscription}': {source}")]
    Subscription {
        subscription: String,
        source: TransportError,
    },
}

/// A subscription that exists for the duration of one tail.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: Arc<T>,
    subscription: String,
    max_outstanding: usize,
    shutdown_grace: Duration,
}

impl<T: Transport> Session<T> {
    /// Check the topic and create the subscription if it is missing.
    pub async fn open(
        transport: Arc<T>,
        topic: &str,
        subscription: &str,
        ack_deadline: Duration,
        max_outstanding: usize,
    ) -> Result<Self, OpenError> {
        let found = transport
            .topic_exists(topic)
            .await
            .map_err(|source| OpenError::TopicLookup {
                topic: topic.to_string(),
                source,
            })?;
        if !found {
            return Err(ConfigError::TopicNotFound(topic.to_string()).into());
        }

        transport::ensure_subscription(transport.as_ref(), subscription, topic, ack_deadline)
            .await
            .map_err(|source| OpenError::Subscription {
                subscription: subscription.to_string(),
                source,
            })?;

        Ok(Self {
            transport,
            subscription: subscription.to_string(),
            max_outstanding,
            shutdown_grace: SHUTDOWN_GRACE,
        })
    }

    #[cfg(test)]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Receive until the controller exhausts its budget, `shutdown` resolves,
    /// or the transport fails.
    pub async fn run<F>(
        &self,
        controller: Arc<DeliveryController>,
        shutdown: F,
    ) -> Result<Termination, TransportError>
    where
        F: Future<Output = ()>,
    {
        let cancel = controller.cancellation_token();
        let receive = transport::receive(
            Arc::clone(&self.transport),
            &self.subscription,
            self.max_outstanding,
            controller.clone(),
            cancel.clone(),
        );
        tokio::pin!(receive);
        tokio::pin!(shutdown);

        let interrupted = tokio::select! {
            result = &mut receive => {
                result.map(|()| false)
            }
            () = &mut shutdown => {
                info!("Shutdown requested, waiting for in-flight messages");
                cancel.cancel();
                match tokio::time::timeout(self.shutdown_grace, &mut receive).await {
                    Ok(result) => result.map(|()| true),
                    Err(_) => {
                        // Unsettled messages are redelivered once their deadline lapses
                        warn!(
                            "In-flight messages did not settle within {:?}, abandoning them",
                            self.shutdown_grace
                        );
                        Ok(true)
                    }
                }
            }
        };

        let budget_hit = controller.state() == ControllerState::BudgetExceeded;
        controller.stop();
        let interrupted = interrupted?;

        info!("Stopped after receiving {} messages", controller.received());
        if interrupted || !budget_hit {
            Ok(Termination::Interrupted)
        } else {
            Ok(Termination::BudgetExhausted)
        }
    }

    /// Delete the subscription.
    pub async fn close(self) -> Result<(), TransportError> {
        info!("Deleting subscription '{}'...", self.subscription);
        if let Err(e) = self.transport.delete_subscription(&self.subscription).await {
            warn!("Unable to delete subscription '{}'", self.subscription);
            return Err(e);
        }
        info!("Subscription '{}' deleted.", self.subscription);
        Ok(())
    }
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
