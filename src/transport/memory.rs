//! In-process transport used by tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;

use super::{ReceivedMessage, Transport};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct State {
    topics: HashSet<String>,
    subscriptions: HashSet<String>,
    queue: VecDeque<ReceivedMessage>,
    published: usize,
    acked: Vec<String>,
    rejected: Vec<String>,
    fail_topic_lookup: bool,
    fail_create: bool,
    fail_delete: bool,
    fail_ack: bool,
    hang_ack: bool,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    changed: Notify,
}

impl MemoryTransport {
    pub fn with_topic(topic: &str) -> Self {
        let transport = Self::default();
        transport.state.lock().topics.insert(topic.to_string());
        transport
    }

    /// Queue a message; its ack id is `m<position>`.
    pub fn publish(&self, data: &[u8]) -> String {
        let mut state = self.state.lock();
        let ack_id = format!("m{}", state.published);
        state.published += 1;
        state.queue.push_back(ReceivedMessage {
            ack_id: ack_id.clone(),
            data: data.to_vec(),
        });
        drop(state);
        self.changed.notify_waiters();
        ack_id
    }

    pub fn fail_topic_lookup(&self) {
        self.state.lock().fail_topic_lookup = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Make every acknowledge call wait forever.
    pub fn hang_ack(&self) {
        self.state.lock().hang_ack = true;
    }

    pub fn fail_delete(&self) {
        self.state.lock().fail_delete = true;
    }

    pub fn fail_ack(&self) {
        self.state.lock().fail_ack = true;
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        self.state.lock().subscriptions.contains(subscription)
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    pub fn rejected(&self) -> Vec<String> {
        self.state.lock().rejected.clone()
    }

    /// Wait until at least `count` messages have been acked or rejected.
    pub async fn wait_settled(&self, count: usize) {
        loop {
            let changed = self.changed.notified();
            {
                let state = self.state.lock();
                if state.acked.len() + state.rejected.len() >= count {
                    return;
                }
            }
            changed.await;
        }
    }

    fn injected(operation: &'static str) -> TransportError {
        TransportError::Status {
            operation,
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn topic_exists(&self, topic: &str) -> Result<bool, TransportError> {
        let state = self.state.lock();
        if state.fail_topic_lookup {
            return Err(Self::injected("get topic"));
        }
        Ok(state.topics.contains(topic))
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, TransportError> {
        Ok(self.has_subscription(subscription))
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        _topic: &str,
        _ack_deadline: Duration,
    ) -> Result<bool, TransportError> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(Self::injected("create subscription"));
        }
        Ok(state.subscriptions.insert(subscription.to_string()))
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_delete {
            return Err(Self::injected("delete subscription"));
        }
        state.subscriptions.remove(subscription);
        Ok(())
    }

    async fn pull(
        &self,
        _subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.state.lock();
                if !state.queue.is_empty() {
                    let take = max_messages.min(state.queue.len());
                    return Ok(state.queue.drain(..take).collect());
                }
            }
            changed.await;
        }
    }

    async fn acknowledge(&self, _subscription: &str, ack_id: &str) -> Result<(), TransportError> {
        let hang = self.state.lock().hang_ack;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock();
        if state.fail_ack {
            return Err(Self::injected("acknowledge"));
        }
        state.acked.push(ack_id.to_string());
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn reject(&self, _subscription: &str, ack_id: &str) -> Result<(), TransportError> {
        self.state.lock().rejected.push(ack_id.to_string());
        self.changed.notify_waiters();
        Ok(())
    }
}
