//! Google Cloud Pub/Sub backend over the v1 REST API.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ReceivedMessage, Transport};
use crate::error::TransportError;

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";

const TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

/// Upper bound for every call except `pull`.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How requests are authenticated.
pub enum Credentials {
    /// No `Authorization` header, e.g. for the local emulator.
    Anonymous,
    /// A fixed OAuth bearer token.
    Static(String),
    /// Tokens from `gcloud auth print-access-token`, cached for a while.
    Gcloud(Mutex<Option<(String, Instant)>>),
}

impl Credentials {
    pub fn gcloud() -> Self {
        Self::Gcloud(Mutex::new(None))
    }

    async fn token(&self) -> Result<Option<String>, TransportError> {
        match self {
            Credentials::Anonymous => Ok(None),
            Credentials::Static(token) => Ok(Some(token.clone())),
            Credentials::Gcloud(cache) => {
                let mut cache = cache.lock().await;
                if let Some((token, fetched)) = cache.as_ref()
                    && fetched.elapsed() < TOKEN_LIFETIME
                {
                    return Ok(Some(token.clone()));
                }

                let token = gcloud_access_token().await?;
                *cache = Some((token.clone(), Instant::now()));
                Ok(Some(token))
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Credentials::Anonymous => "anonymous",
            Credentials::Static(_) => "static",
            Credentials::Gcloud(_) => "gcloud",
        };
        f.debug_tuple("Credentials").field(&kind).finish()
    }
}

async fn gcloud_access_token() -> Result<String, TransportError> {
    debug!("Fetching access token from gcloud");
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| TransportError::Auth(format!("failed to run gcloud: {}", e)))?;

    if !output.status.success() {
        return Err(TransportError::Auth(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(TransportError::Auth("gcloud returned an empty token".to_string()));
    }
    Ok(token)
}

/// Pub/Sub client bound to one project.
#[derive(Debug)]
pub struct PubSubClient {
    http: Client,
    base_url: String,
    project: String,
    credentials: Credentials,
    request_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest<'a> {
    topic: &'a str,
    ack_deadline_seconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: [&'a str; 1],
    ack_deadline_seconds: u64,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PullResponse {
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    #[serde(default)]
    message: WireMessage,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireMessage {
    data: String,
}

impl PubSubClient {
    pub fn new(project: &str, base_url: &str, credentials: Credentials) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            credentials,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    #[cfg(test)]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full resource name of a topic; already qualified names pass through.
    pub fn topic_path(&self, topic: &str) -> String {
        qualify(&self.project, "topics", topic)
    }

    pub fn subscription_path(&self, subscription: &str) -> String {
        qualify(&self.project, "subscriptions", subscription)
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let request = match self.credentials.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        Ok(request.send().await?)
    }

    /// `Ok(true)` on 2xx, `Ok(false)` on 404, an error otherwise.
    async fn exists(&self, operation: &'static str, resource: &str) -> Result<bool, TransportError> {
        let request = self.http.get(self.url(resource)).timeout(self.request_timeout);
        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(status_error(operation, response).await),
        }
    }

    async fn post_subscription<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        subscription: &str,
        verb: &str,
        body: &B,
    ) -> Result<Response, TransportError> {
        let url = format!("{}:{}", self.url(&self.subscription_path(subscription)), verb);
        let mut request = self.http.post(url).json(body);
        // pull is a long poll; the receive loop ends it through cancellation
        if verb != "pull" {
            request = request.timeout(self.request_timeout);
        }
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(operation, response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for PubSubClient {
    async fn topic_exists(&self, topic: &str) -> Result<bool, TransportError> {
        self.exists("get topic", &self.topic_path(topic)).await
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, TransportError> {
        self.exists("get subscription", &self.subscription_path(subscription))
            .await
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> Result<bool, TransportError> {
        let topic = self.topic_path(topic);
        let body = CreateSubscriptionRequest {
            topic: &topic,
            ack_deadline_seconds: ack_deadline.as_secs(),
        };
        let url = self.url(&self.subscription_path(subscription));
        let request = self.http.put(url).json(&body).timeout(self.request_timeout);
        let response = self.send(request).await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(status_error("create subscription", response).await),
        }
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), TransportError> {
        let url = self.url(&self.subscription_path(subscription));
        let response = self
            .send(self.http.delete(url).timeout(self.request_timeout))
            .await?;
        if !response.status().is_success() {
            return Err(status_error("delete subscription", response).await);
        }
        Ok(())
    }

    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let response = self
            .post_subscription("pull", subscription, "pull", &PullRequest { max_messages })
            .await?;
        let body: PullResponse = response.json().await?;

        body.received_messages
            .into_iter()
            .map(|received| -> Result<ReceivedMessage, TransportError> {
                Ok(ReceivedMessage {
                    ack_id: received.ack_id,
                    data: STANDARD.decode(received.message.data)?,
                })
            })
            .collect()
    }

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> Result<(), TransportError> {
        let body = AcknowledgeRequest { ack_ids: [ack_id] };
        self.post_subscription("acknowledge", subscription, "acknowledge", &body)
            .await?;
        Ok(())
    }

    async fn reject(&self, subscription: &str, ack_id: &str) -> Result<(), TransportError> {
        // A zero deadline makes the message immediately available for redelivery
        let body = ModifyAckDeadlineRequest {
            ack_ids: [ack_id],
            ack_deadline_seconds: 0,
        };
        self.post_subscription("nack", subscription, "modifyAckDeadline", &body)
            .await?;
        Ok(())
    }
}

fn qualify(project: &str, collection: &str, name: &str) -> String {
    if name.starts_with("projects/") {
        name.to_string()
    } else {
        format!("projects/{}/{}/{}", project, collection, name)
    }
}

async fn status_error(operation: &'static str, response: Response) -> TransportError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    TransportError::Status {
        operation,
        status,
        body,
    }
}
