use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{Cli, ErrorPolicy};
use crate::error::ConfigError;
use crate::filter::SelectionCriteria;
use crate::transport::pubsub::{Credentials, DEFAULT_ENDPOINT};
use crate::utils::{default_config_path, expand_home};

const DEFAULT_ACK_DEADLINE_SECS: u64 = 20;
const DEFAULT_MAX_OUTSTANDING: usize = 100;

/// Contents of the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct FileConfig {
    pub project_name: String,
    pub topic_name: String,
    pub subscription_name: String,
    pub pod_string: String,
    pub namespace_name: String,
    pub container_name: String,
    pub ack_deadline_seconds: Option<u64>,
    pub max_outstanding_messages: Option<usize>,
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
}

impl FileConfig {
    /// Read a config file; `.yaml`/`.yml` files are parsed as YAML, anything
    /// else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str(contents).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(contents).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Everything a session needs, after merging flags over the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub project: String,
    pub topic: String,
    pub subscription: String,
    pub container_name: String,
    pub namespace_name: String,
    pub pod_pattern: String,
    pub ack_deadline: Duration,
    pub max_outstanding: usize,
    pub max_messages: u64,
    pub on_error: ErrorPolicy,
    pub color: bool,
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
}

impl Settings {
    /// Load the config file named by the CLI (or the default one) and merge.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let config_path = cli
            .config
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(default_config_path);
        let file = FileConfig::load(&config_path)?;
        Self::merge(cli, config_path, file)
    }

    /// Non-empty flags win over config file values.
    pub fn merge(cli: &Cli, config_path: PathBuf, file: FileConfig) -> Result<Self, ConfigError> {
        let required = [
            ("projectName", &file.project_name),
            ("topicName", &file.topic_name),
            ("subscriptionName", &file.subscription_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }

        let pick = |flag: &Option<String>, fallback: &str| match flag.as_deref() {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => fallback.to_string(),
        };

        Ok(Self {
            container_name: pick(&cli.container, &file.container_name),
            namespace_name: pick(&cli.namespace, &file.namespace_name),
            pod_pattern: pick(&cli.pod_pattern, &file.pod_string),
            project: file.project_name,
            topic: file.topic_name,
            subscription: file.subscription_name,
            ack_deadline: Duration::from_secs(
                file.ack_deadline_seconds.unwrap_or(DEFAULT_ACK_DEADLINE_SECS),
            ),
            max_outstanding: file
                .max_outstanding_messages
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_OUTSTANDING),
            max_messages: cli.max_messages,
            on_error: cli.on_error,
            color: cli.color,
            endpoint: file.endpoint,
            access_token: file.access_token,
            config_path,
        })
    }

    /// Compile the selection criteria. Fails on an invalid pod regex.
    pub fn criteria(&self) -> Result<SelectionCriteria, ConfigError> {
        SelectionCriteria::new(&self.container_name, &self.namespace_name, &self.pod_pattern)
    }

    /// Resolve the REST endpoint and credentials.
    ///
    /// `PUBSUB_EMULATOR_HOST` wins and disables authentication. Otherwise the
    /// token comes from the config file, `GOOGLE_OAUTH_ACCESS_TOKEN`, or gcloud.
    pub fn endpoint_and_credentials(&self) -> (String, Credentials) {
        if let Ok(host) = std::env::var("PUBSUB_EMULATOR_HOST")
            && !host.is_empty()
        {
            return (format!("http://{}/v1", host), Credentials::Anonymous);
        }

        let endpoint = self
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = self
            .access_token
            .clone()
            .or_else(|| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok())
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => (endpoint, Credentials::Static(token)),
            None => (endpoint, Credentials::gcloud()),
        }
    }
}
