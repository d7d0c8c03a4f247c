mod cli;
mod config;
mod delivery;
mod error;
mod filter;
mod output;
mod record;
mod session;
mod summary;
mod transport;
mod utils;

use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{error, info};

use cli::Cli;
use config::Settings;
use delivery::DeliveryController;
use output::StdoutSink;
use session::{Session, Termination, shutdown_signal};
use transport::pubsub::PubSubClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so stdout only carries log records
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let criteria = match settings.criteria() {
        Ok(criteria) => criteria,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Setting up logger...");
    info!("Config: {}", settings.config_path.display());
    info!("Topic: {}", settings.topic);
    info!("Subscription: {}", settings.subscription);
    if !criteria.container_name().is_empty() {
        info!("Container Name: {}", criteria.container_name());
    }
    if !criteria.namespace_name().is_empty() {
        info!("Namespace: {}", criteria.namespace_name());
    }
    if !criteria.pod_pattern().is_empty() {
        info!("Pod Name Regex: '{}'", criteria.pod_pattern());
    }
    if criteria.is_empty() {
        info!("No filters set, showing every record");
    }

    let (endpoint, credentials) = settings.endpoint_and_credentials();
    let client = match PubSubClient::new(&settings.project, &endpoint, credentials) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Unable to create Pub/Sub client: {}", e);
            std::process::exit(1);
        }
    };

    let session = match Session::open(
        client,
        &settings.topic,
        &settings.subscription,
        settings.ack_deadline,
        settings.max_outstanding,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let color = settings.color && std::io::stdout().is_terminal();
    let controller = Arc::new(DeliveryController::new(
        criteria,
        Arc::new(StdoutSink::new(color)),
        settings.max_messages,
        settings.on_error,
    ));

    let outcome = session.run(controller, shutdown_signal()).await;
    let subscription = session.subscription().to_string();
    let teardown = session.close().await;

    let mut failed = false;
    match outcome {
        Ok(Termination::BudgetExhausted) => info!("Message budget exhausted"),
        Ok(Termination::Interrupted) => {}
        Err(e) => {
            error!("{}", e);
            failed = true;
        }
    }
    if let Err(e) = teardown {
        error!("Unable to delete subscription '{}': {}", subscription, e);
        failed = true;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
