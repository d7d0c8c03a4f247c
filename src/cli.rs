use clap::{Parser, ValueEnum};

use crate::delivery::DEFAULT_BUDGET_LIMIT;

#[derive(Parser, Debug)]
#[command(name = "pubsub-kube-tail")]
#[command(about = "Tail container logs exported to a Pub/Sub topic")]
pub struct Cli {
    /// Container name (exact match)
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Namespace (exact match)
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Pod name regex (substring ok too)
    #[arg(short = 'p', long = "pod")]
    pub pod_pattern: Option<String>,

    /// Config file, defaults to ~/.pubsub-kube-tail/config.json
    #[arg(short = 'C', long = "config")]
    pub config: Option<String>,

    /// Stop after this many messages have been received
    #[arg(long, default_value_t = DEFAULT_BUDGET_LIMIT)]
    pub max_messages: u64,

    /// What to do when a record cannot be written to stdout
    #[arg(long, value_enum, default_value_t = ErrorPolicy::Fatal)]
    pub on_error: ErrorPolicy,

    /// Colorize the pod name prefix when stdout is a terminal
    #[arg(long)]
    pub color: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Handling of failures inside a single message cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErrorPolicy {
    /// End the whole session.
    Fatal,
    /// Log the failure and keep tailing.
    Skip,
}
