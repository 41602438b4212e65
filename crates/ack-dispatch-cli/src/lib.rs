//! # Ack Dispatch CLI
//!
//! Operator tooling for the acknowledgment dispatcher.
//!
//! This module provides CLI commands for:
//! - Configuration validation and display
//! - Running the dispatcher against an in-memory broker channel
//! - Shell completion generation

use ack_dispatch::channels::unknown_delivery_tag_reason;
use ack_dispatch::{
    AckCoordinator, ChannelError, ChannelOperation, ConfigurationError, DiagnosticEvent,
    DiagnosticKind, DiagnosticSink, DispatcherConfig, InMemoryChannel, MemoryDiagnostics,
    MessageId, OutcomeKind, Receipt, ReceivedMessage, SharedChannel, ShutdownTrigger,
    TracingDiagnostics,
};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Ack Dispatch CLI - serialized, retrying acknowledgments for broker deliveries
#[derive(Parser, Debug)]
#[command(name = "ack-dispatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serialized, retrying acknowledgment dispatcher")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ACK_DISPATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Configuration file to validate (overrides --config)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'F', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Settle a batch of messages against an in-memory broker channel
    Simulate {
        /// Number of messages to deliver and settle
        #[arg(short, long, default_value = "10")]
        messages: usize,

        /// Broker calls that fail with a connection error, per outcome kind
        #[arg(short, long, default_value = "0")]
        transient_failures: usize,

        /// Close the channel after this many settled messages
        #[arg(long)]
        close_after: Option<usize>,

        /// Dead-letter every Nth message
        #[arg(long)]
        dead_letter_every: Option<usize>,

        /// Defer every Nth message
        #[arg(long)]
        defer_every: Option<usize>,

        /// Output format for the report
        #[arg(short = 'F', long, default_value = "json")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Report format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::InvalidArgument { .. } => 2,
            Self::Serialization { .. } => 3,
            Self::Logging { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// Parameters of a simulated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationOptions {
    pub messages: usize,
    pub transient_failures: usize,
    pub close_after: Option<usize>,
    pub dead_letter_every: Option<usize>,
    pub defer_every: Option<usize>,
}

impl SimulationOptions {
    fn validate(&self) -> Result<(), CliError> {
        if self.messages == 0 {
            return Err(CliError::InvalidArgument {
                arg: "--messages".to_string(),
                message: "at least one message is required".to_string(),
            });
        }

        for (arg, value) in [
            ("--dead-letter-every", self.dead_letter_every),
            ("--defer-every", self.defer_every),
        ] {
            if value == Some(0) {
                return Err(CliError::InvalidArgument {
                    arg: arg.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Outcome requested for the message at the given 1-based position
    fn outcome_for(&self, position: usize) -> OutcomeKind {
        let every = |n: Option<usize>| n.is_some_and(|n| position % n == 0);

        if every(self.dead_letter_every) {
            OutcomeKind::DeadLetter
        } else if every(self.defer_every) {
            OutcomeKind::Defer
        } else {
            OutcomeKind::Complete
        }
    }
}

/// Summary of a simulated session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub messages: usize,
    pub completed: usize,
    pub deferred: usize,
    pub dead_lettered: usize,
    pub failed: usize,
    pub retries: usize,
    pub unknown_delivery_tags: usize,
    pub broker_acknowledged: usize,
    pub broker_requeued: usize,
    pub broker_rejected: usize,
    pub channel_closed: bool,
    pub native_dead_letter: bool,
    pub elapsed_ms: u128,
}

impl SimulationReport {
    fn render_text(&self) -> String {
        [
            format!("messages:              {}", self.messages),
            format!("completed:             {}", self.completed),
            format!("deferred:              {}", self.deferred),
            format!("dead-lettered:         {}", self.dead_lettered),
            format!("failed:                {}", self.failed),
            format!("retries:               {}", self.retries),
            format!("unknown delivery tags: {}", self.unknown_delivery_tags),
            format!(
                "broker ack/requeue/reject: {}/{}/{}",
                self.broker_acknowledged, self.broker_requeued, self.broker_rejected
            ),
            format!("channel closed:        {}", self.channel_closed),
            format!("native dead-letter:    {}", self.native_dead_letter),
            format!("elapsed:               {}ms", self.elapsed_ms),
        ]
        .join("\n")
    }
}

/// Records diagnostics in memory and forwards them to `tracing`
struct ReportingDiagnostics {
    memory: MemoryDiagnostics,
    tracing: TracingDiagnostics,
}

impl DiagnosticSink for ReportingDiagnostics {
    fn record(&self, event: DiagnosticEvent) {
        self.tracing.record(event.clone());
        self.memory.record(event);
    }
}

/// Run a coordinator against an in-memory channel and summarize the outcome
///
/// Messages are settled one after another. The first `transient_failures`
/// broker calls of every outcome kind fail with a connection error. With
/// `close_after`, the channel is closed the way a broker closes it after an
/// unknown delivery tag, so the remaining outcomes exercise the race handling.
pub async fn simulate(
    config: &DispatcherConfig,
    options: &SimulationOptions,
) -> Result<SimulationReport, CliError> {
    options.validate()?;

    let channel = Arc::new(InMemoryChannel::new(1));
    let shared = SharedChannel::new(channel.clone());
    let diagnostics = Arc::new(ReportingDiagnostics {
        memory: MemoryDiagnostics::new(),
        tracing: TracingDiagnostics,
    });
    let trigger = ShutdownTrigger::new();
    let coordinator = AckCoordinator::new(config, diagnostics.clone(), trigger.signal());

    for operation in [
        ChannelOperation::Ack,
        ChannelOperation::Requeue,
        ChannelOperation::Reject,
    ] {
        channel.fail_next_times(
            operation,
            options.transient_failures,
            ChannelError::ConnectionFailed {
                message: "simulated connection reset".to_string(),
            },
        );
    }

    let started = Instant::now();
    let mut report = SimulationReport {
        messages: options.messages,
        native_dead_letter: coordinator.native_dead_letter_enabled(),
        ..SimulationReport::default()
    };

    for position in 1..=options.messages {
        let tag = channel.deliver();
        let message = ReceivedMessage::new(
            MessageId::new(),
            format!("simulated message {}", position).into(),
            Receipt::Amqp(shared.handle(tag)),
        );

        if options.close_after == Some(position - 1) {
            info!(delivery_tag = tag, "Closing simulated channel");
            channel.close(unknown_delivery_tag_reason(tag));
        }

        let kind = options.outcome_for(position);
        let result = match kind {
            OutcomeKind::Complete => coordinator.complete(&message).await,
            OutcomeKind::Defer => coordinator.defer(&message).await,
            OutcomeKind::DeadLetter => {
                coordinator
                    .move_to_dead_letter(&message, "simulated poison message")
                    .await
            }
        };

        match result {
            Ok(()) => match kind {
                OutcomeKind::Complete => report.completed += 1,
                OutcomeKind::Defer => report.deferred += 1,
                OutcomeKind::DeadLetter => report.dead_lettered += 1,
            },
            Err(error) => {
                warn!(
                    message_id = %message.message_id,
                    outcome = %kind,
                    error = %error,
                    "Simulated outcome failed"
                );
                report.failed += 1;
            }
        }
    }

    trigger.trigger();
    coordinator.dispose().await;

    report.retries = diagnostics.memory.count(DiagnosticKind::RetryScheduled);
    report.unknown_delivery_tags = diagnostics.memory.count(DiagnosticKind::UnknownDeliveryTag);
    report.broker_acknowledged = channel.acknowledged().len();
    report.broker_requeued = channel.requeued().len();
    report.broker_rejected = channel.rejected().len();
    report.channel_closed = channel.is_closed();
    report.elapsed_ms = started.elapsed().as_millis();

    debug!(report = ?report, "Simulation finished");
    Ok(report)
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let output = execute(cli).await?;
    println!("{}", output);
    Ok(())
}

/// Execute a parsed command and return what should be printed
pub async fn execute(cli: Cli) -> Result<String, CliError> {
    match cli.command {
        Commands::Config { file, show, format } => {
            execute_config_command(file.or(cli.config), show, format)
        }
        Commands::Simulate {
            messages,
            transient_failures,
            close_after,
            dead_letter_every,
            defer_every,
            format,
        } => {
            let options = SimulationOptions {
                messages,
                transient_failures,
                close_after,
                dead_letter_every,
                defer_every,
            };
            execute_simulate_command(cli.config, options, format).await
        }
        Commands::Completions { shell } => execute_completions_command(shell),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments
///
/// `RUST_LOG` takes precedence over `--log-level`. Logs go to stderr so command
/// output on stdout stays machine readable.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Execute config command
fn execute_config_command(
    file: Option<PathBuf>,
    show: bool,
    format: ConfigFormat,
) -> Result<String, CliError> {
    info!(file = ?file, show = show, format = ?format, "Processing config command");

    let config = DispatcherConfig::load(file.as_deref())?;

    if !show {
        return Ok("Configuration is valid".to_string());
    }

    render_config(&config, format)
}

/// Serialize a configuration in the requested format
pub fn render_config(config: &DispatcherConfig, format: ConfigFormat) -> Result<String, CliError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string(config).map_err(|e| e.to_string()),
    };

    rendered.map_err(|message| CliError::Serialization { message })
}

/// Execute simulate command
async fn execute_simulate_command(
    config_path: Option<PathBuf>,
    options: SimulationOptions,
    format: OutputFormat,
) -> Result<String, CliError> {
    info!(options = ?options, format = ?format, "Starting simulation");

    let config = DispatcherConfig::load(config_path.as_deref())?;
    let report = simulate(&config, &options).await?;

    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&report).map_err(|e| CliError::Serialization {
                message: e.to_string(),
            })
        }
        OutputFormat::Text => Ok(report.render_text()),
    }
}

/// Execute completions command
fn execute_completions_command(shell: clap_complete::Shell) -> Result<String, CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();
    clap_complete::generate(shell, &mut command, "ack-dispatch", &mut buffer);

    String::from_utf8(buffer).map_err(|e| CliError::Serialization {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
