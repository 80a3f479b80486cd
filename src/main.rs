//! `thuto` command line: ingest course documents per subject and query them.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};
use thuto_core::AppServices;
use thuto_core::config::{Config, resolve_config_path};

/// Subject-scoped document retrieval for grounded study answers.
#[derive(Parser)]
#[command(name = "thuto", version, about)]
struct Cli {
    /// Path to the TOML configuration file. Falls back to `THUTO_CONFIG`, then
    /// `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index one document into a subject, replacing earlier chunks with the same id.
    Ingest {
        #[arg(long)]
        subject: String,
        /// Stable document id used for replacement and removal.
        #[arg(long)]
        id: String,
        /// `pdf`, `docx` or `txt`; inferred from the extension when omitted.
        #[arg(long = "type")]
        file_type: Option<String>,
        file: PathBuf,
    },

    /// Index every supported file in a directory in the background.
    IngestDir {
        #[arg(long)]
        subject: String,
        dir: PathBuf,
    },

    /// Retrieve the chunks of a subject most relevant to a question.
    Query {
        #[arg(long)]
        subject: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Minimum score in [0, 1].
        #[arg(long)]
        threshold: Option<f32>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
        text: String,
    },

    /// Print the prompt the answer generator would receive for a question.
    Prompt {
        #[arg(long)]
        subject: String,
        text: String,
    },

    /// Remove a document's chunks from a subject.
    Remove {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        id: String,
    },

    /// Re-embed a subject from its stored chunk texts and rebuild its index.
    Rebuild {
        #[arg(long)]
        subject: String,
    },

    /// Drop tombstoned vectors from a subject's index.
    Compact {
        #[arg(long)]
        subject: String,
    },

    /// Show index statistics for one subject or all of them.
    Stats {
        #[arg(long)]
        subject: Option<String>,
    },

    /// Delete a subject's index and metadata.
    Clear {
        #[arg(long)]
        subject: String,
    },
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// The active log filter. Starts at `RUST_LOG` or `info` so that configuration loading can
/// already log, and switches to `[logging] level` afterwards.
struct LogFilter {
    handle: FilterHandle,
    from_env: bool,
}

impl LogFilter {
    /// Install the configured level unless `RUST_LOG` chose the filter.
    fn apply_configured(&self, level: &str) {
        if self.from_env {
            return;
        }
        match EnvFilter::try_new(level) {
            Ok(filter) => {
                if let Err(e) = self.handle.reload(filter) {
                    tracing::warn!(error = %e, "failed to apply configured log level");
                }
            }
            Err(e) => tracing::warn!(level, error = %e, "invalid log level, keeping info"),
        }
    }
}

fn build_subscriber<W>(
    env_filter: Option<EnvFilter>,
    writer: W,
) -> (impl tracing::Subscriber + Send + Sync + 'static, LogFilter)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let from_env = env_filter.is_some();
    let (filter, handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer));
    (subscriber, LogFilter { handle, from_env })
}

fn init_subscriber() -> LogFilter {
    let (subscriber, filter) =
        build_subscriber(EnvFilter::try_from_default_env().ok(), std::io::stderr);
    subscriber.init();
    filter
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_filter = init_subscriber();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    log_filter.apply_configured(&config.logging.level);
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    let services = AppServices::init(config).await?;
    let result = commands::run(&services, cli.command).await;
    services.shutdown();
    result
}
