use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pgarchive_client::ArchiveClient;
use threadmark_common::{Config, TimeWindow};
use threadmark_resolver::gate::PolitenessGate;
use threadmark_resolver::resilient::{ResilientExpander, ResilientListing, RetryPolicy};
use threadmark_resolver::{
    CheckpointStore, Resolver, ResolverContext, ResolverSettings, Session, SessionReport,
    Strategy,
};

#[derive(Parser)]
#[command(name = "scout", about = "Resolve the origin message of every mailing-list thread")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a window of the archive listing and resolve thread origins.
    Resolve {
        #[command(flatten)]
        range: DayRange,

        #[arg(long, value_enum, default_value_t = Strategy::Combined)]
        strategy: Strategy,

        /// Checkpoint file (default: {DATA_DIR}/checkpoints/{ARCHIVE_LIST}.json)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Continue from the checkpoint instead of starting a new session.
        #[arg(long)]
        resume: bool,
    },
    /// Print resolved origins from a checkpoint.
    Show {
        #[command(flatten)]
        range: DayRange,

        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Threads with any activity in the range instead of threads started in it.
        #[arg(long)]
        active: bool,
    },
}

#[derive(Args)]
struct DayRange {
    /// First day, YYYYMMDD
    #[arg(long, value_parser = parse_day)]
    start: NaiveDate,

    /// Last day, YYYYMMDD (default: same as --start)
    #[arg(long, value_parser = parse_day)]
    end: Option<NaiveDate>,
}

impl DayRange {
    fn window(&self) -> Result<TimeWindow> {
        let end = self.end.unwrap_or(self.start);
        if end < self.start {
            bail!("--end {end} is before --start {}", self.start);
        }
        Ok(TimeWindow::days(self.start, end))
    }
}

fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y%m%d").map_err(|e| format!("expected YYYYMMDD: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("threadmark=info".parse()?)
                .add_directive("scout=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    match cli.command {
        Command::Resolve {
            range,
            strategy,
            checkpoint,
            resume,
        } => {
            let store =
                CheckpointStore::new(checkpoint.unwrap_or_else(|| config.checkpoint_path()));
            resolve(&config, range.window()?, strategy, store, resume).await
        }
        Command::Show {
            range,
            checkpoint,
            active,
        } => {
            let store =
                CheckpointStore::new(checkpoint.unwrap_or_else(|| config.checkpoint_path()));
            show(&config, &range.window()?, &store, active)
        }
    }
}

async fn resolve(
    config: &Config,
    window: TimeWindow,
    strategy: Strategy,
    store: CheckpointStore,
    resume: bool,
) -> Result<()> {
    let (session, ctx) = match store.load()? {
        Some(checkpoint) if resume => {
            let session = checkpoint
                .resume_session(&window)
                .with_context(|| format!("Cannot resume from {}", store.path().display()))?;
            info!(session_id = %session.id, "Resuming session");
            (session, checkpoint.context())
        }
        // A new session still builds on everything resolved before it.
        Some(checkpoint) => (Session::new(window), checkpoint.context()),
        None if resume => bail!("No checkpoint to resume at {}", store.path().display()),
        None => (Session::new(window), ResolverContext::new()),
    };

    let client = Arc::new(ArchiveClient::new(
        &config.archive_base_url,
        &config.archive_list,
        config.expand_timeout,
    )?);
    let gate = Arc::new(PolitenessGate::new(
        config.max_concurrent_requests,
        config.requests_per_second,
    ));
    let policy = RetryPolicy::from_config(config);

    let resolver = Resolver::new(
        Arc::new(ResilientListing::new(client.clone(), gate.clone(), policy)),
        Arc::new(ResilientExpander::new(client, gate, policy)),
        Arc::new(ctx),
        ResolverSettings {
            strategy,
            workers: config.workers,
        },
    );

    let report = resolver.run(&session, Some(&store)).await?;
    report.save(&SessionReport::path_for(store.path()))?;
    println!("{report}");
    Ok(())
}

fn show(config: &Config, window: &TimeWindow, store: &CheckpointStore, active: bool) -> Result<()> {
    let checkpoint = store
        .load()?
        .with_context(|| format!("No checkpoint at {}", store.path().display()))?;
    let ctx = checkpoint.context();
    let client = ArchiveClient::new(
        &config.archive_base_url,
        &config.archive_list,
        config.expand_timeout,
    )?;

    let records: Vec<_> = if active {
        ctx.registry
            .list_active(window)
            .into_iter()
            .map(|(record, _)| record)
            .collect()
    } else {
        ctx.registry.list_resolved(window)
    };

    for record in &records {
        println!("{record}");
        println!("URL: {}\n", client.message_url(record.message_id.as_str()));
    }
    info!(threads = records.len(), active, "Listed resolved threads");
    Ok(())
}
