use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "quotefeed")]
#[command(about = "Scrape quotes into a deduplicated JSON feed")]
struct Cli {
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scrape cycle and print the merged count.
    Scrape,
    /// Serve the HTTP trigger and arm the optional one-shot schedule.
    Serve,
    /// Show when a schedule time would next fire.
    ResolveTime { time: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    match cli.command.unwrap_or(Commands::Scrape) {
        Commands::Scrape => {
            let outcome = quotefeed_sync::run_scrape_once_from_env().await?;
            println!(
                "scrape complete at {}: title={:?} quotes={} added={} updated={}",
                outcome.scraped_at.to_rfc3339(),
                outcome.title,
                outcome.quotes.len(),
                outcome.stats.added,
                outcome.stats.updated
            );
        }
        Commands::Serve => quotefeed_web::serve_from_env().await?,
        Commands::ResolveTime { time } => {
            let ambiguous = quotefeed_sync::parse_time_of_day(&time)?.is_ambiguous();
            let next = quotefeed_sync::resolve(&time, &Local::now())?;
            println!(
                "{} -> {} (in {}s{})",
                time,
                next.scheduled_for.to_rfc3339(),
                next.delay.as_secs(),
                if ambiguous { ", sooner of am/pm" } else { "" }
            );
        }
    }

    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("QUOTEFEED_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
