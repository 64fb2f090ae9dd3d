use std::path::PathBuf;
use std::sync::Arc;

use activity_ledger::config::LedgerConfig;
use activity_ledger::ledger::{Ledger, Reply};
use activity_ledger::{api, projections};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "activity-ledger", version, about = "Append-only activity log")]
struct Cli {
    /// Config file (defaults to ~/.activity-ledger/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show how free text would be logged, without logging it
    Parse { text: Vec<String> },
    /// Parse free text and log it once confirmed
    Log {
        text: Vec<String>,
        /// Confirm the suggestion without asking
        #[arg(long, short)]
        yes: bool,
    },
    /// Append a canonical line such as "START THEORY PANDAS"
    Append { line: Vec<String> },
    /// Ask a question ("what's my ratio?", "last 3 sessions")
    Query { text: Vec<String> },
    /// List derived sessions
    Sessions {
        /// Only the most recent N
        #[arg(long)]
        last: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LedgerConfig::load_from(path)?,
        None => LedgerConfig::load()?,
    };

    // Log to stderr so stdout only carries answers.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ledger = Ledger::open(&config)?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            api::serve(Arc::new(ledger), &bind).await?;
        }
        Command::Parse { text } => {
            let suggestion = ledger.suggest(&text.join(" "));
            println!("{}", serde_json::to_string_pretty(&suggestion)?);
        }
        Command::Log { text, yes } => {
            let suggestion = ledger.suggest(&text.join(" "));
            if yes {
                if let Reply::Logged { event, .. } = ledger.respond(&suggestion.details, "yes")? {
                    println!("Logged #{}: {}", event.index, event.canonical());
                }
            } else {
                println!("{}", suggestion.message);
                println!("Re-run with --yes to log it.");
            }
        }
        Command::Append { line } => {
            let event = ledger.append_line(&line.join(" "))?;
            println!("Logged #{}: {}", event.index, event.canonical());
        }
        Command::Query { text } => {
            let result = ledger.ask(&text.join(" "))?;
            println!("{}", result.render());
        }
        Command::Sessions { last } => {
            let window = last
                .map(projections::TimelineWindow::last)
                .unwrap_or_default();
            for session in ledger.timeline(&window)? {
                let end = session
                    .end_index
                    .map_or_else(|| "open".to_string(), |e| e.to_string());
                let done = if session.completed { " done" } else { "" };
                println!(
                    "{:>5}..{:<5} {} {} ({} events{done})",
                    session.start_index, end, session.category, session.activity, session.event_count
                );
            }
        }
    }

    Ok(())
}
