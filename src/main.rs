use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use unified_ledger::{IngestConfig, Ledger, Orchestrator, VERSION};

#[derive(Parser)]
#[command(name = "unified-ledger", version, about = "Ingest bank statements into an append-only ledger")]
struct Cli {
    /// Log filter (RUST_LOG syntax), overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every file in the raw directory
    Ingest {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        ledger: Option<PathBuf>,
        #[arg(long)]
        raw_dir: Option<PathBuf>,
        #[arg(long)]
        processed_dir: Option<PathBuf>,
    },
    /// Replay the ledger and print what it holds
    Index {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Recompute every transaction_id from its fields
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Ingest {
            config,
            ledger,
            raw_dir,
            processed_dir,
        } => {
            let mut config = load_config(config)?;
            if let Some(path) = ledger {
                config.ledger_path = path;
            }
            if let Some(path) = raw_dir {
                config.raw_dir = path;
            }
            if let Some(path) = processed_dir {
                config.processed_dir = path;
            }
            run_ingest(config)
        }
        Command::Index {
            config,
            ledger,
            verify,
        } => {
            let mut config = load_config(config)?;
            if let Some(path) = ledger {
                config.ledger_path = path;
            }
            run_index(&config, verify)
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<IngestConfig> {
    match path {
        Some(path) => IngestConfig::from_file(path),
        None => Ok(IngestConfig::default()),
    }
}

fn run_ingest(config: IngestConfig) -> Result<()> {
    println!("📥 Unified Ledger v{} - Statement Ingestion", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📒 Replaying ledger {}...", config.ledger_path.display());
    let mut ledger = Ledger::open(&config.ledger_path)
        .with_context(|| format!("Failed to open ledger: {:?}", config.ledger_path))?;
    println!("✓ {} known transaction ids", ledger.index().len());
    if !ledger.replay_report().skipped.is_empty() {
        println!(
            "⚠️  {} unparseable ledger lines skipped",
            ledger.replay_report().skipped.len()
        );
    }

    println!("\n📂 Processing {}...", config.raw_dir.display());
    let orchestrator = Orchestrator::new(config)?;
    let report = orchestrator.run(&mut ledger)?;

    for file in &report.files {
        match (&file.file_error, &file.archived_to) {
            (Some(err), _) => println!("❌ {} - {}", file.path.display(), err),
            (None, Some(dest)) => println!("✓ {} → {}", file.summary(), dest.display()),
            (None, None) => println!("✓ {}", file.summary()),
        }
        for row in &file.errors {
            println!("   ⚠️  record {}: {}", row.position, row.reason);
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", report.summary());
    println!("✓ Ledger now holds {} distinct ids", ledger.index().len());

    Ok(())
}

fn run_index(config: &IngestConfig, verify: bool) -> Result<()> {
    println!("🔍 Ledger {}", config.ledger_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let ledger = Ledger::open(&config.ledger_path)
        .with_context(|| format!("Failed to open ledger: {:?}", config.ledger_path))?;
    let replay = ledger.replay_report();

    println!("✓ Entries:      {}", replay.entries);
    println!("✓ Distinct ids: {}", ledger.index().len());
    println!("✓ Overlapping:  {}", replay.entries.saturating_sub(ledger.index().len()));
    for line in &replay.skipped {
        println!("⚠️  line {} skipped: {}", line.line, line.reason);
    }

    if verify {
        let entries = ledger.entries()?;
        let mismatched: Vec<_> = entries.iter().filter(|e| !e.verify_id()).collect();
        if mismatched.is_empty() {
            println!("✅ All {} entries hash to their transaction_id", entries.len());
        } else {
            println!("❌ {} entries do not match their transaction_id:", mismatched.len());
            for entry in mismatched {
                println!("   {}", entry.transaction_id);
            }
        }
    }

    Ok(())
}
