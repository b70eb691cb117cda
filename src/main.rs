mod config;
mod crawler;
mod db;
mod error;
mod extract;
mod models;
mod monitor;
mod notify;
mod pacing;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use crawler::HttpFetcher;
use db::Database;
use monitor::Monitor;
use notify::TelegramChannel;
use pacing::RandomPacer;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "listing-watch")]
#[command(about = "Watch a classifieds site for new listings and push them to Telegram")]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the listings database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Also append log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Monitor continuously until interrupted
    Run,

    /// Run a single monitoring cycle and exit
    Once,

    /// List stored listings that have not been notified yet
    Pending {
        /// Number of listings to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show a stored listing
    Show {
        /// Listing ID
        id: String,
    },
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Console output, plus a plain-text copy in `log_file` when one is given.
fn subscriber(filter: EnvFilter, log_file: Option<File>) -> impl Subscriber + Send + Sync + 'static {
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::new(file))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = log_file.map(open_log_file).transpose()?;
    subscriber(filter, file).init();
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Let the current keyword finish, then stop
    Finish,
    Abort,
}

fn on_interrupt(shutdown: &AtomicBool) -> Interrupt {
    if shutdown.swap(true, Ordering::SeqCst) {
        Interrupt::Abort
    } else {
        Interrupt::Finish
    }
}

/// Sets the returned flag on the first Ctrl-C and exits on the second. The
/// handler lives on its own thread so the monitor loop can stay fully blocking.
fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("shutdown-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "could not listen for interrupt signal");
                        break;
                    }
                    match on_interrupt(&flag) {
                        Interrupt::Finish => {
                            info!("received interrupt, finishing current work before exit (interrupt again to abort)")
                        }
                        Interrupt::Abort => {
                            warn!("second interrupt, exiting immediately");
                            std::process::exit(130);
                        }
                    }
                }
            });
        })
        .context("Failed to spawn signal thread")?;

    Ok(shutdown)
}

fn open_database(path: Option<PathBuf>) -> Result<Database> {
    let path = path.unwrap_or_else(Database::default_path);
    let db = Database::open(&path)?;
    db.init()?;
    Ok(db)
}

fn build_monitor(
    config: &Config,
    db: Database,
    shutdown: Arc<AtomicBool>,
) -> Result<Monitor<HttpFetcher, TelegramChannel, RandomPacer>> {
    let fetcher = HttpFetcher::new(config)?;
    let channel = TelegramChannel::new(config)?;
    Monitor::new(config, fetcher, channel, RandomPacer, db, shutdown)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(cli.log_file.as_deref().or(config.log_file.as_deref()))?;

    match cli.command {
        Commands::Init => {
            let db = open_database(cli.db)?;
            println!(
                "Database initialized at {} ({} listings)",
                db.path().display(),
                db.count()?
            );
            db.close()?;
        }

        Commands::Run => {
            config.validate(true)?;
            let shutdown = install_shutdown_handler()?;
            let db = open_database(cli.db)?;
            info!(
                db = %db.path().display(),
                keywords = config.keywords.len(),
                interval_secs = config.check_interval_secs,
                "starting listing monitor"
            );

            let mut monitor = match build_monitor(&config, db, shutdown) {
                Ok(monitor) => monitor,
                Err(e) => {
                    error!(error = %e, "failed to start monitor");
                    return Err(e);
                }
            };
            monitor.run(config.check_interval());
            monitor.close()?;
            info!("monitor stopped cleanly");
        }

        Commands::Once => {
            config.validate(true)?;
            let shutdown = install_shutdown_handler()?;
            let db = open_database(cli.db)?;
            let mut monitor = build_monitor(&config, db, shutdown)?;
            let report = monitor.run_cycle();
            monitor.close()?;
            println!(
                "Cycle finished in {:.1}s: {} new, {} notified, {} failed",
                report.elapsed.as_secs_f64(),
                report.new_listings,
                report.notified + report.reconciled,
                report.notify_failures
            );
        }

        Commands::Pending { limit } => {
            let db = open_database(cli.db)?;
            let pending = db.pending_notifications(limit)?;
            if pending.is_empty() {
                println!("No pending listings.");
            } else {
                println!("{:<12} {:<14} {:<30} {:<14} {:<20}", "ID", "KEYWORD", "TITLE", "PRICE", "SEEN");
                println!("{}", "-".repeat(94));
                for record in pending {
                    println!(
                        "{:<12} {:<14} {:<30} {:<14} {:<20}",
                        truncate(&record.id, 10),
                        truncate(&record.keyword, 12),
                        truncate(&record.title, 28),
                        truncate(&record.price, 12),
                        record.created_at
                    );
                }
            }
            db.close()?;
        }

        Commands::Show { id } => {
            let db = open_database(cli.db)?;
            let record = db
                .get(&id)?
                .ok_or_else(|| anyhow!("Listing '{}' not found", id))?;
            println!("Listing {}", record.id);
            println!("Title: {}", record.title);
            println!("Price: {}", record.price);
            println!("Keyword: {}", record.keyword);
            if let Some(region) = &record.region {
                println!("Region: {}", region);
            }
            if let Some(url) = &record.url {
                println!("URL: {}", url);
            }
            if let Some(image) = &record.image_url {
                println!("Image: {}", image);
            }
            println!("Seen: {}", record.created_at);
            println!("Notified: {}", if record.notified { "yes" } else { "no" });
            db.close()?;
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
