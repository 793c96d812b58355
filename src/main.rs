mod config;
mod db;
mod error;
mod feed;
mod monitor;
mod pages;
mod transport;
mod upload;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use config::Settings;
use feed::FeedEntry;
use monitor::Monitor;
use transport::HttpTransport;
use upload::DropboxUploader;

#[derive(Parser)]
#[command(name = "tippy_monitor", about = "Turn new comic posts from a blog feed into CBZ archives")]
struct Cli {
    /// Configuration file (default: ./tippy.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the feed once and archive every new dated post
    Run,
    /// Check the feed repeatedly
    Watch {
        /// Minutes between checks
        #[arg(short, long, default_value = "60")]
        interval_mins: u64,
    },
    /// Archive a single post page, bypassing the feed
    Fetch {
        /// Post page URL
        url: String,
        /// Title used for the archive name
        title: String,
    },
    /// Run the page-size filter on an existing archive
    Dedup {
        archive: PathBuf,
        /// Output directory (default: the configured final directory)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Show monitor statistics
    Stats,
}

fn init_tracing(log_file: Option<&Path>) {
    let file_layer = log_file
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        });

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();
}

fn open_monitor(settings: &Settings) -> anyhow::Result<Monitor<HttpTransport>> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    let transport = Arc::new(HttpTransport::new(&settings.user_agent)?);
    Ok(Monitor::new(
        transport,
        settings.clone(),
        conn,
        DropboxUploader::from_env(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(settings.log_file());

    let t0 = Instant::now();

    let result = match cli.command {
        Commands::Run => {
            let monitor = open_monitor(&settings)?;
            let stats = monitor.check_new_posts().await?;
            println!(
                "{} new posts: {} archived, {} skipped.",
                stats.candidates, stats.archived, stats.failed
            );
            Ok(())
        }
        Commands::Watch { interval_mins } => {
            let monitor = open_monitor(&settings)?;
            let interval = Duration::from_secs(interval_mins.max(1) * 60);
            loop {
                match monitor.check_new_posts().await {
                    Ok(stats) => info!("Archived {} new posts", stats.archived),
                    Err(e) => warn!("Check failed: {:#}", e),
                }
                info!("Next check in {}", format_duration(interval));
                tokio::time::sleep(interval).await;
            }
        }
        Commands::Fetch { url, title } => {
            let monitor = open_monitor(&settings)?;
            let entry = FeedEntry {
                id: url.clone(),
                title,
                link: url,
            };
            match monitor.process_entry(&entry).await {
                Some(path) => println!("Archive: {}", path.display()),
                None => println!("No archive produced for {}", entry.link),
            }
            Ok(())
        }
        Commands::Dedup { archive, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| settings.final_dir());
            match pages::dedup::try_deduplicate(&archive, &out_dir, &settings.dedup_policy())? {
                Some(report) => println!(
                    "{}: kept {}, dropped {} (reference area {} px)",
                    report.path.display(),
                    report.kept,
                    report.dropped,
                    report.reference_area
                ),
                None => println!("No images in {}; left unchanged.", archive.display()),
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Seen posts: {}", s.seen);
            println!("Last check: {}", s.last_check.as_deref().unwrap_or("never"));
            if let Some((title, at)) = s.latest {
                println!("Latest:     {} ({})", title, at);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
