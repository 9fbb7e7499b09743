//! sbs: BaseStation feed processor with live tracker, message log, and REST API.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sbs_core::config::{self, Config};
use sbs_core::pipeline::{Ingested, MessageLog, Pipeline};
use sbs_core::tracker::Tracker;
use sbs_core::transform::{Payload, Transformer};
use sbs_core::types::icao_to_string;

mod db;
mod feed;
mod web;

/// Bounded queue between the pipeline and the SQLite writer.
const LOG_QUEUE: usize = 4096;

#[derive(Parser)]
#[command(name = "sbs", version, about = "BaseStation (SBS) feed processor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a receiver's SBS port and serve the live aircraft table
    Serve {
        /// Receiver host
        #[arg(long, env = "SBS_FEED_HOST")]
        feed_host: Option<String>,

        /// Receiver SBS port
        #[arg(long, env = "SBS_FEED_PORT")]
        feed_port: Option<u16>,

        /// IANA time zone of the receiver's timestamps
        #[arg(long, env = "SBS_TIMEZONE")]
        timezone: Option<String>,

        /// HTTP listen host
        #[arg(long)]
        host: Option<String>,

        /// HTTP listen port
        #[arg(long)]
        port: Option<u16>,

        /// SQLite message log path
        #[arg(long, env = "SBS_DB_PATH")]
        db_path: Option<String>,

        /// Start with message logging off (toggle at /control/persist)
        #[arg(long)]
        no_persist: bool,
    },

    /// Replay SBS records from a file (or - for stdin) and print the aircraft table
    Decode {
        file: PathBuf,

        /// Print each parsed message instead of the summary table
        #[arg(short, long)]
        raw: bool,

        /// IANA time zone of the record timestamps
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Show message log statistics
    Stats {
        /// SQLite message log path
        #[arg(long, env = "SBS_DB_PATH")]
        db_path: Option<String>,
    },

    /// Write the current configuration to ~/.sbs-feed/config.yaml
    InitConfig,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config();

    match cli.command {
        Commands::Serve {
            feed_host,
            feed_port,
            timezone,
            host,
            port,
            db_path,
            no_persist,
        } => {
            if let Some(h) = feed_host {
                cfg.feed.host = h;
            }
            if let Some(p) = feed_port {
                cfg.feed.port = p;
            }
            if let Some(tz) = timezone {
                cfg.feed.timezone = tz;
            }
            if let Some(h) = host {
                cfg.dashboard.host = h;
            }
            if let Some(p) = port {
                cfg.dashboard.port = p;
            }
            if let Some(p) = db_path {
                cfg.database.path = p;
            }
            if no_persist {
                cfg.database.persist = false;
            }
            cmd_serve(cfg)
        }
        Commands::Decode {
            file,
            raw,
            timezone,
        } => {
            if let Some(tz) = timezone {
                cfg.feed.timezone = tz;
            }
            cmd_decode(file, raw, &cfg)
        }
        Commands::Stats { db_path } => {
            cmd_stats(db_path.as_deref().unwrap_or(&cfg.database.path))
        }
        Commands::InitConfig => cmd_init_config(&cfg),
    }
}

fn time_zone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|e| {
        eprintln!("Unknown time zone {name}: {e}");
        std::process::exit(1);
    })
}

fn cmd_serve(cfg: Config) {
    let tz = time_zone(&cfg.feed.timezone);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async move {
        let (log, writer) = match db::spawn_writer(&cfg.database.path, LOG_QUEUE) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Error opening database {}: {e}", cfg.database.path);
                std::process::exit(1);
            }
        };

        let pipeline = Arc::new(Pipeline::new(
            Transformer::new(tz),
            Arc::new(Tracker::new()),
            Some(Arc::new(log) as Arc<dyn MessageLog>),
            cfg.database.persist,
        ));

        let feed_addr = format!("{}:{}", cfg.feed.host, cfg.feed.port);
        let retry = Duration::from_secs(cfg.feed.reconnect_secs.max(1));
        let feed_task = tokio::spawn(feed::run(pipeline.clone(), feed_addr, retry));

        let state = Arc::new(web::AppState {
            pipeline,
            db_path: Some(cfg.database.path.clone()),
            staleness: cfg.snapshot.staleness(),
        });

        let served = web::serve(
            state,
            &cfg.dashboard.host,
            cfg.dashboard.port,
            web::shutdown_signal(),
        )
        .await;
        feed_task.abort();
        let _ = feed_task.await;
        // last pipeline handle is gone, the writer drains and stops
        let _ = writer.await;

        if let Err(e) = served {
            error!(
                "HTTP server on {}:{} failed: {e}",
                cfg.dashboard.host, cfg.dashboard.port
            );
            std::process::exit(1);
        }
    });
}

fn cmd_decode(file: PathBuf, raw: bool, cfg: &Config) {
    let tz = time_zone(&cfg.feed.timezone);

    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let pipeline = Pipeline::in_memory(Transformer::new(tz));
    let mut filtered = 0u64;

    for line in reader.split(b'\n') {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };

        match pipeline.ingest_detailed(Some(Payload::Bytes(&line))) {
            Ingested::Filtered => filtered += 1,
            Ingested::Invalid(e) if raw => println!("invalid: {e}"),
            Ingested::Accepted(msg) if raw => println!("{msg:?}"),
            _ => {}
        }
    }

    if !raw {
        print_summary(&pipeline, filtered);
    }
}

fn print_summary(pipeline: &Pipeline, filtered: u64) {
    let counts = pipeline.counts();
    // newest first
    let aircraft = pipeline.tracker().all();

    println!();
    println!(
        "Records: {} valid, {} invalid, {} blank",
        counts.valid, counts.invalid, filtered
    );
    println!("Aircraft with a position: {}", aircraft.len());

    if aircraft.is_empty() {
        return;
    }

    let now = aircraft
        .iter()
        .map(|a| a.last_update)
        .max()
        .unwrap_or_else(Utc::now);

    println!();
    let mut table = Table::new();
    table.set_header(vec![
        "ICAO", "Callsign", "Alt (ft)", "Lat", "Lon", "First seen", "Last update", "Age (s)",
    ]);

    for ac in &aircraft {
        table.add_row(vec![
            Cell::new(icao_to_string(&ac.icao)),
            Cell::new(ac.call_sign.as_deref().unwrap_or("-")),
            Cell::new(
                ac.altitude
                    .map(|a| format!("{a:.0}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(format!("{:.4}", ac.position.latitude())),
            Cell::new(format!("{:.4}", ac.position.longitude())),
            Cell::new(ac.first_seen.format("%H:%M:%S")),
            Cell::new(ac.last_update.format("%H:%M:%S")),
            Cell::new(ac.age(now).num_seconds()),
        ]);
    }

    println!("{table}");
}

fn cmd_stats(db_path: &str) {
    let database = db::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    });

    let stats = database.stats();
    info!("read stats from {db_path}");

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Messages:  {}", stats.messages);
    println!("  Aircraft:  {}", stats.aircraft);

    if !stats.by_kind.is_empty() {
        println!();
        let mut table = Table::new();
        table.set_header(vec!["Kind", "Messages"]);
        for k in &stats.by_kind {
            table.add_row(vec![Cell::new(&k.kind), Cell::new(k.count)]);
        }
        println!("{table}");
    }
}

fn cmd_init_config(cfg: &Config) {
    match config::save_config(cfg) {
        Ok(path) => println!("Wrote {}", path.display()),
        Err(e) => {
            eprintln!("Error writing config: {e}");
            std::process::exit(1);
        }
    }
}
