#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `vicalert`: live Victorian fire and emergency incidents in the terminal.
//!
//! Wires the feed pipeline, pin engine, durable store and aggregator
//! together. Logging goes through `pretty_env_logger`; set `RUST_LOG` to
//! see it.

mod render;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use vicalert_aggregator::notify::{AudioNotifier, NotificationSink, SilentSink};
use vicalert_aggregator::{Aggregator, CycleOutcome};
use vicalert_feed::cache::ResponseCache;
use vicalert_feed::config::FeedConfig;
use vicalert_feed::proxy::ProxyFetchClient;
use vicalert_feed::rate_limit::RateLimiter;
use vicalert_feed::{FeedPipeline, IncidentSource, parser};
use vicalert_geocoder::ChainGeocoder;
use vicalert_geocoder::service_registry::enabled_services;
use vicalert_incident_models::clock::{Clock, SystemClock};
use vicalert_pins::{DefaultPinPolicy, PinEngine};
use vicalert_storage::records::AudioSettings;
use vicalert_storage::{FileStore, KeyValueStore, keys, save};

#[derive(Parser)]
#[command(name = "vicalert", about = "Live Victorian fire and emergency incidents")]
struct Cli {
    /// Feed configuration TOML (defaults to the built-in configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for persisted state (overrides `VICALERT_DATA_DIR`)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed and show incidents as they change (default)
    Watch,
    /// Run one refresh cycle, print the result, and exit
    Once {
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
        /// Page of unpinned incidents to print (1-based)
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// List pins that are still valid
    Pins,
    /// Silence new-incident notifications
    Mute,
    /// Re-enable new-incident notifications
    Unmute,
    /// Parse a saved feed file and print its incidents
    Parse {
        /// Path to the raw feed text
        file: PathBuf,
        /// Print incidents as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => {
            let store = open_store(cli.data_dir.as_deref())?;
            let source = build_source(cli.config.as_deref(), &clock)?;
            let notifier = Arc::new(AudioNotifier::terminal(store.clone()));
            let aggregator = build_aggregator(&clock, &store, notifier);
            watch::run(aggregator, source, store, clock).await?;
        }
        Commands::Once { json, page } => {
            let store = open_store(cli.data_dir.as_deref())?;
            let source = build_source(cli.config.as_deref(), &clock)?;
            let mut aggregator = build_aggregator(&clock, &store, Arc::new(SilentSink));
            run_once(&mut aggregator, source.as_ref()).await?;

            let view = aggregator.view();
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                render::print_page(&view, page.saturating_sub(1));
            }
        }
        Commands::Pins => {
            let store = open_store(cli.data_dir.as_deref())?;
            let engine = PinEngine::load(store, Arc::new(DefaultPinPolicy));
            let now = clock.now_millis();
            let pins = engine.current_valid_pins(now);
            if pins.is_empty() {
                println!("No pinned incidents.");
            }
            for pin in pins {
                let remaining = (pin.expires_at() - now) / 60_000;
                match engine.snapshot(&pin.id) {
                    Some(incident) => {
                        println!("{remaining:>3}m left  {}", render::incident_line(incident));
                    }
                    None => println!("{remaining:>3}m left  {}", pin.id),
                }
            }
        }
        command @ (Commands::Mute | Commands::Unmute) => {
            let muted = matches!(command, Commands::Mute);
            let store = open_store(cli.data_dir.as_deref())?;
            save(store.as_ref(), keys::AUDIO_SETTINGS, &AudioSettings { muted })?;
            println!("Notifications {}.", if muted { "muted" } else { "unmuted" });
        }
        Commands::Parse { file, json } => {
            let text = std::fs::read_to_string(&file)?;
            let incidents = parser::parse(&text)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&incidents)?);
            } else {
                for incident in &incidents {
                    println!("{}", render::incident_line(incident));
                }
                log::info!("Parsed {} incidents from {}", incidents.len(), file.display());
            }
        }
    }

    Ok(())
}

fn open_store(data_dir: Option<&Path>) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    let store = match data_dir {
        Some(dir) => FileStore::open(dir)?,
        None => FileStore::open_default()?,
    };
    Ok(Arc::new(store))
}

fn build_source(
    config_path: Option<&Path>,
    clock: &Arc<dyn Clock>,
) -> Result<Arc<dyn IncidentSource>, Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => FeedConfig::from_path(path)?,
        None => FeedConfig::embedded()?,
    }
    .with_env_overrides();
    log::debug!("Feed {} via {} proxies", config.feed_url, config.proxies.len());

    let cache = Arc::new(ResponseCache::new(clock.clone()));
    let limiter = Arc::new(RateLimiter::new(clock.clone()));
    let client = ProxyFetchClient::new(&config, cache, limiter)?;
    let geocoder = ChainGeocoder::from_services(&enabled_services())?;

    Ok(Arc::new(FeedPipeline::new(client, Arc::new(geocoder))))
}

fn build_aggregator(
    clock: &Arc<dyn Clock>,
    store: &Arc<dyn KeyValueStore>,
    notifier: Arc<dyn NotificationSink>,
) -> Aggregator {
    let pins = PinEngine::load(store.clone(), Arc::new(DefaultPinPolicy));
    Aggregator::new(clock.clone(), pins, notifier)
}

/// Drives one cycle to completion, honouring the retry backoff.
async fn run_once(
    aggregator: &mut Aggregator,
    source: &dyn IncidentSource,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut generation = aggregator.refresh();
    loop {
        let result = source.fetch_incidents().await;
        match aggregator.complete_cycle(generation, result) {
            CycleOutcome::Updated { .. } | CycleOutcome::Superseded => return Ok(()),
            CycleOutcome::RetryScheduled { delay, .. } => {
                tokio::time::sleep(delay).await;
                match aggregator.retry() {
                    Some(next) => generation = next,
                    None => return Ok(()),
                }
            }
            CycleOutcome::Failed => {
                let message = aggregator
                    .view()
                    .last_error
                    .unwrap_or_else(|| "feed unavailable".to_string());
                return Err(message.into());
            }
        }
    }
}
