//! Command-line harness for the PwaKit service worker.
//!
//! Provides commands for:
//! - Priming the cache partitions of a live site and reporting what was stored
//! - Showing which strategy a request would be handled with
//! - Listing the assets primed at install
//! - Printing the effective worker configuration
//!
//! ## Usage
//!
//! ```bash
//! # Install and activate against a running site
//! sw-harness prime --origin http://localhost:8080/ --report prime.json
//!
//! # Classify a request
//! sw-harness classify http://localhost:8080/images/hero.webp --destination image
//!
//! # List install-time assets and their partitions
//! sw-harness manifest --config sw.json
//!
//! # Dump the effective config
//! sw-harness config --config sw.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use pwakit_common::{init_logging, with_timeout, LogConfig, LogFormat, PwaKitError};
use pwakit_net::{Destination, HttpNetwork, LoaderConfig, Request};
use pwakit_sw::{
    classify, MemoryCacheBackend, Partition, ServiceWorker, ServiceWorkerState, Strategy, SwConfig,
    WorkerHost,
};
use serde::Serialize;
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "sw-harness")]
#[command(about = "Harness for the PwaKit offline service worker")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: Format,

    /// Worker config file (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => LogFormat::Pretty,
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate a worker against a live origin
    Prime {
        /// Site origin, overriding the config
        #[arg(short, long)]
        origin: Option<Url>,
        /// Seconds allowed for install plus activate
        #[arg(short, long, default_value = "60")]
        timeout: u64,
        /// Output JSON report path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the strategy a request would be handled with
    Classify {
        /// Request URL
        url: Url,
        /// Request destination (document, image, script, style, ...)
        #[arg(short, long, default_value = "")]
        destination: String,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// List the assets primed at install, with their partitions
    Manifest,

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into()));

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Prime {
            origin,
            timeout,
            report,
        } => {
            let config = match origin {
                Some(origin) => config.with_origin(origin),
                None => config,
            };
            let result = prime(config, Duration::from_secs(timeout)).await?;

            println!("Prime result:");
            println!("  Version:  {}", result.version);
            println!("  State:    {:?}", result.state);
            for partition in &result.partitions {
                println!("  {:<28} {} entries", partition.name, partition.entries);
            }
            if let Some(error) = &result.error {
                println!("  Error:    {error}");
            }

            if let Some(report_path) = report {
                let json = serde_json::to_string_pretty(&result)?;
                std::fs::write(&report_path, json)?;
                println!("Report written to: {}", report_path.display());
            }

            if result.error.is_some() {
                std::process::exit(1);
            }
        }

        Commands::Classify {
            url,
            destination,
            method,
        } => {
            let destination: Destination = destination.parse()?;
            let method = http::Method::from_bytes(method.to_uppercase().as_bytes())?;
            let mut request = Request::get(url).destination(destination);
            request.method = method;

            match classify(&request, &config.static_path_markers) {
                Some(strategy) => println!("{}", describe(strategy)),
                None => println!("passthrough"),
            }
        }

        Commands::Manifest => {
            for entry in config.manifest.entries() {
                let url = match &config.origin {
                    Some(origin) => origin.join(entry.url)?.to_string(),
                    None => entry.url.to_string(),
                };
                println!("{:<8} {url}", entry.group.partition().label());
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> pwakit_common::Result<SwConfig> {
    let Some(path) = path else {
        return Ok(SwConfig::default());
    };
    let config = SwConfig::load(path)?;
    info!(path = %path.display(), version = %config.version, "Loaded config");
    Ok(config)
}

fn describe(strategy: Strategy) -> String {
    match strategy {
        Strategy::NetworkFirst => "network-first".to_string(),
        Strategy::CacheFirst(partition) => format!("cache-first ({partition})"),
        Strategy::StaleWhileRevalidate => "stale-while-revalidate".to_string(),
    }
}

/// Outcome of a prime run.
#[derive(Debug, Serialize)]
struct PrimeReport {
    origin: String,
    version: String,
    state: ServiceWorkerState,
    elapsed_ms: u64,
    partitions: Vec<PartitionReport>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PartitionReport {
    partition: Partition,
    name: String,
    entries: usize,
}

async fn prime(
    config: SwConfig,
    timeout: Duration,
) -> Result<PrimeReport, Box<dyn std::error::Error>> {
    let network = Arc::new(HttpNetwork::new(LoaderConfig::default())?);
    let (host, _events) = WorkerHost::new(Arc::new(MemoryCacheBackend::new()), network);

    let origin = config.origin()?.to_string();
    let worker = ServiceWorker::new(config, &host)?;
    let started = std::time::Instant::now();

    info!(origin = %origin, "Priming caches");
    let outcome = with_timeout(timeout, || async {
        worker.install().await?;
        worker.activate().await
    })
    .await;

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(PwaKitError::from(e)),
        Err(e) => Some(e),
    };
    if let Some(e) = &error {
        error!(category = e.category(), error = %e, "Prime failed");
    }
    let error = error.map(|e| e.to_string());

    let mut partitions = Vec::new();
    for partition in Partition::ALL {
        let handle = worker.registry().open(partition).await?;
        partitions.push(PartitionReport {
            partition,
            name: handle.name().to_string(),
            entries: handle.len().await,
        });
    }

    Ok(PrimeReport {
        origin,
        version: worker.registry().version().to_string(),
        state: worker.state(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        partitions,
        error,
    })
}
