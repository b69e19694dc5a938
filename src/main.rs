//! resilient-fetch command line client
//!
//! Issues requests through a `FetchClient` so the cache, circuit breaker,
//! retry policy and deduplicator can be observed from a terminal.
//!
//! ```text
//! resilient-fetch get <url> [--repeat N] [--interval-ms M] [--param k=v] [--config path]
//! resilient-fetch check-config <path>
//! ```

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use resilient_fetch::config::{load_config, ClientConfig};
use resilient_fetch::observability::logging;
use resilient_fetch::{FetchClient, RequestDescriptor, ResourceSnapshot};

#[derive(Parser)]
#[command(name = "resilient-fetch")]
#[command(about = "Fetch URLs through a caching, circuit-breaking HTTP client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL, optionally several times to exercise the cache
    Get {
        url: String,

        /// Number of fetches
        #[arg(short, long, default_value_t = 1)]
        repeat: u32,

        /// Pause between fetches
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    CheckConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Get {
            url,
            repeat,
            interval_ms,
            params,
            config,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => ClientConfig::default(),
            };
            if let Err(e) = logging::init(&config.observability) {
                eprintln!("Logging disabled: {e}");
            }

            let descriptor = params
                .into_iter()
                .fold(RequestDescriptor::get(url.as_str()), |d, (k, v)| d.param(k, v));
            run_get(config, descriptor, repeat, Duration::from_millis(interval_ms)).await?;
        }
        Commands::CheckConfig { path } => {
            let config = load_config(&path)?;
            println!("{} is valid", path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_get(
    config: ClientConfig,
    descriptor: RequestDescriptor,
    repeat: u32,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = FetchClient::new(config)?;
    let key = descriptor.cache_key();

    for iteration in 1..=repeat.max(1) {
        // A fresh resource per round, so the shared cache decides whether to call.
        let resource = client
            .resource::<Value>()
            .endpoint_breaker(&descriptor.url)
            .build();
        let cached_before = client.cache().peek(&key).map(|lookup| lookup.is_stale);

        resource.load(Some(descriptor.clone())).await;
        print_round(
            iteration,
            cached_before,
            &resource.snapshot(),
            resource.breaker().state().as_str(),
        );

        if iteration < repeat {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(())
}

fn print_round(
    iteration: u32,
    cached_before: Option<bool>,
    snapshot: &ResourceSnapshot<Value>,
    breaker: &str,
) {
    let cache = match cached_before {
        None => "miss",
        Some(false) => "fresh",
        Some(true) => "stale",
    };
    println!(
        "#{iteration} status={:?} code={} cache={cache} breaker={breaker} disabled={}",
        snapshot.status,
        snapshot
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string()),
        snapshot.disabled,
    );

    if let Some(error) = &snapshot.error {
        eprintln!("  error: {error}");
    }
    if let Some(value) = &snapshot.value {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("  unprintable body: {e}"),
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}
