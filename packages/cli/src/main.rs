#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the tripgeo address enricher.
//!
//! Every flag falls back to an environment variable, so the binary works
//! both interactively and as a scheduled container job.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, ValueEnum};
use tripgeo_enrich::{EnrichConfig, RunMode};
use tripgeo_geocoder::amap::AmapClient;
use tripgeo_geocoder::osm::OsmClient;
use tripgeo_store::pg::PgStore;

#[derive(Parser)]
#[command(name = "tripgeo", about = "Address enrichment for telemetry drives and charges")]
struct Cli {
    /// Postgres connection string for the telemetry database
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Rows per batch (and per transaction)
    #[arg(long, env = "BATCH", default_value = "10")]
    batch: i64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "5")]
    timeout: u64,

    /// Retry attempts per geocoding request
    #[arg(long, env = "HTTP_RETRY", default_value = "5")]
    retry: u32,

    /// Seconds to sleep between passes; 0 runs once and exits
    #[arg(long, env = "INTERVAL", default_value = "0")]
    interval: u64,

    /// Which driver(s) to run
    #[arg(long, env = "MODE", value_enum, default_value = "gap-fill")]
    mode: Mode,

    /// Amap API key; required for the refresh driver
    #[arg(long, env = "AMAP_KEY", default_value = "")]
    amap_key: String,

    /// Only refresh addresses updated on or after this date (YYYY-MM-DD)
    #[arg(long, env = "SINCE", default_value = "1970-01-01", value_parser = parse_since)]
    since: NaiveDateTime,

    /// User-Agent header for geocoding requests
    #[arg(long, env = "USER_AGENT", default_value = "tripgeo/0.1")]
    user_agent: String,

    /// Nominatim base URL override
    #[arg(long, env = "OSM_URL", default_value = tripgeo_geocoder::osm::DEFAULT_BASE_URL)]
    osm_url: String,

    /// Amap base URL override
    #[arg(long, env = "AMAP_URL", default_value = tripgeo_geocoder::amap::DEFAULT_BASE_URL)]
    amap_url: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Link drives and charging sessions to addresses
    GapFill,
    /// Re-resolve existing addresses through Amap
    Refresh,
    /// Gap-fill first, then refresh
    Both,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::GapFill => Self::GapFill,
            Mode::Refresh => Self::Refresh,
            Mode::Both => Self::Both,
        }
    }
}

fn parse_since(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    Ok(NaiveDate::parse_from_str(value, "%Y-%m-%d")?.and_time(NaiveTime::MIN))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let client = reqwest::Client::builder()
        .user_agent(&cli.user_agent)
        .timeout(Duration::from_secs(cli.timeout))
        .build()?;

    let store = PgStore::connect(&cli.database_url).await?;
    let osm = OsmClient::new(client.clone(), cli.osm_url, cli.retry);
    let amap = AmapClient::new(client, cli.amap_url, cli.amap_key.clone(), cli.retry);

    let config = EnrichConfig {
        batch_size: cli.batch,
        mode: cli.mode.into(),
        since: cli.since,
        refresh_key: cli.amap_key,
        poll_interval: Duration::from_secs(cli.interval),
    };

    log::info!("starting enrichment run");
    tripgeo_enrich::run(&store, &osm, &amap, &config).await?;
    log::info!("all done");

    Ok(())
}
