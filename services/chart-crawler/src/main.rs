//!
//! src/main.rs
//!
//! Entry point for the chart crawler. Each scheduled job is a subcommand;
//! the run report goes to stdout as json, logs go to stderr.
//!
//! Also holds the live testbenches, which only hit the network with
//! LIVE_HTTP=1.
//!

mod config;
mod errors;
mod logging;
mod types;

mod normalize;
mod matcher;
mod resolver;
mod enrich;
mod novelty;

mod fetch;
mod scrape;
mod storage;
mod sink;
mod pipeline;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::errors::CrawlerError;
use crate::pipeline::{run_boundary, RunReport, Stores};

/// Spotify / TikTok chart crawler
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, Debug)]
enum Command {
    /// Crawl both charts, match and resolve them, then age yesterday's data and store today's
    Daily,
    /// Record spotify popularity for every stored track and artist
    Popularity,
    /// Record tiktok views for stored tracks and followers/likes for artists
    TiktokMetrics,
    /// Archive and move the short-term database into the long-term one
    Age,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Daily => "daily",
            Command::Popularity => "popularity",
            Command::TiktokMetrics => "tiktok-metrics",
            Command::Age => "age",
        }
    }
}

fn emit(report: &RunReport) -> Result<ExitCode, CrawlerError> {
    println!("{}", serde_json::to_string(report)?);
    Ok(if report.status_code == 200 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[tokio::main]
async fn main() -> Result<ExitCode, CrawlerError> {
    let cli = Cli::parse();

    let cfgs = match config::load_config() {
        Ok(cfgs) => cfgs,
        Err(e) => return emit(&RunReport::failed(&e)),
    };
    let _logger = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service = "chart-crawler",
        version = %env!("CARGO_PKG_VERSION"),
        command = cli.command.name(),
        "starting"
    );

    let report = run_boundary(cli.command.name(), async {
        let stores = Stores::open(&cfgs.persistence).await?;
        match cli.command {
            Command::Daily => pipeline::run_daily(&cfgs, &stores).await,
            Command::Popularity => pipeline::run_popularity(&cfgs, &stores).await,
            Command::TiktokMetrics => pipeline::run_tiktok_metrics(&cfgs, &stores).await,
            Command::Age => pipeline::run_age(&stores).await,
        }
    }).await;

    emit(&report)
}

/// Unit Tests
/// Live Testbenches
#[cfg(test)]
mod tests {
    use crate::CrawlerError;
    use crate::resolver::{SearchOutcome, TrackSearch};
    use super::*;

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["chart-crawler", "tiktok-metrics"]).unwrap();
        assert_eq!(cli.command.name(), "tiktok-metrics");
        assert!(Cli::try_parse_from(["chart-crawler", "weekly"]).is_err());
    }

    #[tokio::test]
    #[allow(dead_code)]
    async fn spotify_top_playlist_testbench() -> Result<(), CrawlerError> {
        dotenvy::dotenv().ok();

        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let session = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?
            .authorize()
            .await?;

        let entries = session.top_playlist_entries().await?;
        assert!(!entries.is_empty());
        println!("top: {}", serde_json::to_string_pretty(&entries[..3.min(entries.len())])?);

        // Blinding Lights - The Weeknd
        let outcome = session.search_tracks("track:Blinding Lights artist:The Weeknd").await?;
        assert!(matches!(outcome, SearchOutcome::Hits(ref hits) if !hits.is_empty()));
        println!("search: {outcome:?}");

        Ok(())
    }

    #[tokio::test]
    #[allow(dead_code)]
    async fn tokchart_page_testbench() -> Result<(), CrawlerError> {
        dotenvy::dotenv().ok();

        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let pages = fetch::PageClient::new(&cfgs.http, &cfgs.scrape)?;

        let html = pages.tokchart_page(1).await?;
        let entries = scrape::parse_tokchart_page(&html)?;
        println!("page 1: {} entries", entries.len());
        for e in entries.iter().take(5) {
            println!("  #{:?} {} by {:?}", e.tiktok_rank, e.name, e.candidate_artists);
        }

        Ok(())
    }
}
