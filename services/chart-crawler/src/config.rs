//!
//! src/config.rs
//!
//! Loads the environment into typed configuration at program start.
//! Everything except the spotify credentials has a default.
//!

use url::Url;
use std::time;
use crate::errors::CrawlerError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 4;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: usize = 3;
pub const RETRY_BASE_BACKOFF: u64 = 500;

pub const TOP_50_PLAYLIST: &str = "37i9dQZEVXbMDoHDwVN2tF";
pub const TOKCHART_PAGES: u32 = 11;
pub const MATCH_THRESHOLD: f64 = 80.0;
pub const NOVELTY_LIMIT: usize = 10;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, CrawlerError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CrawlerError::Config(format!("{s} was not set"))),
    }
}

fn env_or(s: &str, default: &str) -> String {
    std::env::var(s)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(s: &str, default: T) -> T {
    match std::env::var(s) {
        Ok(v) => v.trim().parse::<T>().unwrap_or(default),
        Err(_) => default
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

fn parse_url(var: &str, default: &str) -> Result<Url, CrawlerError> {
    let raw = env_or(var, default);
    Url::parse(&raw)
        .map_err(|e| CrawlerError::Config(format!("{var} invalid {e}")))
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
    pub top_playlist: String
}

fn build_spotify() -> Result<SpotifyConfig, CrawlerError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;

    let token_url = parse_url(
        "SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token")?;
    let mut api_base = parse_url(
        "SPOTIFY_API_BASE", "https://api.spotify.com/v1/")?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(CrawlerError::Config)?;
    ensure_https(&api_base).map_err(CrawlerError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(CrawlerError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(CrawlerError::Config)?;
    ensure_trailing_slash(&mut api_base);

    let top_playlist = env_or("SPOTIFY_TOP_PLAYLIST", TOP_50_PLAYLIST);

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base, top_playlist })
}

///
/// Configuration for the scraped chart and profile pages
///
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub tokchart_base: Url,      // https://tokchart.com/
    pub tokchart_pages: u32,     // pages 1..=n are fetched
    pub tiktok_base: Url,        // https://www.tiktok.com/
    pub user_agent: String
}

fn build_scrape() -> Result<ScrapeConfig, CrawlerError> {
    let mut tokchart_base = parse_url("TOKCHART_BASE_URL", "https://tokchart.com/")?;
    let mut tiktok_base   = parse_url("TIKTOK_BASE_URL", "https://www.tiktok.com/")?;

    ensure_https(&tokchart_base).map_err(CrawlerError::Config)?;
    ensure_https(&tiktok_base).map_err(CrawlerError::Config)?;
    ensure_trailing_slash(&mut tokchart_base);
    ensure_trailing_slash(&mut tiktok_base);

    Ok( ScrapeConfig {
        tokchart_base,
        tokchart_pages: env_parse("TOKCHART_PAGES", TOKCHART_PAGES),
        tiktok_base,
        user_agent: env_or("SCRAPE_USER_AGENT", "Mozilla/5.0")
    })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: time::Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

///
/// Configuration for the two sqlite databases and the on-disk archive
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub short_term_url: String,
    pub long_term_url: String,
    pub archive_root: String,
    pub archive_level: i32
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            short_term_url: "sqlite:./data/short_term.db".to_string(),
            long_term_url: "sqlite:./data/long_term.db".to_string(),
            archive_root: "./data/archive".to_string(),
            archive_level: 3
        }
    }
}

fn build_persistence() -> PersistenceConfig {
    let defaults = PersistenceConfig::default();
    PersistenceConfig {
        short_term_url: env_or("SHORT_TERM_DB_URL", &defaults.short_term_url),
        long_term_url: env_or("LONG_TERM_DB_URL", &defaults.long_term_url),
        archive_root: env_or("ARCHIVE_ROOT", &defaults.archive_root),
        archive_level: env_parse("ARCHIVE_ZSTD_LEVEL", defaults.archive_level)
    }
}

///
/// Configuration for matching tiktok chart names against spotify chart names
///

//
// enum for how to normalize a title before the similarity ratio
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleNorm {
    Lower,
    LowerStripPunct,
    None,
}

impl TitleNorm {
    pub fn parse(s: &str) -> Option<TitleNorm> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lower" => Some(TitleNorm::Lower),
            "lower-strip-punct" => Some(TitleNorm::LowerStripPunct),
            "none" => Some(TitleNorm::None),
            _ => None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchingConfig {
    pub threshold: f64,          // 0..100; ratio must exceed this
    pub title_norm: TitleNorm,   // how to normalize similar titles
    pub novelty_limit: usize,    // how many new tracks are reported
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
            title_norm: TitleNorm::Lower,
            novelty_limit: NOVELTY_LIMIT,
        }
    }
}

fn build_matching() -> MatchingConfig {
    let defaults = MatchingConfig::default();
    let title_norm = std::env::var("MATCH_TITLE_NORM")
        .ok()
        .and_then(|s| TitleNorm::parse(&s))
        .unwrap_or(defaults.title_norm);

    MatchingConfig {
        threshold: env_parse("MATCH_THRESHOLD", defaults.threshold),
        title_norm,
        novelty_limit: env_parse("NOVELTY_LIMIT", defaults.novelty_limit),
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,chart_crawler=debug,sqlx=warn,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: false,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let mut logging = LoggingConfig::default();
    if env_or("LOG_FORMAT", "json").eq_ignore_ascii_case("pretty") {
        logging.format = LogFormat::Pretty;
        logging.with_ansi = true;
    }
    logging
}

///
/// AppConfig which holds everything the handlers need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub scrape: ScrapeConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub matching: MatchingConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, CrawlerError> {
    dotenvy::dotenv().ok();

    let spotify     = build_spotify()?;
    let scrape      = build_scrape()?;
    let http        = HttpConfig::default();
    let persistence = build_persistence();
    let matching    = build_matching();
    let logging     = build_logging();

    Ok( AppConfig { spotify, scrape, http, persistence, matching, logging } )
}
