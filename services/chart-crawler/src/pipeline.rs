//!
//! src/pipeline.rs
//!
//! Handlers for each scheduled run: the daily chart extraction, the
//! hourly popularity and tiktok metric sweeps, and ageing the short-term
//! database into the long-term one. Each handler runs inside
//! `run_boundary`, which turns any abort into a failed `RunReport`.
//!

use std::future::Future;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AppConfig, MatchingConfig, PersistenceConfig};
use crate::enrich::{artist_profile_from, CatalogSource, Enricher};
use crate::errors::CrawlerError;
use crate::fetch::{PageClient, SpotifyClient};
use crate::matcher::reconcile;
use crate::normalize::to_hundred_thousands;
use crate::novelty::{find_new, Novelty};
use crate::resolver::{resolve_all, TrackSearch};
use crate::scrape::{parse_profile_counts, parse_tag_views, parse_tokchart_page};
use crate::sink::ArchiveSink;
use crate::storage::{now, ConnectionFactory, LongTermStore, ShortTermStore, SHORT_TERM_TABLES};
use crate::types::{ChartEntry, Snapshot};

/// What a run hands back to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status_code: u16,
    pub message: String,
    pub comparison_tracks: Option<Novelty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    /// Tracks stored with some audio attributes or genres missing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial: Vec<String>
}

impl RunReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            message: message.into(),
            comparison_tracks: None,
            unresolved: Vec::new(),
            partial: Vec::new()
        }
    }

    pub fn failed(err: &CrawlerError) -> Self {
        Self {
            status_code: 400,
            message: err.to_string(),
            comparison_tracks: None,
            unresolved: Vec::new(),
            partial: Vec::new()
        }
    }
}

///
/// Wraps one run in a span carrying a fresh run id. The duration is logged
/// whichever way the run ends; errors become a 400 report.
///
pub async fn run_boundary<F>(command: &'static str, work: F) -> RunReport
where
    F: Future<Output = Result<RunReport, CrawlerError>>
{
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id, command);

    async move {
        let started = Instant::now();
        info!("run.start");
        let result = work.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(report) => {
                info!(elapsed_ms, status = report.status_code, "run.done");
                report
            }
            Err(e) => {
                error!(elapsed_ms, error = %e, fatal = e.is_fatal(), "run.failed");
                RunReport::failed(&e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Both databases and the archive, opened once per process.
pub struct Stores {
    pub short: ShortTermStore,
    pub long: LongTermStore,
    pub archive: ArchiveSink
}

impl Stores {
    pub async fn open(cfg: &PersistenceConfig) -> Result<Self, CrawlerError> {
        let short = ShortTermStore::init(ConnectionFactory::open(&cfg.short_term_url).await?).await?;
        let long  = LongTermStore::init(ConnectionFactory::open(&cfg.long_term_url).await?).await?;
        let archive = ArchiveSink::new(&cfg.archive_root, cfg.archive_level);
        Ok( Self { short, long, archive })
    }
}

///
/// Archives every short-term table under `date`, copies everything into
/// the long-term database and empties the short-term one. The returned
/// snapshot is what the next novelty comparison runs against; `None` when
/// there was nothing stored yet.
///
pub async fn age(stores: &Stores, date: NaiveDate) -> Result<Option<Snapshot>, CrawlerError> {
    if stores.short.is_empty().await? {
        info!("age.empty");
        return Ok(None);
    }
    let snapshot = stores.short.snapshot().await?;

    for table in SHORT_TERM_TABLES {
        let rows = stores.short.dump_table(table).await?;
        let path = stores.archive.write_table(date, table, &rows)?;
        debug!(table, path = %path.display(), "age.archived");
    }

    let inserted = stores.long.absorb(&stores.short).await?;
    stores.short.clear().await?;

    let long_term_tracks = stores.long.track_count().await?;

    info!(
        tracks = snapshot.track_names.len(), artists = snapshot.artist_names.len(),
        inserted, long_term_tracks, "age.done"
    );
    Ok(Some(snapshot))
}

pub async fn run_age(stores: &Stores) -> Result<RunReport, CrawlerError> {
    let today = chrono::Utc::now().date_naive();
    Ok(match age(stores, today).await? {
        Some(snap) => RunReport::ok(format!("aged {} tracks", snap.track_names.len())),
        None => RunReport::ok("nothing to age")
    })
}

/// Tokchart pages in order. A page that fails with a status is skipped.
pub async fn scrape_tokchart(pages: &PageClient) -> Result<Vec<ChartEntry>, CrawlerError> {
    let mut entries = Vec::new();
    for page in 1..=pages.cfg.tokchart_pages {
        let html = match pages.tokchart_page(page).await {
            Ok(html) => html,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(page, error = %e, "tokchart.page.failed");
                continue;
            }
        };
        let parsed = parse_tokchart_page(&html)?;
        debug!(page, entries = parsed.len(), "tokchart.page");
        entries.extend(parsed);
    }
    info!(entries = entries.len(), "tokchart.done");
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct DailyOutcome {
    pub spotify: Vec<ChartEntry>,
    pub tiktok_only: Vec<ChartEntry>,
    pub matched: usize,
    pub unresolved: Vec<String>,
    pub partial: Vec<String>,
    pub written: usize,
    pub novelty: Novelty
}

async fn persist(store: &ShortTermStore, entries: &[ChartEntry]) -> Result<usize, CrawlerError> {
    let mut written = 0;
    for entry in entries.iter().filter(|e| e.is_resolved()) {
        match store.write_entry(entry).await {
            Ok(()) => written += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(track = %entry.name, error = %e, "store.write.failed")
        }
    }
    Ok(written)
}

///
/// Everything the daily run does once both charts are in hand: enrich the
/// spotify chart, match the tiktok chart against it, resolve and enrich the
/// leftovers, then age yesterday's data, persist both charts and compare
/// the tiktok-only entries with the aged snapshot.
///
/// Ageing waits until every remote call has succeeded, so a run that
/// fails earlier leaves the short-term database untouched for the retry.
///
pub async fn process_charts<S, C>(
    search: &S,
    catalog: &C,
    stores: &Stores,
    today: NaiveDate,
    matching: &MatchingConfig,
    mut spotify: Vec<ChartEntry>,
    tiktok: Vec<ChartEntry>
) -> Result<DailyOutcome, CrawlerError>
where
    S: TrackSearch + ?Sized,
    C: CatalogSource + ?Sized
{
    let mut enricher = Enricher::new(catalog);
    let mut partial = enricher.enrich_all(&mut spotify).await?;

    let reconciliation = reconcile(&tiktok, &spotify, matching);
    info!(
        spotify = spotify.len(), tiktok = tiktok.len(),
        matched = reconciliation.matched_count, "match.done"
    );
    let spotify = reconciliation.spotify;
    let mut tiktok_only = reconciliation.unmatched;

    let unresolved = resolve_all(search, &mut tiktok_only).await?;
    partial.extend(enricher.enrich_all(&mut tiktok_only).await?);
    if !partial.is_empty() {
        warn!(count = partial.len(), tracks = ?partial, "enrich.partial");
    }

    let previous = age(stores, today).await?;

    let mut written = persist(&stores.short, &spotify).await?;
    written += persist(&stores.short, &tiktok_only).await?;

    let novelty = find_new(previous.as_ref(), &tiktok_only, matching.novelty_limit);
    match &novelty {
        Novelty::Unavailable => warn!(reason = %CrawlerError::ComparisonUnavailable, "novelty.unavailable"),
        Novelty::Found { new_tracks, new_artists } => info!(
            new_tracks = new_tracks.len(), new_artists = new_artists.len(), "novelty.done"
        )
    }

    Ok( DailyOutcome {
        spotify,
        tiktok_only,
        matched: reconciliation.matched_count,
        unresolved,
        partial,
        written,
        novelty
    })
}

fn daily_report(outcome: DailyOutcome) -> RunReport {
    let message = format!(
        "stored {} tracks: {} spotify, {} matched on tiktok, {} tiktok only, {} unresolved, {} partial",
        outcome.written, outcome.spotify.len(), outcome.matched,
        outcome.tiktok_only.len(), outcome.unresolved.len(), outcome.partial.len()
    );
    RunReport {
        status_code: 200,
        message,
        comparison_tracks: Some(outcome.novelty),
        unresolved: outcome.unresolved,
        partial: outcome.partial
    }
}

pub async fn run_daily(cfg: &AppConfig, stores: &Stores) -> Result<RunReport, CrawlerError> {
    let today = chrono::Utc::now().date_naive();

    let session = SpotifyClient::new(&cfg.http, &cfg.spotify)?.authorize().await?;
    let spotify = session.top_playlist_entries().await?;
    info!(entries = spotify.len(), "spotify.top.done");

    let pages  = PageClient::new(&cfg.http, &cfg.scrape)?;
    let tiktok = scrape_tokchart(&pages).await?;

    let outcome = process_charts(
        &session, &session, stores, today, &cfg.matching, spotify, tiktok
    ).await?;

    Ok(daily_report(outcome))
}

pub async fn run_popularity(cfg: &AppConfig, stores: &Stores) -> Result<RunReport, CrawlerError> {
    if stores.short.is_empty().await? {
        info!("popularity.empty");
        return Ok(RunReport::ok("no tracks stored"));
    }
    let session = SpotifyClient::new(&cfg.http, &cfg.spotify)?.authorize().await?;
    let recorded_at = now();

    let track_ids = stores.short.track_ids().await?;
    for id in &track_ids {
        let popularity = match session.track_popularity(id).await {
            Ok(p) => p,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(track = %id, error = %e, "popularity.track.failed");
                None
            }
        };
        stores.short.add_track_popularity(id, popularity, recorded_at).await?;
    }

    let artist_ids = stores.short.artist_ids().await?;
    for id in &artist_ids {
        let profile = match session.artist(id).await {
            Ok(value) => artist_profile_from(&value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(artist = %id, error = %e, "popularity.artist.failed");
                None
            }
        };
        let (popularity, followers) = profile
            .map(|p| (p.popularity, p.followers))
            .unwrap_or_default();
        stores.short.add_artist_popularity(id, popularity, followers, recorded_at).await?;
    }

    Ok(RunReport::ok(format!(
        "recorded popularity for {} tracks and {} artists", track_ids.len(), artist_ids.len()
    )))
}

pub async fn run_tiktok_metrics(cfg: &AppConfig, stores: &Stores) -> Result<RunReport, CrawlerError> {
    if stores.short.is_empty().await? {
        info!("tiktok.metrics.empty");
        return Ok(RunReport::ok("no tracks stored"));
    }
    let pages = PageClient::new(&cfg.http, &cfg.scrape)?;
    let recorded_at = now();

    let tracks = stores.short.read_entries().await?;
    for track in &tracks {
        let views = match pages.tag_page(&track.name).await {
            Ok(html) => parse_tag_views(&html)?,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(track = %track.name, error = %e, "tiktok.tag.failed");
                None
            }
        };
        stores.short
            .add_track_views(&track.id, views.map(to_hundred_thousands), recorded_at)
            .await?;
    }

    let artists = stores.short.read_artists().await?;
    for artist in &artists {
        let counts = match pages.profile_page(&artist.name).await {
            Ok(html) => parse_profile_counts(&html)?,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(artist = %artist.name, error = %e, "tiktok.profile.failed");
                Default::default()
            }
        };
        stores.short.add_artist_views(
            &artist.id,
            counts.followers.map(to_hundred_thousands),
            counts.likes.map(to_hundred_thousands),
            recorded_at
        ).await?;
    }

    Ok(RunReport::ok(format!(
        "recorded tiktok metrics for {} tracks and {} artists", tracks.len(), artists.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, LoggingConfig, RetryConfig, ScrapeConfig, SpotifyConfig};
    use crate::resolver::SearchOutcome;
    use crate::types::{ArtistRef, TrackIdentity};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSpotify {
        search: HashMap<String, TrackIdentity>,
        /// audio feature lookups for this track id lose the connection
        unreachable_track: Option<String>
    }

    #[async_trait]
    impl TrackSearch for FakeSpotify {
        async fn search_tracks(&self, query: &str) -> Result<SearchOutcome, CrawlerError> {
            Ok(SearchOutcome::Hits(self.search.get(query).cloned().into_iter().collect()))
        }
    }

    #[async_trait]
    impl CatalogSource for FakeSpotify {
        async fn audio_features(&self, track_id: &str) -> Result<Value, CrawlerError> {
            if self.unreachable_track.as_deref() == Some(track_id) {
                return Err(CrawlerError::Connection("api.spotify.com unreachable".into()));
            }
            Ok(json!({
                "danceability": 0.8, "energy": 0.7, "valence": 0.6,
                "tempo": 130.0, "speechiness": 0.05
            }))
        }

        async fn artist(&self, _artist_id: &str) -> Result<Value, CrawlerError> {
            Ok(json!({"genres": ["pop"], "popularity": 75, "followers": {"total": 10}}))
        }
    }

    fn identity(id: &str, artist: &str) -> TrackIdentity {
        TrackIdentity {
            track_id: id.to_string(),
            artists: vec![ArtistRef::new(format!("id-{artist}"), artist)]
        }
    }

    async fn memory_stores(dir: &std::path::Path) -> Stores {
        let cfg = PersistenceConfig {
            short_term_url: "sqlite::memory:".into(),
            long_term_url: "sqlite::memory:".into(),
            archive_root: dir.to_string_lossy().into_owned(),
            archive_level: 3
        };
        Stores::open(&cfg).await.unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    async fn seed_yesterday(stores: &Stores) {
        let greedy = ChartEntry::from_spotify(1, identity("gr-old", "Tate McRae"), "Greedy");
        stores.short.write_entry(&greedy).await.unwrap();
    }

    #[tokio::test]
    async fn daily_processing_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let stores = memory_stores(dir.path()).await;

        let mut search = HashMap::new();
        search.insert("track:Water artist:Tyla".to_string(), identity("water", "Tyla"));
        let fake = FakeSpotify { search, ..Default::default() };
        seed_yesterday(&stores).await;

        let spotify = vec![
            ChartEntry::from_spotify(1, identity("bl", "The Weeknd"), "Blinding Lights"),
            ChartEntry::from_spotify(2, identity("gr", "Tate McRae"), "Greedy"),
        ];
        let tiktok = vec![
            ChartEntry::from_tiktok(1, "Water", vec!["Tyla".into()]),
            ChartEntry::from_tiktok(2, "Blinding Lights", vec!["The Weeknd".into()]),
            ChartEntry::from_tiktok(3, "Mystery Sound", vec!["Nobody".into()]),
        ];

        let out = process_charts(
            &fake, &fake, &stores, day(), &MatchingConfig::default(), spotify, tiktok
        ).await.unwrap();

        assert_eq!(out.matched, 1);
        assert_eq!(out.spotify[0].tiktok_rank, Some(2));
        assert_eq!(out.unresolved, vec!["Mystery Sound"]);
        assert_eq!(out.written, 3);
        assert!(out.partial.is_empty());

        let Novelty::Found { new_tracks, new_artists } = out.novelty else {
            panic!("expected a comparison");
        };
        assert_eq!(new_tracks.len(), 1);
        assert_eq!(new_tracks[0].name, "Water");
        assert_eq!(new_artists, vec!["Tyla"]);

        let stored = stores.short.read_entries().await.unwrap();
        let water = stored.iter().find(|t| t.id == "water").unwrap();
        assert_eq!(water.tiktok_rank, Some(1));
        assert_eq!(water.spotify_rank, None);
        assert_eq!(water.attributes.tempo, Some(0.4));
        assert!(stored.iter().all(|t| t.id != "gr-old"));
        assert_eq!(stores.long.track_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_enrichment_leaves_yesterday_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let stores = memory_stores(dir.path()).await;
        seed_yesterday(&stores).await;

        let fake = FakeSpotify { unreachable_track: Some("bl".into()), ..Default::default() };
        let spotify = vec![ChartEntry::from_spotify(1, identity("bl", "The Weeknd"), "Blinding Lights")];

        let err = process_charts(
            &fake, &fake, &stores, day(), &MatchingConfig::default(), spotify, Vec::new()
        ).await.unwrap_err();
        assert!(err.is_fatal());

        assert_eq!(stores.short.track_names().await.unwrap(), vec!["Greedy"]);
        assert_eq!(stores.long.track_count().await.unwrap(), 0);
        assert!(!dir.path().join("2024/05/02").exists());

        // the retry still compares against yesterday
        let retry = process_charts(
            &FakeSpotify::default(), &FakeSpotify::default(), &stores, day(),
            &MatchingConfig::default(), Vec::new(), Vec::new()
        ).await.unwrap();
        assert!(matches!(retry.novelty, Novelty::Found { .. }));
    }

    #[tokio::test]
    async fn failed_authorization_keeps_short_term_rows() {
        let dir = tempfile::tempdir().unwrap();
        let stores = memory_stores(dir.path()).await;
        seed_yesterday(&stores).await;

        let unreachable = url::Url::parse("http://127.0.0.1:9/").unwrap();
        let cfg = AppConfig {
            spotify: SpotifyConfig {
                client_id: "bogus".into(),
                client_secret: "bogus".into(),
                token_url: unreachable.join("api/token").unwrap(),
                api_base: unreachable.join("v1/").unwrap(),
                top_playlist: "top".into()
            },
            scrape: ScrapeConfig {
                tokchart_base: unreachable.clone(),
                tokchart_pages: 1,
                tiktok_base: unreachable,
                user_agent: "Mozilla/5.0".into()
            },
            http: HttpConfig {
                retry: RetryConfig { max_attempts: 0, ..RetryConfig::default() },
                ..HttpConfig::default()
            },
            persistence: PersistenceConfig::default(),
            matching: MatchingConfig::default(),
            logging: LoggingConfig::default()
        };

        let report = run_boundary("daily", run_daily(&cfg, &stores)).await;
        assert_eq!(report.status_code, 400);

        assert!(!stores.short.is_empty().await.unwrap());
        assert_eq!(stores.short.track_names().await.unwrap(), vec!["Greedy"]);
        assert_eq!(stores.long.track_count().await.unwrap(), 0);
    }

    #[test]
    fn daily_report_lists_unresolved_and_partial_tracks() {
        let outcome = DailyOutcome {
            spotify: Vec::new(),
            tiktok_only: Vec::new(),
            matched: 0,
            unresolved: vec!["Mystery Sound".into()],
            partial: vec!["Water".into()],
            written: 1,
            novelty: Novelty::Unavailable
        };
        let report = daily_report(outcome);
        assert!(report.message.ends_with("1 unresolved, 1 partial"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["partial"], json!(["Water"]));
        assert_eq!(json["unresolved"], json!(["Mystery Sound"]));

        let ok = serde_json::to_value(RunReport::ok("nothing to age")).unwrap();
        assert!(ok.get("partial").is_none());
    }

    #[tokio::test]
    async fn first_run_has_no_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let stores = memory_stores(dir.path()).await;
        let fake = FakeSpotify::default();

        let out = process_charts(
            &fake, &fake, &stores, day(), &MatchingConfig::default(), Vec::new(), Vec::new()
        ).await.unwrap();
        assert_eq!(out.novelty, Novelty::Unavailable);
        assert_eq!(out.written, 0);
    }

    #[tokio::test]
    async fn ageing_archives_copies_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let stores = memory_stores(dir.path()).await;
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        assert_eq!(age(&stores, date).await.unwrap(), None);

        let entry = ChartEntry::from_spotify(1, identity("t1", "Tyla"), "Water");
        stores.short.write_entry(&entry).await.unwrap();

        let snapshot = age(&stores, date).await.unwrap().unwrap();
        assert_eq!(snapshot.track_names, vec!["Water"]);
        assert_eq!(snapshot.artist_names, vec!["Tyla"]);

        assert!(stores.short.is_empty().await.unwrap());
        assert_eq!(stores.long.track_count().await.unwrap(), 1);
        for table in SHORT_TERM_TABLES {
            assert!(dir.path().join(format!("2024/05/01/{table}.json.zst")).exists());
        }
    }

    #[tokio::test]
    async fn boundary_turns_errors_into_failed_reports() {
        let report = run_boundary("daily", async {
            Err(CrawlerError::Connection("db unreachable".into()))
        }).await;
        assert_eq!(report.status_code, 400);
        assert!(report.comparison_tracks.is_none());
        assert!(report.message.contains("db unreachable"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["comparison_tracks"], Value::Null);

        let ok = run_boundary("age", async { Ok(RunReport::ok("nothing to age")) }).await;
        assert_eq!(ok.status_code, 200);
    }
}
