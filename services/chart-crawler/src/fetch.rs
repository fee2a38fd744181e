//!
//! src/fetch.rs
//!
//! Defines methods for hitting the spotify web api and the scraped chart
//! pages, returning unparsed data and handling retries.
//!

use std::time::Duration;

use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{Client, header, redirect, RequestBuilder};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::{HttpConfig, RetryConfig, ScrapeConfig, SpotifyConfig};
use crate::enrich::CatalogSource;
use crate::errors::CrawlerError;
use crate::resolver::{SearchOutcome, TrackSearch};
use crate::types::{ArtistRef, ChartEntry, TrackIdentity};

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder  {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, CrawlerError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| CrawlerError::Config(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, CrawlerError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

fn join(base: &Url, path: &str) -> Result<Url, CrawlerError> {
    base.join(path)
        .map_err(|e| CrawlerError::Config(format!("join {path} onto {base}: {e}")))
}

/// Simple function to generate random wait for http_with_retry
fn generate_backoff(base: Duration, attempt: usize, rng: &mut SmallRng) -> Duration {
    let exp = (1_u32 << attempt.min(6)) * base;
    let jitter = rng.gen_range(50..=200);
    exp + Duration::from_millis(jitter)
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

///
/// Sends the request, retrying 429/5xx and transport errors with jittered
/// exponential backoff. Client errors whose body is a json object with an
/// `error` key are handed back as the body; spotify reports lookup
/// failures that way.
///
pub async fn http_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<Value, CrawlerError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| CrawlerError::Config("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp.json::<Value>().await?);
                }
                if !is_retryable(status) || attempt >= retry.max_attempts {
                    let url = resp.url().to_string();
                    let body = resp.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        if let Ok(v) = serde_json::from_str::<Value>(&body) {
                            if v.get("error").is_some() {
                                return Ok(v);
                            }
                        }
                    }
                    return Err(CrawlerError::Http {
                        status: status.as_u16(),
                        context: format!("{url} after {attempt} retries")
                    });
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt >= retry.max_attempts {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(backoff = ?backoff.as_millis(), error = %e, "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Same retry policy for pages that come back as html.
pub async fn text_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<String, CrawlerError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| CrawlerError::Config("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => return Ok(resp.text().await?),
            Ok(resp) => {
                let status = resp.status();
                if !is_retryable(status) || attempt >= retry.max_attempts {
                    return Err(CrawlerError::Http {
                        status: status.as_u16(),
                        context: resp.url().to_string()
                    });
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt >= retry.max_attempts {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, &mut rng);
                warn!(backoff = ?backoff.as_millis(), error = %e, "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig,
    pub retry: RetryConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, CrawlerError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone()
        })
    }

    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// Client-credentials exchange; the session carries the bearer token.
    pub async fn authorize(&self) -> Result<SpotifySession, CrawlerError> {
        let response = http_with_retry(self.token_request(), &self.retry).await?;
        let bearer = response["access_token"].as_str()
            .ok_or_else(|| CrawlerError::Connection(
                "spotify token response had no access_token".into()
            ))?
            .to_string();
        debug!("spotify.authorized");
        Ok( SpotifySession { client: self.clone(), bearer })
    }

    /// GET /v1/playlists/{id}/tracks
    pub fn playlist_tracks(&self, playlist_id: &str, bearer: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = join(&self.cfg.api_base, &format!("playlists/{playlist_id}/tracks"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/tracks/{id}
    pub fn track(&self, track_id: &str, bearer: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = join(&self.cfg.api_base, &format!("tracks/{track_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/audio-features/{id}
    pub fn audio_features(&self, track_id: &str, bearer: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = join(&self.cfg.api_base, &format!("audio-features/{track_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/artists/{id}
    pub fn artist(&self, artist_id: &str, bearer: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = join(&self.cfg.api_base, &format!("artists/{artist_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/search?type=track&q=...&limit=
    pub fn search(&self, query: &str, limit: u32, bearer: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = join(&self.cfg.api_base, "search")?;
        let limit = limit.to_string();
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("type", "track"),
            ("q", query),
            ("limit", limit.as_str()),
        ]))
    }
}

/// Artists array of a spotify track object as `ArtistRef`s.
fn artists_of(track: &Value) -> Vec<ArtistRef> {
    track.get("artists")
        .and_then(Value::as_array)
        .map(|arr| arr.iter()
            .filter_map(|a| Some(ArtistRef::new(
                a.get("id")?.as_str()?,
                a.get("name")?.as_str()?
            )))
            .collect())
        .unwrap_or_default()
}

/// A search response as hits, or `Rejected` with the service's message
/// when the body is an inline `error` object. A payload without
/// `tracks.items` has no hits.
pub fn parse_search(value: &Value) -> SearchOutcome {
    if let Some(err) = value.get("error") {
        let message = err.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return SearchOutcome::Rejected(message);
    }
    let hits = value.pointer("/tracks/items")
        .and_then(Value::as_array)
        .map(|items| items.iter()
            .filter(|item| item.get("error").is_none())
            .filter_map(|item| Some(TrackIdentity {
                track_id: item.get("id")?.as_str()?.to_string(),
                artists: artists_of(item)
            }))
            .collect())
        .unwrap_or_default();
    SearchOutcome::Hits(hits)
}

/// Chart entries from a playlist tracks page, ranked by position.
/// Null tracks (removed from the catalog) do not take a rank.
pub fn parse_playlist_entries(value: &Value) -> Vec<ChartEntry> {
    let items = value.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut entries = Vec::with_capacity(items.len());
    for track in items.iter().filter_map(|item| item.get("track")).filter(|t| !t.is_null()) {
        let (Some(id), Some(name)) = (
            track.get("id").and_then(Value::as_str),
            track.get("name").and_then(Value::as_str)
        ) else {
            continue;
        };
        let rank = entries.len() as u32 + 1;
        entries.push(ChartEntry::from_spotify(rank, TrackIdentity {
            track_id: id.to_string(),
            artists: artists_of(track)
        }, name));
    }
    entries
}

/// Authorized spotify access for one run.
#[derive(Clone, Debug)]
pub struct SpotifySession {
    client: SpotifyClient,
    bearer: String
}

impl SpotifySession {
    pub async fn top_playlist_entries(&self) -> Result<Vec<ChartEntry>, CrawlerError> {
        let playlist = self.client.cfg.top_playlist.clone();
        let request = self.client.playlist_tracks(&playlist, &self.bearer)?;
        let value = http_with_retry(request, &self.client.retry).await?;
        if let Some(err) = value.get("error") {
            return Err(CrawlerError::Parse(format!("playlist {playlist}: {err}")));
        }
        Ok(parse_playlist_entries(&value))
    }

    /// Track popularity, `None` when the payload has none.
    pub async fn track_popularity(&self, track_id: &str) -> Result<Option<i64>, CrawlerError> {
        let request = self.client.track(track_id, &self.bearer)?;
        let value = http_with_retry(request, &self.client.retry).await?;
        Ok(value.get("popularity").and_then(Value::as_i64))
    }
}

#[async_trait]
impl TrackSearch for SpotifySession {
    async fn search_tracks(&self, query: &str) -> Result<SearchOutcome, CrawlerError> {
        let request = self.client.search(query, 1, &self.bearer)?;
        let value = http_with_retry(request, &self.client.retry).await?;
        Ok(parse_search(&value))
    }
}

#[async_trait]
impl CatalogSource for SpotifySession {
    async fn audio_features(&self, track_id: &str) -> Result<Value, CrawlerError> {
        let request = self.client.audio_features(track_id, &self.bearer)?;
        http_with_retry(request, &self.client.retry).await
    }

    async fn artist(&self, artist_id: &str) -> Result<Value, CrawlerError> {
        let request = self.client.artist(artist_id, &self.bearer)?;
        http_with_retry(request, &self.client.retry).await
    }
}

///
/// Client for html pages: the tokchart ranking and tiktok tag / profile
/// pages. They need a browser-ish user agent.
///
#[derive(Clone, Debug)]
pub struct PageClient {
    pub http: Client,
    pub cfg: ScrapeConfig,
    pub retry: RetryConfig
}

impl PageClient {
    pub fn new(http_cfg: &HttpConfig, cfg: &ScrapeConfig) -> Result<Self, CrawlerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&cfg.user_agent)
                .map_err(|e| CrawlerError::Config(format!("invalid user agent: {e}")))?
        );
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("text/html"));
        let http = client_with_headers(http_cfg, headers)?;
        Ok( Self { http, cfg: cfg.clone(), retry: http_cfg.retry.clone() })
    }

    /// GET {tokchart}/?page={n}
    pub async fn tokchart_page(&self, page: u32) -> Result<String, CrawlerError> {
        let request = self.http.get(self.cfg.tokchart_base.clone())
            .query(&[("page", page.to_string())]);
        text_with_retry(request, &self.retry).await
    }

    /// GET {tiktok}/tag/{name}
    pub async fn tag_page(&self, track_name: &str) -> Result<String, CrawlerError> {
        let url = tag_url(&self.cfg.tiktok_base, track_name)?;
        text_with_retry(self.http.get(url), &self.retry).await
    }

    /// GET {tiktok}/@{handle}
    pub async fn profile_page(&self, artist_name: &str) -> Result<String, CrawlerError> {
        let url = profile_url(&self.cfg.tiktok_base, artist_name)?;
        text_with_retry(self.http.get(url), &self.retry).await
    }
}

/// Appends percent-encoded path segments, so `?`, `#` and `/` inside a
/// title stay part of the path.
fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, CrawlerError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| CrawlerError::Config(format!("{base} cannot take path segments")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn tag_url(base: &Url, track_name: &str) -> Result<Url, CrawlerError> {
    let name = track_name.to_lowercase();
    with_segments(base, &["tag", name.as_str()])
}

pub fn profile_url(base: &Url, artist_name: &str) -> Result<Url, CrawlerError> {
    let handle = format!("@{}", artist_name.replace(' ', "").to_lowercase());
    with_segments(base, &[handle.as_str()])
}
