//!
//! src/resolver.rs
//!
//! Resolves tiktok chart entries that have no spotify chart counterpart
//! to spotify identities by searching with progressively looser queries.
//!

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::CrawlerError;
use crate::normalize::relaxed_title;
use crate::types::{ChartEntry, TrackIdentity};

/// What one search request came back with.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Hits(Vec<TrackIdentity>),
    /// The service answered with an inline error object instead of results.
    Rejected(String)
}

/// Free-text track search.
#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search_tracks(&self, query: &str) -> Result<SearchOutcome, CrawlerError>;
}

/// The queries tried for one chart name, in the order they are issued.
pub fn search_queries(name: &str, candidate_artists: &[String]) -> Vec<String> {
    let mut queries = Vec::with_capacity(3);
    if let Some(artist) = candidate_artists.first() {
        queries.push(format!("track:{name} artist:{artist}"));
        queries.push(format!("track:{} artist:{artist}", relaxed_title(name)));
    }
    queries.push(format!("track:{name}"));
    queries
}

///
/// Walks the query ladder and stops at the first non-empty result. A
/// rejected search ends the ladder too: the remaining queries are not
/// issued and the name counts as not found.
///
pub async fn resolve<S: TrackSearch + ?Sized>(
    search: &S,
    name: &str,
    candidate_artists: &[String]
) -> Result<TrackIdentity, CrawlerError> {
    for (step, query) in search_queries(name, candidate_artists).iter().enumerate() {
        debug!(track = %name, step, %query, "resolve.query");
        match search.search_tracks(query).await? {
            SearchOutcome::Hits(mut hits) if !hits.is_empty() => return Ok(hits.swap_remove(0)),
            SearchOutcome::Hits(_) => debug!(track = %name, step, "resolve.empty"),
            SearchOutcome::Rejected(reason) => {
                warn!(track = %name, step, %reason, "resolve.rejected");
                break;
            }
        }
    }
    Err(CrawlerError::LookupExhausted(name.to_string()))
}

///
/// Resolves every entry in place. Entries that exhaust the ladder keep no
/// identity and their names are returned for reporting. Fatal errors stop
/// the run; a search request that fails on its own counts as a miss.
///
pub async fn resolve_all<S: TrackSearch + ?Sized>(
    search: &S,
    entries: &mut [ChartEntry]
) -> Result<Vec<String>, CrawlerError> {
    let mut unresolved = Vec::new();

    for entry in entries.iter_mut().filter(|e| !e.is_resolved()) {
        match resolve(search, &entry.name, &entry.candidate_artists).await {
            Ok(identity) => {
                debug!(track = %entry.name, id = %identity.track_id, "resolve.done");
                entry.apply_identity(identity);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(CrawlerError::LookupExhausted(name)) => {
                warn!(
                    track = %name, artist = ?entry.first_artist(),
                    "resolve.exhausted"
                );
                unresolved.push(name);
            }
            Err(e) => {
                warn!(track = %entry.name, error = %e, "resolve.failed");
                unresolved.push(entry.name.clone());
            }
        }
    }

    info!(
        total = entries.len(), unresolved = unresolved.len(), "resolve.summary"
    );
    Ok(unresolved)
}
