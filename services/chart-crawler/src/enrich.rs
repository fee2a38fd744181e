//!
//! src/enrich.rs
//!
//! Merges spotify audio features and artist profiles into resolved
//! chart entries. Missing pieces are logged and left empty.
//!

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::CrawlerError;
use crate::types::{ArtistRef, AudioAttributes, ChartEntry, AUDIO_FEATURE_KEYS};

/// Catalog lookups needed to enrich an entry, returned unparsed.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn audio_features(&self, track_id: &str) -> Result<Value, CrawlerError>;
    async fn artist(&self, artist_id: &str) -> Result<Value, CrawlerError>;
}

pub fn audio_attributes_from(value: &Value) -> AudioAttributes {
    let mut attrs = AudioAttributes::default();
    for key in AUDIO_FEATURE_KEYS {
        if let Some(v) = value.get(key).and_then(Value::as_f64) {
            attrs.set(key, v);
        }
    }
    attrs
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtistProfile {
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub followers: Option<i64>
}

pub fn artist_profile_from(value: &Value) -> Option<ArtistProfile> {
    let genres = value.get("genres")?.as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    Some(ArtistProfile {
        genres,
        popularity: value.get("popularity").and_then(Value::as_i64),
        followers: value.pointer("/followers/total").and_then(Value::as_i64)
    })
}

fn apply_profile(artist: &mut ArtistRef, profile: &ArtistProfile) {
    artist.genres     = profile.genres.clone();
    artist.popularity = profile.popularity;
    artist.followers  = profile.followers;
}

pub struct Enricher<'a, C: CatalogSource + ?Sized> {
    source: &'a C,
    artists: HashMap<String, Option<ArtistProfile>>
}

impl<'a, C: CatalogSource + ?Sized> Enricher<'a, C> {
    pub fn new(source: &'a C) -> Self {
        Self { source, artists: HashMap::new() }
    }

    ///
    /// Enriches one entry. Returns `PartialEnrichment` listing what could
    /// not be filled; the entry keeps everything that was retrieved.
    ///
    pub async fn enrich_entry(&mut self, entry: &mut ChartEntry) -> Result<(), CrawlerError> {
        let Some(track_id) = entry.resolved_track_id.clone() else {
            warn!(track = %entry.name, "enrich.skip.unresolved");
            return Ok(());
        };
        let mut missing = Vec::new();

        match self.source.audio_features(&track_id).await {
            Ok(value) => {
                let attrs = audio_attributes_from(&value);
                for key in attrs.missing_keys() {
                    warn!(track = %entry.name, %key, "enrich.missing_key");
                    missing.push(key);
                }
                entry.audio_attributes = Some(attrs);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(track = %entry.name, error = %e, "enrich.features.failed");
                missing.push("audio_features".to_string());
            }
        }

        for artist in entry.resolved_artists.iter_mut() {
            match self.profile(&artist.id).await? {
                Some(profile) => apply_profile(artist, &profile),
                None => {
                    warn!(track = %entry.name, artist = %artist.name, "enrich.missing_genres");
                    missing.push(format!("genres:{}", artist.id));
                }
            }
        }

        if missing.is_empty() {
            debug!(track = %entry.name, "enrich.done");
            Ok(())
        } else {
            Err(CrawlerError::PartialEnrichment { track: entry.name.clone(), missing })
        }
    }

    /// Artist profiles are cached per run; the same artist shows up on
    /// several chart entries.
    async fn profile(&mut self, artist_id: &str) -> Result<Option<ArtistProfile>, CrawlerError> {
        if let Some(cached) = self.artists.get(artist_id) {
            return Ok(cached.clone());
        }
        let profile = match self.source.artist(artist_id).await {
            Ok(value) => artist_profile_from(&value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(artist = %artist_id, error = %e, "enrich.artist.failed");
                None
            }
        };
        self.artists.insert(artist_id.to_string(), profile.clone());
        Ok(profile)
    }

    /// Enriches every resolved entry, returning the names left partial.
    pub async fn enrich_all(&mut self, entries: &mut [ChartEntry]) -> Result<Vec<String>, CrawlerError> {
        let mut partial = Vec::new();
        for entry in entries.iter_mut().filter(|e| e.is_resolved()) {
            match self.enrich_entry(entry).await {
                Ok(()) => {}
                Err(CrawlerError::PartialEnrichment { track, .. }) => partial.push(track),
                Err(e) => return Err(e)
            }
        }
        Ok(partial)
    }
}
