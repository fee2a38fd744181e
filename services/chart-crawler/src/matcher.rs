//!
//! src/matcher.rs
//!
//! Reconciles the tiktok chart against the spotify chart. A pair matches
//! when the names are byte-equal or their normalized similarity ratio
//! exceeds the configured threshold. The first spotify entry scanned wins.
//!
//! Inputs are left untouched; the result carries fresh copies.
//!

use tracing::debug;

use crate::config::MatchingConfig;
use crate::normalize::{apply_title_norm, similarity_ratio};
use crate::types::ChartEntry;

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Spotify chart with `tiktok_rank` filled in for matched entries.
    pub spotify: Vec<ChartEntry>,
    /// TikTok entries with no counterpart, in scrape order.
    pub unmatched: Vec<ChartEntry>,
    pub matched_count: usize
}

pub fn names_match(tiktok_name: &str, spotify_name: &str, cfg: &MatchingConfig) -> bool {
    if tiktok_name == spotify_name {
        return true;
    }
    let a = apply_title_norm(tiktok_name, cfg.title_norm);
    let b = apply_title_norm(spotify_name, cfg.title_norm);
    similarity_ratio(&a, &b) > cfg.threshold
}

pub fn reconcile(
    tiktok: &[ChartEntry],
    spotify: &[ChartEntry],
    cfg: &MatchingConfig
) -> Reconciliation {
    let mut spotify = spotify.to_vec();
    let mut unmatched = Vec::new();
    let mut matched_count = 0;

    for tiktok_entry in tiktok {
        let hit = spotify.iter_mut()
            .find(|s| names_match(&tiktok_entry.name, &s.name, cfg));

        match hit {
            Some(spotify_entry) => {
                debug!(
                    tiktok = %tiktok_entry.name, spotify = %spotify_entry.name,
                    tiktok_rank = ?tiktok_entry.tiktok_rank, "match.hit"
                );
                spotify_entry.tiktok_rank = tiktok_entry.tiktok_rank;
                matched_count += 1;
            }
            None => unmatched.push(tiktok_entry.clone())
        }
    }

    Reconciliation { spotify, unmatched, matched_count }
}
