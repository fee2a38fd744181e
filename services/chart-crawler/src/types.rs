//!
//! src/types.rs
//!
//! Records that flow through a run: chart entries from both sources,
//! the identities the spotify search resolves them to, and the snapshot
//! of the previous day that novelty is measured against.
//!

use serde::{Deserialize, Serialize};

/// Identity of an artist on spotify plus whatever enrichment found for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub followers: Option<i64>
}

impl ArtistRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            genres: Vec::new(),
            popularity: None,
            followers: None
        }
    }
}

// Spotify audio features kept per track. Each one may be missing when the
// api response was incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioAttributes {
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub valence: Option<f64>,
    pub tempo: Option<f64>,          // raw bpm
    pub speechiness: Option<f64>
}

pub const AUDIO_FEATURE_KEYS: [&str; 5] =
    ["danceability", "energy", "valence", "tempo", "speechiness"];

impl AudioAttributes {
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "danceability" => self.danceability,
            "energy"       => self.energy,
            "valence"      => self.valence,
            "tempo"        => self.tempo,
            "speechiness"  => self.speechiness,
            _ => None
        }
    }

    pub fn set(&mut self, key: &str, value: f64) {
        match key {
            "danceability" => self.danceability = Some(value),
            "energy"       => self.energy = Some(value),
            "valence"      => self.valence = Some(value),
            "tempo"        => self.tempo = Some(value),
            "speechiness"  => self.speechiness = Some(value),
            _ => {}
        }
    }

    pub fn missing_keys(&self) -> Vec<String> {
        AUDIO_FEATURE_KEYS.iter()
            .filter(|k| self.get(k).is_none())
            .map(|k| k.to_string())
            .collect()
    }
}

/// What the spotify search resolved a chart name to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub track_id: String,
    pub artists: Vec<ArtistRef>
}

///
/// One track appearance on a chart. Chart membership is derived from the
/// ranks so that `in_spotify` and `spotify_rank` can never disagree.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartEntry {
    pub name: String,
    pub spotify_rank: Option<u32>,
    pub tiktok_rank: Option<u32>,
    pub candidate_artists: Vec<String>,
    pub resolved_track_id: Option<String>,
    pub resolved_artists: Vec<ArtistRef>,
    pub audio_attributes: Option<AudioAttributes>
}

impl ChartEntry {
    /// Entry taken from the spotify playlist, already carrying its identity.
    pub fn from_spotify(rank: u32, identity: TrackIdentity, name: impl Into<String>) -> Self {
        let candidate_artists = identity.artists.iter().map(|a| a.name.clone()).collect();
        Self {
            name: name.into(),
            spotify_rank: Some(rank),
            tiktok_rank: None,
            candidate_artists,
            resolved_track_id: Some(identity.track_id),
            resolved_artists: identity.artists,
            audio_attributes: None
        }
    }

    /// Entry scraped from the tiktok chart; unresolved until searched.
    pub fn from_tiktok(rank: u32, name: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            name: name.into(),
            spotify_rank: None,
            tiktok_rank: Some(rank),
            candidate_artists: artists,
            resolved_track_id: None,
            resolved_artists: Vec::new(),
            audio_attributes: None
        }
    }

    pub fn in_spotify(&self) -> bool { self.spotify_rank.is_some() }

    pub fn in_tiktok(&self) -> bool { self.tiktok_rank.is_some() }

    pub fn is_resolved(&self) -> bool { self.resolved_track_id.is_some() }

    pub fn first_artist(&self) -> Option<&str> {
        self.candidate_artists.first().map(String::as_str)
    }

    pub fn apply_identity(&mut self, identity: TrackIdentity) {
        self.resolved_track_id = Some(identity.track_id);
        self.resolved_artists  = identity.artists;
    }
}

/// Names persisted by the previous run, read back before it is aged out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub track_names: Vec<String>,
    pub artist_names: Vec<String>
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_follows_ranks() {
        let tiktok = ChartEntry::from_tiktok(3, "Song", vec!["Artist".into()]);
        assert!(tiktok.in_tiktok());
        assert!(!tiktok.in_spotify());
        assert!(!tiktok.is_resolved());
        assert_eq!(tiktok.first_artist(), Some("Artist"));

        let identity = TrackIdentity {
            track_id: "abc".into(),
            artists: vec![ArtistRef::new("a1", "Artist")]
        };
        let spotify = ChartEntry::from_spotify(1, identity, "Song");
        assert!(spotify.in_spotify());
        assert!(!spotify.in_tiktok());
        assert!(spotify.is_resolved());
        assert_eq!(spotify.candidate_artists, vec!["Artist".to_string()]);
    }

    #[test]
    fn missing_audio_keys_are_reported_in_order() {
        let mut attrs = AudioAttributes::default();
        attrs.set("energy", 0.4);
        attrs.set("tempo", 120.0);
        assert_eq!(attrs.missing_keys(), vec!["danceability", "valence", "speechiness"]);
        assert_eq!(attrs.get("tempo"), Some(120.0));
    }
}
