//!
//! src/novelty.rs
//!
//! Finds what appeared on the tiktok chart since the previous snapshot.
//!

use serde::{Deserialize, Serialize};

use crate::types::{ChartEntry, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrack {
    pub name: String,
    pub artists: Vec<String>,
    pub tiktok_rank: u32
}

/// Comparison against the previous day. `Unavailable` stands in when no
/// snapshot exists and reporting falls back to placeholder data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Novelty {
    Unavailable,
    Found {
        new_tracks: Vec<NewTrack>,
        new_artists: Vec<String>
    }
}

///
/// Entries are new when their name matches no previous track name byte for
/// byte. Only resolved entries with a tiktok rank are reported, ascending by
/// rank and cut to `limit`. New artists are those resolved artist names
/// absent from the previous artist names, in order of first appearance
/// among the reported tracks.
///
pub fn find_new(previous: Option<&Snapshot>, current: &[ChartEntry], limit: usize) -> Novelty {
    let Some(previous) = previous else {
        return Novelty::Unavailable;
    };

    let mut new_tracks: Vec<NewTrack> = current.iter()
        .filter(|e| e.is_resolved() && !e.resolved_artists.is_empty())
        .filter(|e| !previous.track_names.iter().any(|n| n == &e.name))
        .filter_map(|e| e.tiktok_rank.map(|rank| NewTrack {
            name: e.name.clone(),
            artists: e.resolved_artists.iter().map(|a| a.name.clone()).collect(),
            tiktok_rank: rank
        }))
        .collect();

    new_tracks.sort_by_key(|t| t.tiktok_rank);
    new_tracks.truncate(limit);

    let mut new_artists: Vec<String> = Vec::new();
    for artist in new_tracks.iter().flat_map(|t| t.artists.iter()) {
        if !previous.artist_names.contains(artist) && !new_artists.contains(artist) {
            new_artists.push(artist.clone());
        }
    }

    Novelty::Found { new_tracks, new_artists }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtistRef, TrackIdentity};

    fn tiktok_resolved(rank: u32, name: &str, artist: &str) -> ChartEntry {
        let mut e = ChartEntry::from_tiktok(rank, name, vec![artist.to_string()]);
        e.apply_identity(TrackIdentity {
            track_id: format!("id-{name}"),
            artists: vec![ArtistRef::new(format!("a-{artist}"), artist)]
        });
        e
    }

    fn snapshot(tracks: &[&str], artists: &[&str]) -> Snapshot {
        Snapshot {
            track_names: tracks.iter().map(|s| s.to_string()).collect(),
            artist_names: artists.iter().map(|s| s.to_string()).collect()
        }
    }

    #[test]
    fn missing_snapshot_is_unavailable() {
        let current = vec![tiktok_resolved(1, "Water", "Tyla")];
        assert_eq!(find_new(None, &current, 10), Novelty::Unavailable);
    }

    #[test]
    fn only_unseen_ranked_resolved_entries_are_new() {
        let previous = snapshot(&["Water"], &["Tyla"]);
        let mut unresolved = ChartEntry::from_tiktok(2, "Ghost Sound", vec!["Nobody".into()]);
        unresolved.resolved_artists.clear();

        let current = vec![
            tiktok_resolved(5, "Water", "Tyla"),
            tiktok_resolved(3, "Stick Season", "Noah Kahan"),
            unresolved,
            tiktok_resolved(1, "Lovin On Me", "Jack Harlow"),
        ];

        let Novelty::Found { new_tracks, new_artists } = find_new(Some(&previous), &current, 10) else {
            panic!("expected a comparison");
        };
        let names: Vec<_> = new_tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Lovin On Me", "Stick Season"]);
        assert_eq!(new_artists, vec!["Jack Harlow", "Noah Kahan"]);
        for t in &new_tracks {
            assert!(current.iter().any(|e| e.name == t.name));
        }
    }

    #[test]
    fn name_comparison_is_byte_exact() {
        let previous = snapshot(&["water"], &[]);
        let current = vec![tiktok_resolved(1, "Water", "Tyla")];
        let Novelty::Found { new_tracks, .. } = find_new(Some(&previous), &current, 10) else {
            panic!("expected a comparison");
        };
        assert_eq!(new_tracks.len(), 1);
    }

    #[test]
    fn top_ten_by_rank() {
        let previous = snapshot(&[], &[]);
        // ranks 15 down to 1 so sorting actually has work to do
        let current: Vec<_> = (1..=15).rev()
            .map(|r| tiktok_resolved(r, &format!("Song {r}"), "Artist"))
            .collect();

        let Novelty::Found { new_tracks, new_artists } = find_new(Some(&previous), &current, 10) else {
            panic!("expected a comparison");
        };
        let ranks: Vec<u32> = new_tracks.iter().map(|t| t.tiktok_rank).collect();
        assert_eq!(ranks, (1..=10).collect::<Vec<u32>>());
        assert_eq!(new_artists, vec!["Artist"]);
    }

    #[test]
    fn spotify_only_entries_are_not_eligible() {
        let previous = snapshot(&[], &[]);
        let spotify = ChartEntry::from_spotify(1, TrackIdentity {
            track_id: "x".into(),
            artists: vec![ArtistRef::new("a", "A")]
        }, "Spotify Only");
        let Novelty::Found { new_tracks, .. } = find_new(Some(&previous), &[spotify], 10) else {
            panic!("expected a comparison");
        };
        assert!(new_tracks.is_empty());
    }
}
