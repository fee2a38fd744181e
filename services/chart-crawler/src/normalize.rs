//!
//! src/normalize.rs
//!
//! Text and numeric normalization shared by the matcher, the resolver
//! and the persistence layer.
//!

use crate::config::TitleNorm;

/// Lowercase, drop ascii punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .flat_map(char::to_lowercase)
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn apply_title_norm(title: &str, norm: TitleNorm) -> String {
    match norm {
        TitleNorm::Lower => title.to_lowercase(),
        TitleNorm::LowerStripPunct => normalize_title(title),
        TitleNorm::None => title.to_string(),
    }
}

///
/// Indel similarity of two titles on a 0..=100 scale: twice the longest
/// common subsequence over the combined length. Only insertions and
/// deletions count, so an added " - remix" costs less than it would under
/// an edit distance with substitutions.
///
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * longest_common_subsequence(&a, &b) as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    // single row, prev holds the diagonal
    let mut row = vec![0_usize; b.len() + 1];
    for ca in a {
        let mut prev = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb { prev + 1 } else { above.max(row[j]) };
            prev = above;
        }
    }
    row[b.len()]
}

/// Title cut at the first punctuation character, used for the relaxed
/// search query. "Daylight (Sped Up)" becomes "Daylight".
pub fn relaxed_title(title: &str) -> &str {
    let cut = match title.find(|c: char| c.is_ascii_punctuation()) {
        Some(idx) => title[..idx].trim(),
        None => title.trim()
    };
    if cut.is_empty() { title.trim() } else { cut }
}

/// Tempo in bpm mapped onto [0,1] for an assumed 50..250 bpm range.
/// Values outside that range land outside [0,1] and are kept that way.
pub fn normalize_tempo(raw_bpm: f64) -> f64 {
    (raw_bpm - 50.0) / 200.0
}

/// Parses counts shown on tiktok pages, e.g. "1.2M", "530.4K views",
/// "12,345". Returns the absolute count.
pub fn parse_count(text: &str) -> Option<f64> {
    let cleaned = text
        .trim()
        .trim_end_matches("views")
        .trim()
        .replace(',', "");

    let (number, scale) = match cleaned.find(['K', 'M', 'B']) {
        Some(idx) => {
            let scale = match &cleaned[idx..idx + 1] {
                "K" => 1e3,
                "M" => 1e6,
                _ => 1e9
            };
            (&cleaned[..idx], scale)
        }
        None => (cleaned.as_str(), 1.0)
    };

    number.trim().parse::<f64>().ok().map(|n| n * scale)
}

/// Counts are stored in units of one hundred thousand.
pub fn to_hundred_thousands(count: f64) -> f64 {
    count / 100_000.0
}
