//!
//! src/scrape.rs
//!
//! Parses the scraped html pages: tokchart ranking pages into chart
//! entries, tiktok tag and profile pages into view / follower counts.
//!
//! Tokchart styles its markup with utility classes, so elements are found
//! by the exact set of classes they carry rather than by a css selector
//! string. An element with extra classes is a different element.
//!

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::errors::CrawlerError;
use crate::normalize::parse_count;
use crate::types::ChartEntry;

const ENTRY_CLASSES: &[&str] = &["lg:flex", "sm:flex-col", "justify-between"];

const RANK_VARIANTS: &[&[&str]] = &[
    &["font-bold", "sm:font-extrabold", "text-lg", "sm:text-2xl"],
    &["font-bold", "sm:font-extrabold", "leading-7", "text-base", "sm:text-xl"],
];

const ARTIST_VARIANTS: &[&[&str]] = &[
    &["mt-1", "sm:mt-2", "text-sm", "text-gray-500", "sm:block", "sm:text-xl"],
    &["mt-1", "sm:mt-2", "text-sm", "text-gray-500", "sm:block", "sm:text-lg"],
];

fn selector(css: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(css).map_err(|e| CrawlerError::Parse(format!("selector {css}: {e:?}")))
}

fn has_class_set(el: &ElementRef, classes: &[&str]) -> bool {
    let own: Vec<&str> = el.value().classes().collect();
    own.len() == classes.len() && classes.iter().all(|c| own.contains(c))
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text of the first descendant matching `tag` that carries any of the
/// class variants.
fn variant_text(
    container: &ElementRef,
    tag: &Selector,
    variants: &[&[&str]]
) -> Option<String> {
    container.select(tag)
        .find(|el| variants.iter().any(|v| has_class_set(el, v)))
        .map(|el| text_of(&el))
}

///
/// One page of the tokchart ranking. Entries are skipped when they are an
/// "original sound", or when their rank or artist line is missing.
///
pub fn parse_tokchart_page(html: &str) -> Result<Vec<ChartEntry>, CrawlerError> {
    let document = Html::parse_document(html);
    let div  = selector("div")?;
    let any  = selector("*")?;
    let span = selector("span")?;
    let name_link = selector("h4 > a")?;

    let mut entries = Vec::new();
    for container in document.select(&div).filter(|d| has_class_set(d, ENTRY_CLASSES)) {
        let Some(link) = container.select(&name_link).next() else {
            continue;
        };
        let name = text_of(&link).replace('#', "").trim().to_string();
        if name.is_empty() || name.to_lowercase().contains("original sound") {
            debug!(%name, "tokchart.skip");
            continue;
        }

        let rank = variant_text(&container, &any, RANK_VARIANTS)
            .and_then(|r| r.trim_start_matches('#').trim().parse::<u32>().ok());
        let Some(rank) = rank else {
            debug!(%name, "tokchart.skip.rank");
            continue;
        };

        let Some(artist_line) = variant_text(&container, &span, ARTIST_VARIANTS) else {
            debug!(%name, "tokchart.skip.artists");
            continue;
        };
        let artists: Vec<String> = artist_line.split('&')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        entries.push(ChartEntry::from_tiktok(rank, name, artists));
    }
    Ok(entries)
}

/// View count shown on a tiktok tag page.
pub fn parse_tag_views(html: &str) -> Result<Option<f64>, CrawlerError> {
    let document = Html::parse_document(html);
    let views = selector("h2 > strong")?;
    Ok(document.select(&views).next().and_then(|el| parse_count(&text_of(&el))))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProfileCounts {
    pub followers: Option<f64>,
    pub likes: Option<f64>
}

pub fn parse_profile_counts(html: &str) -> Result<ProfileCounts, CrawlerError> {
    let document = Html::parse_document(html);
    let followers = selector(r#"strong[title="Followers"]"#)?;
    let likes     = selector(r#"strong[title="Likes"]"#)?;

    let count = |s: &Selector| document.select(s).next()
        .and_then(|el| parse_count(&text_of(&el)));

    Ok( ProfileCounts { followers: count(&followers), likes: count(&likes) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_html(rank: &str, rank_classes: &str, name: &str, artists: &str, artist_classes: &str) -> String {
        format!(r#"
        <div class="lg:flex sm:flex-col justify-between">
          <div class="{rank_classes}">{rank}</div>
          <h4><a href="/song/x">{name}</a></h4>
          <span class="{artist_classes}">{artists}</span>
        </div>"#)
    }

    const RANK_A: &str = "font-bold sm:font-extrabold text-lg sm:text-2xl";
    const RANK_B: &str = "font-bold sm:font-extrabold leading-7 text-base sm:text-xl";
    const ART_A: &str = "mt-1 sm:mt-2 text-sm text-gray-500 sm:block sm:text-xl";
    const ART_B: &str = "mt-1 sm:mt-2 text-sm text-gray-500 sm:block sm:text-lg";

    #[test]
    fn tokchart_entries_from_both_class_variants() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            entry_html("1", RANK_A, "#Water", "Tyla", ART_A),
            entry_html("2", RANK_B, "Lovin On Me ", "Jack Harlow & Someone", ART_B),
        );
        let entries = parse_tokchart_page(&html).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "Water");
        assert_eq!(entries[0].tiktok_rank, Some(1));
        assert_eq!(entries[0].candidate_artists, vec!["Tyla"]);

        assert_eq!(entries[1].name, "Lovin On Me");
        assert_eq!(entries[1].tiktok_rank, Some(2));
        assert_eq!(entries[1].candidate_artists, vec!["Jack Harlow", "Someone"]);
        assert!(entries.iter().all(|e| !e.in_spotify()));
    }

    #[test]
    fn tokchart_skips_original_sounds_and_incomplete_rows() {
        let html = format!(
            "<html><body>{}{}{}{}</body></html>",
            entry_html("1", RANK_A, "original sound - dj", "dj", ART_A),
            entry_html("2", "font-bold", "No Rank", "Someone", ART_A),
            entry_html("3", RANK_A, "No Artist", "Someone", "text-sm"),
            entry_html("4", RANK_A, "Kept", "Someone", ART_A),
        );
        let entries = parse_tokchart_page(&html).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Kept"]);
    }

    #[test]
    fn extra_classes_do_not_match() {
        let wider = entry_html("1", RANK_A, "Wider", "Someone", ART_A)
            .replace("justify-between", "justify-between items-center");
        let loud_rank = entry_html("2", &format!("{RANK_A} text-red-500"), "Loud", "Someone", ART_A);
        let html = format!(
            "<html><body>{wider}{loud_rank}{}</body></html>",
            entry_html("3", RANK_A, "Exact", "Someone", ART_A),
        );
        let entries = parse_tokchart_page(&html).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Exact"]);
    }

    #[test]
    fn empty_page_has_no_entries() {
        assert!(parse_tokchart_page("<html></html>").unwrap().is_empty());
    }

    #[test]
    fn tag_views() {
        let html = "<html><body><h2><strong>1.2M</strong> views</h2></body></html>";
        assert_eq!(parse_tag_views(html).unwrap(), Some(1_200_000.0));
        assert_eq!(parse_tag_views("<html><h2>nothing</h2></html>").unwrap(), None);
    }

    #[test]
    fn profile_counts() {
        let html = r#"<html><body>
            <strong title="Following">12</strong>
            <strong title="Followers">530.4K</strong>
            <strong title="Likes">2B</strong>
        </body></html>"#;
        let counts = parse_profile_counts(html).unwrap();
        assert_eq!(counts.followers, Some(530_400.0));
        assert_eq!(counts.likes, Some(2e9));

        let empty = parse_profile_counts("<html></html>").unwrap();
        assert_eq!(empty, ProfileCounts::default());
    }
}
