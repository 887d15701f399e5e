//! Text preparation for embedding and keyword scoring.
//!
//! Builds the semantic text of an item:
//! 1. Strip hidden metadata markers from the title
//! 2. Reduce the url to its meaningful words (dropped for noisy hosts)
//! 3. Append the folder path as a hint

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::CollectionConfig;
use crate::items::Item;

/// Metadata the ingestion pipeline hides inside titles, wrapped in zero-width spaces.
static HIDDEN_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x{200B}[^\x{200B}]*\x{200B}").expect("valid marker regex"));

static URL_BOILERPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"www\.|com|org|net|html|php").expect("valid boilerplate regex"));

static URL_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-_./?=&+]").expect("valid punctuation regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Remove hidden metadata markers and surrounding whitespace.
pub fn clean_title(title: &str) -> String {
    HIDDEN_MARKER.replace_all(title, "").trim().to_string()
}

/// Reduce a url to host and path words.
pub fn clean_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    match url::Url::parse(url) {
        Ok(parsed) => {
            let raw = format!("{} {}", parsed.host_str().unwrap_or_default(), parsed.path());
            let stripped = URL_BOILERPLATE.replace_all(&raw, " ");
            let spaced = URL_PUNCTUATION.replace_all(&stripped, " ");
            WHITESPACE.replace_all(&spaced, " ").trim().to_string()
        }
        Err(_) => URL_PUNCTUATION.replace_all(url, " ").to_string(),
    }
}

/// Text handed to the embedding service for an item.
pub fn semantic_text(item: &Item, collection: &CollectionConfig) -> String {
    let title = clean_title(&item.title);

    let url = if collection.is_noise_url(&item.url) {
        String::new()
    } else {
        clean_url(&item.url)
    };

    let folder = if !item.folder_path.is_empty() && !collection.is_capture_path(&item.folder_path) {
        format!("[folder: {}]", item.folder_path)
    } else {
        String::new()
    };

    format!("{title} {url} {folder}").trim().to_string()
}

/// Compute a hash of the semantic text for change detection.
/// Used to determine if an item needs re-embedding.
pub fn content_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.trim().hash(&mut hasher);
    hasher.finish()
}
