//! Run-scoped citation bookkeeping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// Query parameters that only track the visitor and never select content.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "igshid", "mc_cid",
    "mc_eid", "ref_src", "spm", "_ga", "_gl",
];

/// A deduplicated source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    /// Compact marker token, unique within the run.
    pub short_id: String,
    /// Display title.
    pub title: String,
    /// The URL exactly as it was first seen.
    pub url: String,
    /// The dedup identity of this citation.
    pub normalized_url: String,
}

/// Maps source URLs to stable short ids.
///
/// Ids are base-36 counters starting at `1`, handed out in registration
/// order. A URL that normalizes to an already known one gets the existing
/// id back, so ids never change and are never reused within a run.
#[derive(Clone, Debug, Default)]
pub struct CitationRegistry {
    citations: Vec<Citation>,
    by_normalized: HashMap<String, usize>,
    by_short_id: HashMap<String, usize>,
}

impl CitationRegistry {
    /// Registers a source and returns its short id.
    pub fn register(&mut self, url: &str, title: &str) -> String {
        let normalized_url = normalize_url(url);
        if let Some(&idx) = self.by_normalized.get(&normalized_url) {
            let citation = &mut self.citations[idx];
            if citation.title.is_empty() && !title.trim().is_empty() {
                citation.title = title.trim().to_owned();
            }
            return citation.short_id.clone();
        }

        let idx = self.citations.len();
        let short_id = to_base36(idx as u64 + 1);
        trace!("registered citation {short_id} for {normalized_url}");
        self.citations.push(Citation {
            short_id: short_id.clone(),
            title: display_title(url, title),
            url: url.to_owned(),
            normalized_url: normalized_url.clone(),
        });
        self.by_normalized.insert(normalized_url, idx);
        self.by_short_id.insert(short_id.clone(), idx);
        short_id
    }

    /// Looks up a citation by its short id.
    #[inline]
    pub fn resolve(&self, short_id: &str) -> Option<&Citation> {
        self.by_short_id
            .get(short_id)
            .map(|&idx| &self.citations[idx])
    }

    /// Returns all citations in first-seen order.
    #[inline]
    pub fn all(&self) -> &[Citation] {
        &self.citations
    }

    /// Returns the number of distinct sources.
    #[inline]
    pub fn len(&self) -> usize {
        self.citations.len()
    }

    /// Returns `true` if nothing has been registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// Computes the dedup identity of a URL.
///
/// The host is lower-cased, the fragment and tracking parameters are
/// dropped, the remaining query parameters are sorted, and a trailing
/// slash is removed from non-root paths. Strings that don't parse as URLs
/// are only trimmed and lower-cased.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_lowercase();
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_owned();
        url.set_path(&trimmed);
    }

    // Only non-special schemes keep the original host casing.
    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        if lowered != host && url.set_host(Some(&lowered)).is_err() {
            warn!("cannot lower-case host of {raw}");
        }
    }
    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "utm" || key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn display_title(url: &str, title: &str) -> String {
    let title = title.trim();
    if !title.is_empty() {
        return title.to_owned();
    }
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToOwned::to_owned))
        .unwrap_or_else(|| url.trim().to_owned())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = CitationRegistry::default();
        let a = registry.register("https://example.org/france", "France");
        let b = registry.register("https://example.org/paris", "Paris");
        assert_eq!(a, "1");
        assert_eq!(b, "2");

        assert_eq!(registry.register("https://example.org/france", ""), "1");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("2").unwrap().title, "Paris");
        assert!(registry.resolve("3").is_none());
    }

    #[test]
    fn test_tracking_variants_share_an_id() {
        let mut registry = CitationRegistry::default();
        let a = registry.register("https://example.org/france?utm=1", "France");
        let b = registry.register("https://EXAMPLE.org/france#history", "");
        let c = registry.register(
            "https://example.org/france/?utm_source=x&gclid=abc",
            "France again",
        );
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(registry.len(), 1);

        // The first seen URL is kept as the long form.
        let citation = registry.resolve(&a).unwrap();
        assert_eq!(citation.url, "https://example.org/france?utm=1");
        assert_eq!(citation.normalized_url, "https://example.org/france");
    }

    #[test]
    fn test_content_params_are_kept() {
        assert_eq!(
            normalize_url("https://news.example.com/item?b=2&id=7&utm_medium=rss"),
            "https://news.example.com/item?b=2&id=7"
        );
        assert_eq!(
            normalize_url("https://news.example.com/item?id=7&b=2"),
            "https://news.example.com/item?b=2&id=7"
        );
        assert_ne!(
            normalize_url("https://news.example.com/item?id=7"),
            normalize_url("https://news.example.com/item?id=8")
        );
        assert_eq!(normalize_url("https://example.org/"), "https://example.org/");
        assert_eq!(normalize_url("  not a url "), "not a url");
    }

    #[test]
    fn test_base36_ids() {
        let mut registry = CitationRegistry::default();
        let ids: Vec<String> = (0..37)
            .map(|i| registry.register(&format!("https://example.org/{i}"), ""))
            .collect();
        assert_eq!(ids[0], "1");
        assert_eq!(ids[8], "9");
        assert_eq!(ids[9], "a");
        assert_eq!(ids[34], "z");
        assert_eq!(ids[35], "10");
        assert_eq!(ids[36], "11");
        assert_eq!(registry.all()[9].title, "example.org");
    }
}
