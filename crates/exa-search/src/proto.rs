use pro_search_model::{GroundingSource, SearchResponse, TextSpan};
use serde::{Deserialize, Serialize};

use crate::ExaConfig;

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    query: String,
    r#type: &'static str,
    num_results: u32,
    contents: Contents,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct Contents {
    text: TextOptions,
    highlights: HighlightOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextOptions {
    max_characters: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
struct HighlightOptions {
    num_sentences: u32,
    highlights_per_url: u32,
}

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct SearchReply {
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(query: &str, config: &ExaConfig) -> SearchRequest {
    SearchRequest {
        query: query.to_owned(),
        r#type: "auto",
        num_results: config.num_results,
        contents: Contents {
            text: TextOptions {
                max_characters: config.max_characters,
            },
            highlights: HighlightOptions {
                num_sentences: 3,
                highlights_per_url: 2,
            },
        },
    }
}

/// Turns hits into snippets, one per hit, each fully supported by the
/// hit's page.
pub fn into_response(reply: SearchReply, max_characters: usize) -> SearchResponse {
    let mut resp = SearchResponse::default();
    for hit in reply.results {
        if hit.url.trim().is_empty() {
            continue;
        }
        let snippet = if hit.highlights.is_empty() {
            hit.text.unwrap_or_default()
        } else {
            hit.highlights.join(" ")
        };
        let snippet = truncate(snippet.trim(), max_characters).trim_end();

        let span = (!snippet.is_empty()).then(|| {
            resp.snippets.push(snippet.to_owned());
            TextSpan {
                snippet: resp.snippets.len() - 1,
                start: 0,
                end: snippet.len(),
            }
        });
        resp.sources.push(GroundingSource {
            url: hit.url,
            title: hit.title.unwrap_or_default(),
            span,
        });
    }
    resp
}

fn truncate(text: &str, max_characters: usize) -> &str {
    match text.char_indices().nth(max_characters) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
