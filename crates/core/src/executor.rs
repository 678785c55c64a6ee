//! Concurrent execution of a search wave.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use pro_search_model::{SearchProviderError, SearchResponse, TextSpan};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::citation::CitationRegistry;
use crate::error::{Error, Result};
use crate::planner::SearchQuery;
use crate::search_client::SearchClient;

/// A source of a search result, resolved to its citation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultSource {
    /// Short id of the citation this source was registered as.
    pub short_id: String,
    /// The URL as returned by the backend.
    pub url: String,
    /// The title as returned by the backend.
    pub title: String,
    /// The part of a snippet this source supports.
    pub span: Option<TextSpan>,
}

/// The outcome of one query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
    /// The query that was run.
    pub query: SearchQuery,
    /// Snippets in ranking order.
    pub snippets: Vec<String>,
    /// Sources in the order the backend returned them.
    pub sources: Vec<ResultSource>,
    /// Wall time of the search call.
    #[serde(with = "crate::config::secs")]
    pub duration: Duration,
    /// Whether the search succeeded.
    pub success: bool,
    /// What went wrong, for failed searches.
    pub error: Option<String>,
}

impl SearchResult {
    /// Renders the snippets with citation markers.
    ///
    /// A `[src:ID]` marker is placed at the end of every span a source
    /// supports. Sources without a usable span are listed after the
    /// snippets.
    pub fn annotated_text(&self) -> String {
        if !self.success {
            return format!(
                "(search failed: {})",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }

        let mut placed = HashSet::new();
        let mut paragraphs = Vec::with_capacity(self.snippets.len());
        for (idx, snippet) in self.snippets.iter().enumerate() {
            let mut inserts: Vec<(usize, &str)> = self
                .sources
                .iter()
                .filter_map(|source| {
                    let span = source.span?;
                    let valid = span.snippet == idx
                        && span.start <= span.end
                        && snippet.is_char_boundary(span.end);
                    valid.then_some((span.end, source.short_id.as_str()))
                })
                .collect();
            // Two sources of one result may share a citation.
            inserts.sort_unstable();
            inserts.dedup();

            let mut text = String::with_capacity(snippet.len() + inserts.len() * 8);
            let mut cursor = 0;
            for (end, short_id) in inserts {
                text.push_str(&snippet[cursor..end]);
                text.push_str(&format!(" [src:{short_id}]"));
                cursor = end;
                placed.insert(short_id);
            }
            text.push_str(&snippet[cursor..]);
            paragraphs.push(text);
        }

        let mut listed = HashSet::new();
        let unplaced: Vec<String> = self
            .sources
            .iter()
            .filter(|s| !placed.contains(s.short_id.as_str()))
            .filter(|s| listed.insert(s.short_id.as_str()))
            .map(|s| format!("[src:{}] {}", s.short_id, s.title))
            .collect();
        if !unplaced.is_empty() {
            paragraphs.push(format!("Sources: {}", unplaced.join("; ")));
        }
        paragraphs.join("\n\n")
    }
}

/// Renders results for a prompt, one section per query.
pub(crate) fn render_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("### {}\n{}", r.query.text, r.annotated_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Runs a wave of queries against the search backend.
#[derive(Clone)]
pub(crate) struct SearchExecutor {
    client: SearchClient,
    max_concurrent: usize,
    timeout: Duration,
}

impl SearchExecutor {
    #[inline]
    pub fn new(client: SearchClient, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            client,
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    /// Runs every query and returns one result per query, in input order.
    ///
    /// At most `max_concurrent` searches are in flight at once. Sources are
    /// registered only after the whole wave has completed, walking the
    /// results in query order, so short ids don't depend on completion
    /// order. Failed searches become failed results, only cancellation is
    /// an error.
    pub async fn execute(
        &self,
        queries: &[SearchQuery],
        registry: &mut CitationRegistry,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        let timeout = self.timeout;
        let calls = queries.iter().cloned().map(|query| {
            let client = self.client.clone();
            async move {
                let started = Instant::now();
                let outcome =
                    match tokio::time::timeout(timeout, client.search(&query.text))
                        .await
                    {
                        Ok(Ok(resp)) => Ok(resp),
                        Ok(Err(err)) => Err(Error::Search {
                            kind: err.kind(),
                            message: err.to_string(),
                        }),
                        Err(_) => Err(Error::Timeout(timeout)),
                    };
                (query, started.elapsed(), outcome)
            }
        });
        let wave = stream::iter(calls)
            .buffered(self.max_concurrent)
            .collect::<Vec<_>>();

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcomes = wave => outcomes,
        };

        let results: Vec<SearchResult> = outcomes
            .into_iter()
            .map(|(query, duration, outcome)| {
                merge(query, duration, outcome, registry)
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        info!("wave finished, {succeeded}/{} searches succeeded", results.len());
        Ok(results)
    }
}

fn merge(
    query: SearchQuery,
    duration: Duration,
    outcome: Result<SearchResponse>,
    registry: &mut CitationRegistry,
) -> SearchResult {
    let resp = match outcome {
        Ok(resp) => resp,
        Err(err) => {
            warn!("search for {:?} failed: {err}", query.text);
            return SearchResult {
                query,
                snippets: vec![],
                sources: vec![],
                duration,
                success: false,
                error: Some(err.to_string()),
            };
        }
    };

    let sources = resp
        .sources
        .into_iter()
        .filter(|source| {
            let keep = !source.url.trim().is_empty();
            if !keep {
                debug!("dropped a source without URL from {:?}", query.text);
            }
            keep
        })
        .map(|source| ResultSource {
            short_id: registry.register(&source.url, &source.title),
            url: source.url,
            title: source.title,
            span: source.span,
        })
        .collect();

    SearchResult {
        query,
        snippets: resp.snippets,
        sources,
        duration,
        success: true,
        error: None,
    }
}
