//! Final answer writing and citation marker resolution.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tokio_util::sync::CancellationToken;

use crate::citation::{Citation, CitationRegistry};
use crate::error::Result;
use crate::executor::{SearchResult, render_results};
use crate::generation::Generator;
use crate::prompt::{Prompt, PromptTemplate};

/// Matches `[src:1]` and `[src:1, 3]` (with optional `src:` on every id),
/// together with the blanks before the marker.
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)([ \t]*)\[src:\s*([0-9a-z]+(?:\s*,\s*(?:src:)?\s*[0-9a-z]+)*)\s*\]",
    )
    .expect("marker pattern is valid")
});

static MARKER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9a-zA-Z]+").expect("id pattern is valid"));

/// A written answer with its markers resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Answer {
    /// Markdown text with inline links.
    pub text: String,
    /// Citations referenced by the text, in registration order.
    pub referenced: Vec<Citation>,
}

/// Writes the final answer from everything gathered.
#[derive(Clone)]
pub(crate) struct AnswerSynthesizer {
    generator: Generator,
}

impl AnswerSynthesizer {
    #[inline]
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Asks the model for an answer and resolves its citation markers.
    pub async fn synthesize<F>(
        &self,
        question: &str,
        results: &[SearchResult],
        registry: &CitationRegistry,
        cancel: &CancellationToken,
        on_delta: F,
    ) -> Result<Answer>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let sources: Vec<String> = registry
            .all()
            .iter()
            .map(|c| format!("[src:{}] {} ({})", c.short_id, c.title, c.url))
            .collect();
        let prompt = Prompt::new(PromptTemplate::Answer)
            .var("research_topic", question)
            .var("sources", sources.join("\n"))
            .var("summaries", render_results(results));

        let raw = self.generator.generate_text(&prompt, cancel, on_delta).await?;
        Ok(resolve_markers(raw.trim(), registry))
    }
}

/// Rewrites every marker into markdown links.
///
/// Ids unknown to the registry are dropped, and a marker left without any
/// known id is removed entirely.
pub(crate) fn resolve_markers(text: &str, registry: &CitationRegistry) -> Answer {
    let mut used = HashSet::new();
    let text = MARKER.replace_all(text, |caps: &Captures<'_>| {
        let links: Vec<String> = MARKER_ID
            .find_iter(&caps[2])
            .map(|m| m.as_str().to_ascii_lowercase())
            .filter(|id| id != "src")
            .filter_map(|id| match registry.resolve(&id) {
                Some(citation) => {
                    used.insert(citation.short_id.clone());
                    Some(format!(
                        "[{}]({})",
                        escape_link_text(&citation.title),
                        citation.url
                    ))
                }
                None => {
                    warn!("dropped citation marker with unknown id {id:?}");
                    None
                }
            })
            .collect();
        if links.is_empty() {
            String::new()
        } else {
            format!("{}{}", &caps[1], links.join(" "))
        }
    });

    let referenced = registry
        .all()
        .iter()
        .filter(|c| used.contains(&c.short_id))
        .cloned()
        .collect();
    Answer {
        text: text.into_owned(),
        referenced,
    }
}

fn escape_link_text(title: &str) -> String {
    title.replace('[', "\\[").replace(']', "\\]")
}
