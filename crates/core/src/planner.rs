//! Search query planning.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::generation::{Generator, StructuredOutput};
use crate::prompt::{Prompt, PromptTemplate};

/// The wave a query belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "loop", rename_all = "snake_case")]
pub enum Wave {
    /// The wave planned from the question.
    Initial,
    /// A wave planned from reflection gaps, numbered by the loop count.
    FollowUp(u32),
}

/// A single web search to run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The query text sent to the search backend.
    pub text: String,
    /// Why the query was chosen.
    pub rationale: String,
    /// The wave the query was planned for.
    pub wave: Wave,
}

/// Reply of the query writers.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct QueryList {
    /// The planned queries.
    queries: Vec<QueryItem>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct QueryItem {
    /// The web search query.
    query: String,
    /// A short explanation of why this query helps.
    rationale: String,
}

impl StructuredOutput for QueryList {
    const NAME: &'static str = "search_queries";
}

/// Plans initial and follow-up search queries.
#[derive(Clone)]
pub(crate) struct QueryPlanner {
    generator: Generator,
}

impl QueryPlanner {
    #[inline]
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Plans `count` queries for the question.
    pub async fn plan_initial(
        &self,
        question: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchQuery>> {
        let prompt = Prompt::new(PromptTemplate::QueryWriter)
            .var("number_queries", count.to_string())
            .var("research_topic", question);
        self.generator
            .generate(&prompt, cancel, |list: QueryList| {
                accept(list, count, &[], Wave::Initial)
            })
            .await
    }

    /// Plans one query per gap for follow-up wave `loop_count`.
    pub async fn plan_followup(
        &self,
        gaps: &[String],
        question: &str,
        existing_queries: &[SearchQuery],
        loop_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchQuery>> {
        let prompt = Prompt::new(PromptTemplate::FollowUpWriter)
            .var("number_queries", gaps.len().to_string())
            .var("research_topic", question)
            .var("knowledge_gaps", bullet_list(gaps.iter()))
            .var(
                "existing_queries",
                bullet_list(existing_queries.iter().map(|q| &q.text)),
            );
        self.generator
            .generate(&prompt, cancel, |list: QueryList| {
                accept(
                    list,
                    gaps.len(),
                    existing_queries,
                    Wave::FollowUp(loop_count),
                )
            })
            .await
    }
}

/// Checks a reply of the query writers.
///
/// Replies with fewer queries than requested are rejected. Duplicates
/// within the batch, and queries that were already run, are dropped, and
/// the batch is rejected only if nothing is left. Extra queries are cut.
fn accept(
    list: QueryList,
    requested: usize,
    existing: &[SearchQuery],
    wave: Wave,
) -> Result<Vec<SearchQuery>, String> {
    let items: Vec<QueryItem> = list
        .queries
        .into_iter()
        .filter(|item| !item.query.trim().is_empty())
        .collect();
    if items.len() < requested {
        return Err(format!(
            "expected {requested} queries, got {}",
            items.len()
        ));
    }

    let mut seen: HashSet<String> =
        existing.iter().map(|q| dedup_key(&q.text)).collect();
    let mut queries = Vec::with_capacity(requested);
    for item in items {
        if queries.len() == requested {
            break;
        }
        if !seen.insert(dedup_key(&item.query)) {
            debug!("dropped duplicate query {:?}", item.query);
            continue;
        }
        queries.push(SearchQuery {
            text: item.query.trim().to_owned(),
            rationale: item.rationale.trim().to_owned(),
            wave,
        });
    }

    if queries.is_empty() {
        return Err("no distinct queries left after removing duplicates".to_owned());
    }
    if queries.len() < requested {
        warn!(
            "planned {} distinct queries out of {requested} requested",
            queries.len()
        );
    }
    Ok(queries)
}

fn dedup_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn bullet_list<I, S>(items: I) -> String
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let lines: Vec<String> =
        items.map(|item| format!("- {}", item.as_ref())).collect();
    if lines.is_empty() {
        "(none)".to_owned()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pro_search_model::ModelMessage;
    use pro_search_test_model::{PresetResponse, TestModelProvider};
    use serde_json::{Value, json};

    use super::*;
    use crate::Error;
    use crate::model_client::ModelClient;

    fn planner(provider: &TestModelProvider) -> QueryPlanner {
        let generator = Generator::new(
            ModelClient::new(provider.clone()),
            1.0,
            Duration::from_secs(10),
            0,
        );
        QueryPlanner::new(generator)
    }

    fn reply(queries: &[&str]) -> PresetResponse {
        let queries: Vec<Value> = queries
            .iter()
            .map(|q| json!({ "query": q, "rationale": format!("find {q}") }))
            .collect();
        PresetResponse::json(&json!({ "queries": queries }))
    }

    fn user_prompt(provider: &TestModelProvider, idx: usize) -> String {
        match &provider.requests()[idx].messages[1] {
            ModelMessage::User(text) => text.clone(),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plan_initial() {
        let mut provider = TestModelProvider::default();
        provider.add_response_step(reply(&[
            "capital of France",
            "Capital   of france",
            "Paris population",
            "French government seat",
        ]));

        let queries = planner(&provider)
            .plan_initial("What is the capital of France?", 3, &CancellationToken::new())
            .await
            .unwrap();
        let texts: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(
            texts,
            ["capital of France", "Paris population", "French government seat"]
        );
        assert!(queries.iter().all(|q| q.wave == Wave::Initial));
        assert_eq!(queries[1].rationale, "find Paris population");
        assert!(user_prompt(&provider, 0).contains("Produce exactly 3 queries."));
    }

    #[tokio::test]
    async fn test_too_few_queries_is_retried() {
        let mut provider = TestModelProvider::default();
        provider.add_response_step(reply(&["capital of France"]));
        provider.add_response_step(reply(&["capital of France", "Paris"]));

        let queries = planner(&provider)
            .plan_initial("What is the capital of France?", 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_contract_error() {
        let mut provider = TestModelProvider::default();
        provider.add_response_step(PresetResponse::json(&json!({ "queries": [] })));
        provider.add_response_step(PresetResponse::json(&json!({ "items": [] })));

        let err = planner(&provider)
            .plan_initial("What is the capital of France?", 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GenerationContract(_)));
    }

    #[tokio::test]
    async fn test_plan_followup() {
        let existing = vec![SearchQuery {
            text: "capital of France".to_owned(),
            rationale: String::new(),
            wave: Wave::Initial,
        }];
        let gaps = vec![
            "Population of Paris".to_owned(),
            "When Paris became the capital".to_owned(),
        ];

        let mut provider = TestModelProvider::default();
        provider.add_response_step(reply(&[
            "CAPITAL OF FRANCE",
            "Paris population 2024",
        ]));

        let queries = planner(&provider)
            .plan_followup(
                &gaps,
                "What is the capital of France?",
                &existing,
                1,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text, "Paris population 2024");
        assert_eq!(queries[0].wave, Wave::FollowUp(1));

        let prompt = user_prompt(&provider, 0);
        assert!(prompt.contains("- When Paris became the capital"));
        assert!(prompt.contains("- capital of France"));
    }

    #[test]
    fn test_wave_serialization() {
        assert_eq!(
            serde_json::to_value(Wave::FollowUp(2)).unwrap(),
            json!({ "kind": "follow_up", "loop": 2 })
        );
        assert_eq!(
            serde_json::to_value(Wave::Initial).unwrap(),
            json!({ "kind": "initial" })
        );
    }
}
