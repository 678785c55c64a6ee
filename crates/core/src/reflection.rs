//! Gap analysis between search waves.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::executor::{SearchResult, render_results};
use crate::generation::{Generator, StructuredOutput};
use crate::planner::{QueryPlanner, SearchQuery};
use crate::prompt::{Prompt, PromptTemplate};

/// The verdict of a reflection step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReflectionOutcome {
    /// Whether the gathered results answer the question.
    pub sufficient: bool,
    /// Knowledge gaps found by the model.
    pub gaps: Vec<String>,
    /// Queries for the next wave, empty if sufficient.
    pub follow_ups: Vec<SearchQuery>,
}

impl ReflectionOutcome {
    fn sufficient() -> Self {
        Self {
            sufficient: true,
            ..Default::default()
        }
    }
}

/// Reply of the reflection prompt.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct Reflection {
    /// Whether the results answer the research topic.
    is_sufficient: bool,
    /// Missing information, one short sentence per gap.
    knowledge_gaps: Vec<String>,
}

impl StructuredOutput for Reflection {
    const NAME: &'static str = "reflection";
}

/// Judges coverage and plans follow-up queries for the gaps.
#[derive(Clone)]
pub(crate) struct ReflectionAnalyzer {
    generator: Generator,
    planner: QueryPlanner,
    max_follow_ups: usize,
}

impl ReflectionAnalyzer {
    #[inline]
    pub fn new(generator: Generator, planner: QueryPlanner, max_follow_ups: usize) -> Self {
        Self {
            generator,
            planner,
            max_follow_ups: max_follow_ups.max(1),
        }
    }

    /// Analyzes every result gathered so far.
    ///
    /// Once `loop_count` has reached `max_loops`, the outcome is sufficient
    /// without asking the model. A malformed or ambiguous verdict counts as
    /// insufficient while there is budget left.
    pub async fn analyze(
        &self,
        question: &str,
        results: &[SearchResult],
        existing_queries: &[SearchQuery],
        loop_count: u32,
        max_loops: u32,
        cancel: &CancellationToken,
    ) -> Result<ReflectionOutcome> {
        if loop_count >= max_loops {
            debug!("loop budget exhausted ({loop_count}/{max_loops}), skipping reflection");
            return Ok(ReflectionOutcome::sufficient());
        }

        let max_gaps = self.max_follow_ups;
        let prompt = Prompt::new(PromptTemplate::Reflection)
            .var("max_gaps", max_gaps.to_string())
            .var("research_topic", question)
            .var("summaries", render_results(results));
        let verdict = self
            .generator
            .generate(&prompt, cancel, |reply: Reflection| {
                judge(reply, max_gaps)
            })
            .await;

        let gaps = match verdict {
            Ok(None) => return Ok(ReflectionOutcome::sufficient()),
            Ok(Some(gaps)) => gaps,
            Err(Error::GenerationContract(reason)) => {
                warn!("no usable reflection verdict, assuming insufficient: {reason}");
                vec![format!(
                    "More detailed and up-to-date information is needed to \
                     answer: {question}"
                )]
            }
            Err(err) => return Err(err),
        };
        debug!("reflection found {} gaps", gaps.len());

        let follow_ups = self
            .planner
            .plan_followup(&gaps, question, existing_queries, loop_count + 1, cancel)
            .await?;
        Ok(ReflectionOutcome {
            sufficient: false,
            gaps,
            follow_ups,
        })
    }
}

/// Turns a verdict into the gaps to follow up, or `None` if sufficient.
fn judge(reply: Reflection, max_gaps: usize) -> Result<Option<Vec<String>>, String> {
    if reply.is_sufficient {
        return Ok(None);
    }
    let mut gaps: Vec<String> = Vec::with_capacity(max_gaps);
    for gap in reply.knowledge_gaps {
        let gap = gap.trim();
        if gap.is_empty() || gaps.iter().any(|g| g.eq_ignore_ascii_case(gap)) {
            continue;
        }
        gaps.push(gap.to_owned());
    }
    if gaps.is_empty() {
        return Err("`is_sufficient` is false but no knowledge gaps were listed".to_owned());
    }
    if gaps.len() > max_gaps {
        debug!("keeping {max_gaps} of {} gaps", gaps.len());
        gaps.truncate(max_gaps);
    }
    Ok(Some(gaps))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pro_search_model::ModelMessage;
    use pro_search_test_model::{PresetResponse, TestModelProvider};
    use serde_json::json;

    use super::*;
    use crate::model_client::ModelClient;
    use crate::planner::Wave;

    const QUESTION: &str = "What is the capital of France?";

    fn analyzer(provider: &TestModelProvider, max_follow_ups: usize) -> ReflectionAnalyzer {
        let generator = Generator::new(
            ModelClient::new(provider.clone()),
            1.0,
            Duration::from_secs(10),
            0,
        );
        ReflectionAnalyzer::new(
            generator.clone(),
            QueryPlanner::new(generator),
            max_follow_ups,
        )
    }

    fn result() -> SearchResult {
        SearchResult {
            query: SearchQuery {
                text: "capital of France".to_owned(),
                rationale: String::new(),
                wave: Wave::Initial,
            },
            snippets: vec!["Paris is the capital of France".to_owned()],
            sources: vec![],
            duration: Duration::ZERO,
            success: true,
            error: None,
        }
    }

    fn verdict(sufficient: bool, gaps: &[&str]) -> PresetResponse {
        PresetResponse::json(&json!({
            "is_sufficient": sufficient,
            "knowledge_gaps": gaps,
        }))
    }

    fn follow_ups(queries: &[&str]) -> PresetResponse {
        let queries: Vec<_> = queries
            .iter()
            .map(|q| json!({ "query": q, "rationale": "gap" }))
            .collect();
        PresetResponse::json(&json!({ "queries": queries }))
    }

    #[tokio::test]
    async fn test_sufficient() {
        let mut provider = TestModelProvider::default();
        provider.add_response_step(verdict(true, &[]));

        let outcome = analyzer(&provider, 5)
            .analyze(QUESTION, &[result()], &[], 0, 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ReflectionOutcome::sufficient());

        let ModelMessage::User(prompt) = &provider.requests()[0].messages[1] else {
            panic!("expected a user message");
        };
        assert!(prompt.contains("### capital of France\nParis is the capital of France"));
    }

    #[tokio::test]
    async fn test_gaps_are_bounded() {
        let mut provider = TestModelProvider::default();
        provider.add_response_step(verdict(
            false,
            &["Population of Paris", "population of paris", "History", "Mayor"],
        ));
        provider.add_response_step(follow_ups(&["Paris population", "Paris history"]));

        let outcome = analyzer(&provider, 2)
            .analyze(QUESTION, &[result()], &[], 0, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.sufficient);
        assert_eq!(outcome.gaps, ["Population of Paris", "History"]);
        assert_eq!(outcome.follow_ups.len(), 2);
        assert!(outcome.follow_ups.iter().all(|q| q.wave == Wave::FollowUp(1)));
    }

    #[tokio::test]
    async fn test_malformed_verdict() {
        let mut provider = TestModelProvider::default();
        provider.add_response_step(PresetResponse::text("It looks fine to me."));
        provider.add_response_step(verdict(false, &[]));
        provider.add_response_step(follow_ups(&["capital city of France today"]));

        let outcome = analyzer(&provider, 5)
            .analyze(QUESTION, &[result()], &[], 0, 1, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.sufficient);
        assert_eq!(outcome.gaps.len(), 1);
        assert!(outcome.gaps[0].contains(QUESTION));
        assert_eq!(outcome.follow_ups[0].text, "capital city of France today");
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        // No script at all: any model call would fail.
        let provider = TestModelProvider::default();
        let outcome = analyzer(&provider, 5)
            .analyze(QUESTION, &[result()], &[], 1, 1, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.sufficient);
        assert!(provider.requests().is_empty());
    }
}
