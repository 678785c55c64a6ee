use std::sync::{Arc, Mutex};
use std::time::Duration;

use pro_search_model::{ErrorKind as ProviderErrorKind, GroundingSource, SearchResponse};
use pro_search_test_model::{
    PresetResponse, PresetSearch, TestModelProvider, TestSearchProvider,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::{
    ErrorKind, ResearchConfig, ResearchEvent, ResearchResult, Researcher,
    ResearcherBuilder, Stage,
};

const QUESTION: &str = "What is the capital of France?";

fn queries(texts: &[&str]) -> PresetResponse {
    let queries: Vec<Value> = texts
        .iter()
        .map(|q| json!({ "query": q, "rationale": "relevant" }))
        .collect();
    PresetResponse::json(&json!({ "queries": queries }))
}

fn verdict(sufficient: bool, gaps: &[&str]) -> PresetResponse {
    PresetResponse::json(&json!({
        "is_sufficient": sufficient,
        "knowledge_gaps": gaps,
    }))
}

fn page(snippet: &str, url: &str, title: &str) -> SearchResponse {
    SearchResponse {
        snippets: vec![snippet.to_owned()],
        sources: vec![GroundingSource {
            url: url.to_owned(),
            title: title.to_owned(),
            span: None,
        }],
    }
}

fn researcher(
    model: &TestModelProvider,
    search: &TestSearchProvider,
    events: Option<Arc<Mutex<Vec<ResearchEvent>>>>,
) -> Researcher {
    let config = ResearchConfig::default().with_max_transient_retries(0);
    let mut builder = ResearcherBuilder::with_providers(model.clone(), search.clone())
        .with_config(config);
    if let Some(events) = events {
        builder = builder.on_event(move |event| {
            events.lock().unwrap().push(event.clone());
        });
    }
    builder.build().unwrap()
}

fn stages(events: &Mutex<Vec<ResearchEvent>>) -> Vec<Stage> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ResearchEvent::StageChanged { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_capital_of_france() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["capital of France"]));
    model.add_response_step(verdict(true, &[]));
    model.add_response_step(PresetResponse::text(
        "The capital of France is Paris [src:1].",
    ));

    let mut search = TestSearchProvider::default();
    search.add_response(
        "capital of France",
        page(
            "Paris is the capital of France",
            "https://example.org/france",
            "France",
        ),
    );

    let events = Arc::new(Mutex::new(vec![]));
    let result = researcher(&model, &search, Some(Arc::clone(&events)))
        .run_research(QUESTION, 1, 1)
        .await;

    assert!(result.success, "{:?}", result.error_detail);
    assert_eq!(result.loop_count_used, 0);
    assert!(result.answer.contains("Paris"));
    assert!(result.answer.contains("(https://example.org/france)"));
    assert!(!result.answer.contains("[src:"));
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].short_id, "1");
    assert_eq!(result.sources[0].url, "https://example.org/france");
    assert_eq!(result.error_kind, None);
    assert_eq!(model.remaining_steps(), 0);

    assert_eq!(
        stages(&events),
        [Stage::Searching, Stage::Reflecting, Stage::Finalizing, Stage::Done]
    );
    let events = events.lock().unwrap();
    assert!(events.contains(&ResearchEvent::SearchFinished {
        query: "capital of France".to_owned(),
        success: true,
        sources: 1,
    }));
    assert!(events.contains(&ResearchEvent::AnswerReady));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ResearchEvent::AnswerDelta { .. }))
    );
}

#[tokio::test]
async fn test_tracking_parameter_dedupe() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["capital of France", "French capital city"]));
    model.add_response_step(verdict(true, &[]));
    model.add_response_step(PresetResponse::text("Paris [src:1]."));

    let mut search = TestSearchProvider::default();
    search.add_response(
        "capital of France",
        page("Paris", "https://example.org/france?utm=1", "France"),
    );
    search.add_response(
        "French capital city",
        page("Paris again", "https://example.org/france", "France"),
    );

    let result = researcher(&model, &search, None)
        .run_research(QUESTION, 1, 2)
        .await;
    assert!(result.success);
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.results[0].sources[0].short_id, "1");
    assert_eq!(result.results[1].sources[0].short_id, "1");
    assert_eq!(result.sources.len(), 1);
}

#[tokio::test]
async fn test_malformed_reflection_still_finalizes() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["capital of France"]));
    // Loop 0: two malformed verdicts, then the follow-up for the generic gap.
    model.add_response_step(PresetResponse::text("Looks good."));
    model.add_response_step(PresetResponse::text("Still looks good."));
    model.add_response_step(queries(&["Paris capital history"]));
    // Loop 1: same again.
    model.add_response_step(PresetResponse::text("{ not json"));
    model.add_response_step(PresetResponse::json(&json!({ "sufficient": "maybe" })));
    model.add_response_step(queries(&["Paris seat of government"]));
    // Loop 2 is the last one, reflection is skipped.
    model.add_response_step(PresetResponse::text("Paris [src:1][src:3]."));

    let mut search = TestSearchProvider::default();
    search.add_response(
        "capital of France",
        page("Paris is the capital", "https://example.org/france", "France"),
    );
    search.add_response(
        "Paris capital history",
        page("Capital since 987", "https://example.org/history", "History"),
    );
    search.add_response(
        "Paris seat of government",
        page("Seat of government", "https://example.org/gov", "Government"),
    );

    let events = Arc::new(Mutex::new(vec![]));
    let result = researcher(&model, &search, Some(Arc::clone(&events)))
        .run_research(QUESTION, 2, 1)
        .await;

    assert!(result.success, "{:?}", result.error_detail);
    assert_eq!(result.loop_count_used, 2);
    assert_eq!(result.queries.len(), 3);
    assert_eq!(model.remaining_steps(), 0);
    let ids: Vec<&str> = result.sources.iter().map(|c| c.short_id.as_str()).collect();
    assert_eq!(ids, ["1", "3"]);
    assert_eq!(result.citations.len(), 3);

    let stages = stages(&events);
    assert!(stages.contains(&Stage::Finalizing));
    assert!(!stages.contains(&Stage::Failed));
}

#[tokio::test]
async fn test_loop_budget_wins_over_model() {
    for max_loops in 0..3u32 {
        let mut model = TestModelProvider::default();
        model.add_response_step(queries(&["q0"]));
        let mut search = TestSearchProvider::default();
        search.add_response("q0", page("s0", "https://example.org/0", ""));
        for i in 1..=max_loops {
            model.add_response_step(verdict(false, &["more detail"]));
            let text = format!("q{i}");
            model.add_response_step(queries(&[text.as_str()]));
            search.add_response(
                text,
                page("s", &format!("https://example.org/{i}"), ""),
            );
        }
        model.add_response_step(PresetResponse::text("Done."));

        let result = researcher(&model, &search, None)
            .run_research(QUESTION, max_loops, 1)
            .await;
        assert!(result.success, "{:?}", result.error_detail);
        assert_eq!(result.loop_count_used, max_loops);
        assert_eq!(result.results.len(), max_loops as usize + 1);
        // The answer has no markers, so no source is listed.
        assert!(result.sources.is_empty());
        assert_eq!(result.citations.len(), max_loops as usize + 1);
        assert_eq!(model.remaining_steps(), 0);
    }
}

#[tokio::test]
async fn test_all_queries_failed() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["a", "b"]));
    model.add_response_step(PresetResponse::text("never used"));

    let mut search = TestSearchProvider::default();
    search.add_failure("a", ProviderErrorKind::Other);
    search.add_failure("b", ProviderErrorKind::RateLimitExceeded);

    let events = Arc::new(Mutex::new(vec![]));
    let result = researcher(&model, &search, Some(Arc::clone(&events)))
        .run_research(QUESTION, 2, 2)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::AllQueriesFailed));
    assert!(result.answer.is_empty());
    assert_eq!(result.results.len(), 2);
    assert!(result.results.iter().all(|r| !r.success));
    assert_eq!(model.remaining_steps(), 1);
    assert_eq!(stages(&events), [Stage::Searching, Stage::Failed]);
}

#[tokio::test]
async fn test_partial_failure_proceeds() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["broken", "capital of France"]));
    model.add_response_step(verdict(true, &[]));
    model.add_response_step(PresetResponse::text("Paris [src:1]."));

    let mut search = TestSearchProvider::default();
    search.add_failure("broken", ProviderErrorKind::Other);
    search.add_response(
        "capital of France",
        page("Paris", "https://example.org/france", "France"),
    );

    let result = researcher(&model, &search, None)
        .run_research(QUESTION, 1, 2)
        .await;
    assert!(result.success);
    assert_eq!(result.results.len(), 2);
    assert!(!result.results[0].success);
    assert!(result.results[1].success);

    // The reflection prompt tells the model about the failed search.
    let reflection = &model.requests()[1];
    let prompt = format!("{:?}", reflection.messages);
    assert!(prompt.contains("search failed"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["slow"]));
    model.add_response_step(verdict(true, &[]));

    let mut search = TestSearchProvider::default();
    search.add_preset(
        "slow",
        PresetSearch::response(page("late", "https://example.org/late", ""))
            .with_delay(Duration::from_secs(10)),
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let result = researcher(&model, &search, None)
        .run_research_with_cancel(QUESTION, 2, 1, cancel)
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    assert!(result.citations.is_empty());
    assert_eq!(model.remaining_steps(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reproducible_short_ids() {
    async fn run(slow: &str) -> ResearchResult {
        let mut model = TestModelProvider::default();
        model.add_response_step(queries(&["a", "b", "c"]));
        model.add_response_step(verdict(true, &[]));
        model.add_response_step(PresetResponse::text("[src:1] [src:2] [src:3]"));

        let mut search = TestSearchProvider::default();
        search.set_default_delay(Duration::from_millis(10));
        for query in ["a", "b", "c"] {
            let mut preset = PresetSearch::response(page(
                query,
                &format!("https://{query}.example/"),
                query,
            ));
            if query == slow {
                preset = preset.with_delay(Duration::from_secs(1));
            }
            search.add_preset(query, preset);
        }
        researcher(&model, &search, None)
            .run_research(QUESTION, 0, 3)
            .await
    }

    let first = run("a").await;
    let second = run("c").await;
    assert!(first.success && second.success);
    assert_eq!(first.citations, second.citations);
    assert_eq!(first.answer, second.answer);
    assert_eq!(first.citations[0].url, "https://a.example/");
}

#[tokio::test]
async fn test_follow_up_failure_answers_anyway() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["capital of France"]));
    model.add_response_step(verdict(false, &["population"]));
    // Both follow-up attempts only repeat the executed query.
    model.add_response_step(queries(&["Capital of France"]));
    model.add_response_step(queries(&["capital  of france"]));
    model.add_response_step(PresetResponse::text("Paris [src:1]."));

    let mut search = TestSearchProvider::default();
    search.add_response(
        "capital of France",
        page("Paris", "https://example.org/france", "France"),
    );

    let result = researcher(&model, &search, None)
        .run_research(QUESTION, 2, 1)
        .await;
    assert!(result.success, "{:?}", result.error_detail);
    assert_eq!(result.loop_count_used, 0);
    assert_eq!(result.sources.len(), 1);
}

#[tokio::test]
async fn test_failures_without_answer() {
    // Planning fails: nothing gathered.
    let mut model = TestModelProvider::default();
    model.add_response_step(PresetResponse::text("no idea"));
    model.add_response_step(PresetResponse::text("still no idea"));
    let search = TestSearchProvider::default();
    let result = researcher(&model, &search, None)
        .run_research(QUESTION, 1, 1)
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::GenerationContract));
    assert!(result.queries.is_empty());

    // Synthesis fails: partial state is still reported.
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["capital of France"]));
    model.add_response_step(verdict(true, &[]));
    model.add_response_step(PresetResponse::text("Paris").with_failures(0));
    let mut search = TestSearchProvider::default();
    search.add_response(
        "capital of France",
        page("Paris", "https://example.org/france", "France"),
    );
    let result = researcher(&model, &search, None)
        .run_research(QUESTION, 1, 1)
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Generation));
    assert!(result.answer.is_empty());
    assert!(result.sources.is_empty());
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.results.len(), 1);
}

#[tokio::test]
async fn test_answer_model_override() {
    let mut model = TestModelProvider::default();
    model.add_response_step(queries(&["capital of France"]));
    model.add_response_step(verdict(true, &[]));
    let mut answer_model = TestModelProvider::default();
    answer_model.add_response_step(PresetResponse::text("Paris [src:1]."));

    let mut search = TestSearchProvider::default();
    search.add_response(
        "capital of France",
        page("Paris", "https://example.org/france", "France"),
    );

    let result = ResearcherBuilder::with_providers(model.clone(), search)
        .with_answer_model_provider(answer_model.clone())
        .build()
        .unwrap()
        .run_research(QUESTION, 1, 1)
        .await;
    assert!(result.success);
    assert_eq!(model.requests().len(), 2);
    assert_eq!(answer_model.requests().len(), 1);
    assert_eq!(answer_model.requests()[0].temperature, Some(0.0));
    assert_eq!(model.requests()[0].temperature, Some(1.0));
}

#[test]
fn test_invalid_config() {
    let built = ResearcherBuilder::with_providers(
        TestModelProvider::default(),
        TestSearchProvider::default(),
    )
    .with_config(ResearchConfig::default().with_initial_queries(0))
    .build();
    assert!(built.is_err());
}
