mod builder;
mod state;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::citation::Citation;
use crate::config::ResearchConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::executor::{SearchExecutor, SearchResult};
use crate::planner::{QueryPlanner, SearchQuery};
use crate::reflection::ReflectionAnalyzer;
use crate::synthesizer::AnswerSynthesizer;
pub use builder::ResearcherBuilder;
pub use state::Stage;
use state::ResearchState;

pub(crate) type EventFn = Arc<dyn Fn(&ResearchEvent) + Send + Sync>;

/// A progress notification of a research run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    /// The run moved to another stage.
    StageChanged {
        /// The new stage.
        stage: Stage,
        /// Follow-up loops started so far.
        loop_count: u32,
    },
    /// A wave of queries was planned.
    QueriesPlanned {
        /// The queries of the wave.
        queries: Vec<SearchQuery>,
    },
    /// A search of the current wave finished.
    SearchFinished {
        /// The query text.
        query: String,
        /// Whether the search succeeded.
        success: bool,
        /// Number of sources it returned.
        sources: usize,
    },
    /// Reflection judged the gathered results.
    Reflected {
        /// Whether the results were judged sufficient.
        sufficient: bool,
        /// Knowledge gaps that were found.
        gaps: Vec<String>,
    },
    /// A piece of the answer was generated.
    ///
    /// Pieces are sent once the model reply is complete, and a retried call
    /// only reports the reply that was kept.
    AnswerDelta {
        /// The new text, markers not resolved yet.
        delta: String,
    },
    /// The answer is complete.
    AnswerReady,
}

/// The outcome of a research run.
///
/// Failed runs still carry the queries, results and citations gathered
/// before the failure.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResearchResult {
    /// Markdown answer with inline links, empty on failure.
    pub answer: String,
    /// Citations referenced by the answer, in first-seen order.
    pub sources: Vec<Citation>,
    /// Follow-up loops that were run.
    pub loop_count_used: u32,
    /// Whether an answer was produced.
    pub success: bool,
    /// What went wrong, for failed runs.
    pub error_detail: Option<String>,
    /// The kind of [`ResearchResult::error_detail`].
    pub error_kind: Option<ErrorKind>,
    /// Every executed query, in execution order.
    pub queries: Vec<SearchQuery>,
    /// Every search result, in query order.
    pub results: Vec<SearchResult>,
    /// Every registered citation, referenced or not.
    pub citations: Vec<Citation>,
}

/// The research engine.
///
/// A researcher holds no per-run state, so it can serve many runs, even
/// concurrently. Each run owns its own citation registry.
#[derive(Clone)]
pub struct Researcher {
    planner: QueryPlanner,
    executor: SearchExecutor,
    reflector: ReflectionAnalyzer,
    synthesizer: AnswerSynthesizer,
    config: ResearchConfig,
    on_event: Option<EventFn>,
}

impl Researcher {
    /// Returns the configuration of this researcher.
    #[inline]
    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Researches `question` with at most `max_loops` follow-up waves and
    /// `initial_query_count` queries in the first wave.
    pub async fn run_research(
        &self,
        question: &str,
        max_loops: u32,
        initial_query_count: usize,
    ) -> ResearchResult {
        self.run_research_with_cancel(
            question,
            max_loops,
            initial_query_count,
            CancellationToken::new(),
        )
        .await
    }

    /// Like [`Researcher::run_research`], but stops as soon as `cancel` is
    /// triggered. In-flight calls are dropped and the run fails with
    /// [`ErrorKind::Cancelled`].
    pub async fn run_research_with_cancel(
        &self,
        question: &str,
        max_loops: u32,
        initial_query_count: usize,
        cancel: CancellationToken,
    ) -> ResearchResult {
        let span = info_span!("research run", max_loops, initial_query_count);
        async move {
            let mut state = ResearchState::new(question, max_loops);
            let count = if initial_query_count == 0 {
                warn!("initial query count is zero, planning one query");
                1
            } else {
                initial_query_count
            };

            while !state.stage().is_terminal() {
                let step = match state.stage() {
                    Stage::Planning => self.plan(&mut state, count, &cancel).await,
                    Stage::Searching => self.search(&mut state, &cancel).await,
                    Stage::Reflecting => self.reflect(&mut state, &cancel).await,
                    Stage::Finalizing => self.finalize(&mut state, &cancel).await,
                    Stage::Done | Stage::Failed => break,
                };
                match step {
                    Ok(next) => {
                        if next != Stage::Done {
                            state.transition(next);
                        }
                    }
                    Err(err) => state.fail(err),
                }
                self.emit(ResearchEvent::StageChanged {
                    stage: state.stage(),
                    loop_count: state.loop_count(),
                });
            }

            let result = state.into_result();
            info!(
                "research finished, success: {}, loops: {}, sources: {}",
                result.success,
                result.loop_count_used,
                result.sources.len()
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn plan(
        &self,
        state: &mut ResearchState,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let queries = self
            .planner
            .plan_initial(state.question(), count, cancel)
            .await?;
        info!("planned {} initial queries", queries.len());
        self.emit(ResearchEvent::QueriesPlanned {
            queries: queries.clone(),
        });
        state.set_pending(queries);
        Ok(Stage::Searching)
    }

    async fn search(
        &self,
        state: &mut ResearchState,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let loop_count = state.loop_count();
        let (queries, registry) = state.take_pending();
        let results = self
            .executor
            .execute(&queries, registry, cancel)
            .instrument(info_span!("search wave", loop_count, size = queries.len()))
            .await?;

        for result in &results {
            self.emit(ResearchEvent::SearchFinished {
                query: result.query.text.clone(),
                success: result.success,
                sources: result.sources.len(),
            });
        }
        let all_failed = results.iter().all(|r| !r.success);
        let size = results.len();
        state.record_wave(queries, results);

        if all_failed {
            return Err(Error::AllQueriesFailed(size));
        }
        Ok(Stage::Reflecting)
    }

    async fn reflect(
        &self,
        state: &mut ResearchState,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let outcome = self
            .reflector
            .analyze(
                state.question(),
                state.results(),
                state.queries(),
                state.loop_count(),
                state.max_loops(),
                cancel,
            )
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) if state.has_results() => {
                warn!("reflection failed, answering with what we have: {err}");
                return Ok(Stage::Finalizing);
            }
            Err(err) => return Err(err),
        };

        self.emit(ResearchEvent::Reflected {
            sufficient: outcome.sufficient,
            gaps: outcome.gaps.clone(),
        });
        if outcome.sufficient || outcome.follow_ups.is_empty() {
            return Ok(Stage::Finalizing);
        }

        state.next_loop()?;
        info!(
            "starting loop {} with {} follow-up queries",
            state.loop_count(),
            outcome.follow_ups.len()
        );
        self.emit(ResearchEvent::QueriesPlanned {
            queries: outcome.follow_ups.clone(),
        });
        state.set_pending(outcome.follow_ups);
        Ok(Stage::Searching)
    }

    async fn finalize(
        &self,
        state: &mut ResearchState,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let on_delta = {
            let on_event = self.on_event.clone();
            move |delta: &str| {
                if let Some(on_event) = &on_event {
                    on_event(&ResearchEvent::AnswerDelta {
                        delta: delta.to_owned(),
                    });
                }
            }
        };
        let answer = self
            .synthesizer
            .synthesize(
                state.question(),
                state.results(),
                state.registry(),
                cancel,
                on_delta,
            )
            .await?;
        debug!(
            "answer references {} of {} sources",
            answer.referenced.len(),
            state.registry().len()
        );
        state.finish(answer);
        self.emit(ResearchEvent::AnswerReady);
        Ok(Stage::Done)
    }

    #[inline]
    fn emit(&self, event: ResearchEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(&event);
        }
    }
}
