use serde::{Deserialize, Serialize};

use super::ResearchResult;
use crate::citation::{Citation, CitationRegistry};
use crate::error::Error;
use crate::executor::SearchResult;
use crate::planner::SearchQuery;
use crate::synthesizer::Answer;

/// The stage a research run is in.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Writing the initial queries.
    #[default]
    Planning,
    /// Running a wave of searches.
    Searching,
    /// Looking for knowledge gaps.
    Reflecting,
    /// Writing the answer.
    Finalizing,
    /// The answer is ready.
    Done,
    /// The run ended with an error.
    Failed,
}

impl Stage {
    /// Returns `true` for [`Stage::Done`] and [`Stage::Failed`].
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    fn can_move_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Planning, Searching)
            | (Searching, Reflecting)
            | (Reflecting, Searching | Finalizing)
            | (Finalizing, Done) => true,
            _ => false,
        }
    }
}

/// Everything a single run has gathered so far.
///
/// The state is owned by one run and dropped (or turned into a
/// [`ResearchResult`]) when the run is over. Nothing changes once the stage
/// is terminal.
pub(crate) struct ResearchState {
    question: String,
    stage: Stage,
    queries: Vec<SearchQuery>,
    results: Vec<SearchResult>,
    pending: Vec<SearchQuery>,
    loop_count: u32,
    max_loops: u32,
    registry: CitationRegistry,
    answer: Option<Answer>,
    error: Option<Error>,
}

impl ResearchState {
    pub fn new(question: &str, max_loops: u32) -> Self {
        Self {
            question: question.to_owned(),
            stage: Stage::default(),
            queries: vec![],
            results: vec![],
            pending: vec![],
            loop_count: 0,
            max_loops,
            registry: CitationRegistry::default(),
            answer: None,
            error: None,
        }
    }

    #[inline]
    pub fn question(&self) -> &str {
        &self.question
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    pub fn queries(&self) -> &[SearchQuery] {
        &self.queries
    }

    #[inline]
    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    #[inline]
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    #[inline]
    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    #[inline]
    pub fn registry(&self) -> &CitationRegistry {
        &self.registry
    }

    /// Returns `true` if any wave recorded so far produced a success.
    pub fn has_results(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }

    /// Moves to `next`, refusing illegal transitions.
    pub fn transition(&mut self, next: Stage) {
        if !self.stage.can_move_to(next) {
            error!("illegal stage transition {:?} -> {next:?}", self.stage);
            return;
        }
        debug!("stage {:?} -> {next:?} (loop {})", self.stage, self.loop_count);
        self.stage = next;
    }

    /// Sets the queries of the next wave.
    pub fn set_pending(&mut self, queries: Vec<SearchQuery>) {
        if self.stage.is_terminal() {
            return;
        }
        self.pending = queries;
    }

    /// Hands out the next wave together with the registry it registers into.
    pub fn take_pending(&mut self) -> (Vec<SearchQuery>, &mut CitationRegistry) {
        (std::mem::take(&mut self.pending), &mut self.registry)
    }

    /// Appends a finished wave.
    pub fn record_wave(
        &mut self,
        queries: Vec<SearchQuery>,
        results: Vec<SearchResult>,
    ) {
        if self.stage.is_terminal() {
            return;
        }
        self.queries.extend(queries);
        self.results.extend(results);
    }

    /// Starts the next follow-up loop.
    pub fn next_loop(&mut self) -> Result<(), Error> {
        if self.loop_count >= self.max_loops {
            error!(
                "loop count {} would exceed the maximum of {}",
                self.loop_count + 1,
                self.max_loops
            );
            return Err(Error::LoopBudgetExceededWithNoResult(self.max_loops));
        }
        self.loop_count += 1;
        Ok(())
    }

    /// Stores the answer and ends the run.
    pub fn finish(&mut self, answer: Answer) {
        if self.stage.is_terminal() {
            return;
        }
        self.answer = Some(answer);
        self.transition(Stage::Done);
    }

    /// Stores the error and ends the run.
    pub fn fail(&mut self, err: Error) {
        if self.stage.is_terminal() {
            return;
        }
        warn!("research failed in {:?}: {err}", self.stage);
        self.error = Some(err);
        self.transition(Stage::Failed);
    }

    pub fn into_result(self) -> ResearchResult {
        let citations: Vec<Citation> = self.registry.all().to_vec();
        let (answer, sources) = match self.answer {
            Some(answer) if self.stage == Stage::Done => {
                (answer.text, answer.referenced)
            }
            _ => (String::new(), vec![]),
        };
        ResearchResult {
            answer,
            sources,
            loop_count_used: self.loop_count,
            success: self.stage == Stage::Done,
            error_detail: self.error.as_ref().map(ToString::to_string),
            error_kind: self.error.as_ref().map(Error::kind),
            queries: self.queries,
            results: self.results,
            citations,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::planner::Wave;

    #[test]
    fn test_transitions() {
        let mut state = ResearchState::new("q", 1);
        assert_eq!(state.stage(), Stage::Planning);

        // Skipping the search stage is refused.
        state.transition(Stage::Reflecting);
        assert_eq!(state.stage(), Stage::Planning);

        state.transition(Stage::Searching);
        state.transition(Stage::Reflecting);
        state.next_loop().unwrap();
        assert_eq!(
            state.next_loop(),
            Err(Error::LoopBudgetExceededWithNoResult(1))
        );
        assert_eq!(state.loop_count(), 1);

        state.fail(Error::Cancelled);
        assert_eq!(state.stage(), Stage::Failed);
        // Terminal states are final.
        state.fail(Error::AllQueriesFailed(1));
        state.transition(Stage::Searching);
        assert_eq!(state.stage(), Stage::Failed);

        let result = state.into_result();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(crate::ErrorKind::Cancelled));
        assert_eq!(result.loop_count_used, 1);
        assert!(result.answer.is_empty());
    }

    fn result(text: &str, success: bool, wave: Wave) -> (SearchQuery, SearchResult) {
        let query = SearchQuery {
            text: text.to_owned(),
            rationale: String::new(),
            wave,
        };
        let result = SearchResult {
            query: query.clone(),
            snippets: vec![],
            sources: vec![],
            duration: Duration::ZERO,
            success,
            error: (!success).then(|| "timed out".to_owned()),
        };
        (query, result)
    }

    #[test]
    fn test_has_results_spans_every_wave() {
        let mut state = ResearchState::new("q", 2);
        assert!(!state.has_results());

        let (q1, r1) = result("first", true, Wave::Initial);
        state.record_wave(vec![q1], vec![r1]);
        assert!(state.has_results());

        let (q2, r2) = result("second", false, Wave::FollowUp(1));
        state.record_wave(vec![q2], vec![r2]);
        assert!(state.has_results());
        assert_eq!(state.results().len(), 2);
    }
}
