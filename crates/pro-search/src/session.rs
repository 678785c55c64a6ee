use std::sync::Arc;

use pro_search_core::{
    ConfigError, ResearchConfig, ResearchEvent, ResearchResult, Researcher,
    ResearcherBuilder,
};
use pro_search_exa::{ExaConfig, ExaProvider};
use pro_search_openai_model::{OpenAIConfig, OpenAIProvider};
use tokio_util::sync::CancellationToken;

type EventFn = Arc<dyn Fn(&ResearchEvent) + Send + Sync>;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    model: OpenAIConfig,
    answer_model: Option<OpenAIConfig>,
    search: ExaConfig,
    config: ResearchConfig,
    on_event: Option<EventFn>,
}

impl SessionBuilder {
    /// Creates a session builder that talks to `model` for every generation
    /// and to `search` for every web search.
    pub fn with_providers(model: OpenAIConfig, search: ExaConfig) -> Self {
        Self {
            model,
            answer_model: None,
            search,
            config: ResearchConfig::default(),
            on_event: None,
        }
    }

    /// Uses another model for writing the final answer.
    #[inline]
    pub fn with_answer_model(mut self, model: OpenAIConfig) -> Self {
        self.answer_model = Some(model);
        self
    }

    /// Replaces the default research configuration.
    #[inline]
    pub fn with_config(mut self, config: ResearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a callback to be invoked on every research progress event.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(&ResearchEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Result<Session, ConfigError> {
        let mut builder = ResearcherBuilder::with_providers(
            OpenAIProvider::new(self.model),
            ExaProvider::new(self.search),
        )
        .with_config(self.config);
        if let Some(answer_model) = self.answer_model {
            builder =
                builder.with_answer_model_provider(OpenAIProvider::new(answer_model));
        }
        if let Some(on_event) = self.on_event {
            builder = builder.on_event(move |event| on_event(event));
        }

        let researcher = builder.build()?;
        Ok(Session { researcher })
    }
}

/// A research session.
///
/// The session holds a fully configured researcher that you can use directly,
/// and it is basically a wrapper around [`Researcher`].
#[derive(Clone)]
pub struct Session {
    researcher: Researcher,
}

impl Session {
    /// Returns the underlying researcher.
    #[inline]
    pub fn researcher(&self) -> &Researcher {
        &self.researcher
    }

    /// Researches `question` with the loop and query budgets of the session's
    /// configuration.
    pub async fn ask(
        &self,
        question: &str,
        cancel: CancellationToken,
    ) -> ResearchResult {
        let config = self.researcher.config();
        self.researcher
            .run_research_with_cancel(
                question,
                config.max_research_loops,
                config.number_of_initial_queries,
                cancel,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use pro_search_exa::ExaConfigBuilder;
    use pro_search_openai_model::OpenAIConfigBuilder;

    use super::*;

    fn builder() -> SessionBuilder {
        SessionBuilder::with_providers(
            OpenAIConfigBuilder::with_api_key("sk-test").build(),
            ExaConfigBuilder::with_api_key("exa-test").build(),
        )
    }

    #[test]
    fn test_build_session() {
        let session = builder()
            .with_answer_model(
                OpenAIConfigBuilder::with_api_key("sk-test")
                    .with_model("gpt-answer")
                    .build(),
            )
            .with_config(
                ResearchConfig::default()
                    .with_initial_queries(4)
                    .with_max_research_loops(1),
            )
            .on_event(|_| {})
            .build()
            .unwrap();
        let config = session.researcher().config();
        assert_eq!(config.number_of_initial_queries, 4);
        assert_eq!(config.max_research_loops, 1);
    }

    #[test]
    fn test_invalid_config() {
        let err = builder()
            .with_config(ResearchConfig::default().with_max_concurrent_searches(0))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::Zero("max_concurrent_searches"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let session = builder().build().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = session.ask("What is the capital of France?", cancel).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(pro_search_core::ErrorKind::Cancelled));
        assert!(result.queries.is_empty());
    }
}
