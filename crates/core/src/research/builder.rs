use std::sync::Arc;

use pro_search_model::{ModelProvider, SearchProvider};

use super::{EventFn, ResearchEvent, Researcher};
use crate::config::{ConfigError, ResearchConfig};
use crate::executor::SearchExecutor;
use crate::generation::Generator;
use crate::model_client::ModelClient;
use crate::planner::QueryPlanner;
use crate::reflection::ReflectionAnalyzer;
use crate::search_client::SearchClient;
use crate::synthesizer::AnswerSynthesizer;

/// [`Researcher`] builder.
pub struct ResearcherBuilder {
    query_client: ModelClient,
    reflection_client: Option<ModelClient>,
    answer_client: Option<ModelClient>,
    search_client: SearchClient,
    config: ResearchConfig,
    on_event: Option<EventFn>,
}

impl ResearcherBuilder {
    /// Creates a new builder that uses `model` for every model call and
    /// `search` for every search.
    #[inline]
    pub fn with_providers<M, S>(model: M, search: S) -> Self
    where
        M: ModelProvider + 'static,
        S: SearchProvider + 'static,
    {
        Self {
            query_client: ModelClient::new(model),
            reflection_client: None,
            answer_client: None,
            search_client: SearchClient::new(search),
            config: ResearchConfig::default(),
            on_event: None,
        }
    }

    /// Uses a different model for reflection.
    #[inline]
    pub fn with_reflection_model_provider<P: ModelProvider + 'static>(
        mut self,
        provider: P,
    ) -> Self {
        self.reflection_client = Some(ModelClient::new(provider));
        self
    }

    /// Uses a different model for the final answer.
    #[inline]
    pub fn with_answer_model_provider<P: ModelProvider + 'static>(
        mut self,
        provider: P,
    ) -> Self {
        self.answer_client = Some(ModelClient::new(provider));
        self
    }

    /// Replaces the default configuration.
    #[inline]
    pub fn with_config(mut self, config: ResearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a callback to be invoked on every progress event.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(&ResearchEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    /// Builds the researcher.
    pub fn build(self) -> Result<Researcher, ConfigError> {
        let Self {
            query_client,
            reflection_client,
            answer_client,
            search_client,
            config,
            on_event,
        } = self;
        config.validate()?;

        let generator = |client: ModelClient, temperature: f32| {
            Generator::new(
                client,
                temperature,
                config.generation_timeout,
                config.max_transient_retries,
            )
        };
        let reflection_client =
            reflection_client.unwrap_or_else(|| query_client.clone());
        let answer_client = answer_client.unwrap_or_else(|| query_client.clone());

        let planner =
            QueryPlanner::new(generator(query_client, config.query_temperature));
        let reflector = ReflectionAnalyzer::new(
            generator(reflection_client, config.reflection_temperature),
            planner.clone(),
            config.max_follow_up_queries,
        );
        let synthesizer = AnswerSynthesizer::new(generator(
            answer_client,
            config.answer_temperature,
        ));
        let executor = SearchExecutor::new(
            search_client,
            config.max_concurrent_searches,
            config.search_timeout,
        );

        Ok(Researcher {
            planner,
            executor,
            reflector,
            synthesizer,
            config,
            on_event,
        })
    }
}
