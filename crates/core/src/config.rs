//! Tunables of a research run.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An error raised while reading configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value {value:?} for {name}")]
    InvalidValue {
        /// Name of the variable.
        name: &'static str,
        /// The raw value.
        value: String,
    },
    /// A value is out of its allowed range.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Configuration of the research engine.
///
/// Every field has a default, and [`ResearchConfig::from_env`] overlays
/// environment variables named after the upper-cased field names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Queries generated for the initial wave.
    pub number_of_initial_queries: usize,
    /// Follow-up waves allowed after the initial one.
    pub max_research_loops: u32,
    /// Upper bound of knowledge gaps (and follow-up queries) per wave.
    pub max_follow_up_queries: usize,
    /// Searches in flight at the same time within a wave.
    pub max_concurrent_searches: usize,
    /// Timeout of a single search call.
    #[serde(with = "secs")]
    pub search_timeout: Duration,
    /// Timeout of a single text-generation call.
    #[serde(with = "secs")]
    pub generation_timeout: Duration,
    /// Retries of a generation call after a transient provider error.
    pub max_transient_retries: u32,
    /// Sampling temperature for query writing.
    pub query_temperature: f32,
    /// Sampling temperature for reflection.
    pub reflection_temperature: f32,
    /// Sampling temperature for the final answer.
    pub answer_temperature: f32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            number_of_initial_queries: 3,
            max_research_loops: 2,
            max_follow_up_queries: 5,
            max_concurrent_searches: 10,
            search_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            max_transient_retries: 2,
            query_temperature: 1.0,
            reflection_temperature: 1.0,
            answer_temperature: 0.0,
        }
    }
}

impl ResearchConfig {
    /// Reads the default configuration overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_from(|name| env::var(name).ok())
    }

    /// Overlays values returned by `lookup`, keyed by upper-cased field
    /// names, on top of `self`.
    pub fn merge_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = read("NUMBER_OF_INITIAL_QUERIES") {
            self.number_of_initial_queries = parse("NUMBER_OF_INITIAL_QUERIES", v)?;
        }
        if let Some(v) = read("MAX_RESEARCH_LOOPS") {
            self.max_research_loops = parse("MAX_RESEARCH_LOOPS", v)?;
        }
        if let Some(v) = read("MAX_FOLLOW_UP_QUERIES") {
            self.max_follow_up_queries = parse("MAX_FOLLOW_UP_QUERIES", v)?;
        }
        if let Some(v) = read("MAX_CONCURRENT_SEARCHES") {
            self.max_concurrent_searches = parse("MAX_CONCURRENT_SEARCHES", v)?;
        }
        if let Some(v) = read("SEARCH_TIMEOUT") {
            self.search_timeout = parse_secs("SEARCH_TIMEOUT", v)?;
        }
        if let Some(v) = read("GENERATION_TIMEOUT") {
            self.generation_timeout = parse_secs("GENERATION_TIMEOUT", v)?;
        }
        if let Some(v) = read("MAX_TRANSIENT_RETRIES") {
            self.max_transient_retries = parse("MAX_TRANSIENT_RETRIES", v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks the values that must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.number_of_initial_queries == 0 {
            return Err(ConfigError::Zero("number_of_initial_queries"));
        }
        if self.max_follow_up_queries == 0 {
            return Err(ConfigError::Zero("max_follow_up_queries"));
        }
        if self.max_concurrent_searches == 0 {
            return Err(ConfigError::Zero("max_concurrent_searches"));
        }
        if self.search_timeout.is_zero() {
            return Err(ConfigError::Zero("search_timeout"));
        }
        if self.generation_timeout.is_zero() {
            return Err(ConfigError::Zero("generation_timeout"));
        }
        Ok(())
    }

    /// Sets the number of initial queries.
    #[inline]
    pub fn with_initial_queries(mut self, count: usize) -> Self {
        self.number_of_initial_queries = count;
        self
    }

    /// Sets the maximum number of follow-up waves.
    #[inline]
    pub fn with_max_research_loops(mut self, loops: u32) -> Self {
        self.max_research_loops = loops;
        self
    }

    /// Sets the per-wave follow-up bound.
    #[inline]
    pub fn with_max_follow_up_queries(mut self, count: usize) -> Self {
        self.max_follow_up_queries = count;
        self
    }

    /// Sets the search concurrency ceiling.
    #[inline]
    pub fn with_max_concurrent_searches(mut self, count: usize) -> Self {
        self.max_concurrent_searches = count;
        self
    }

    /// Sets the timeout of a single search call.
    #[inline]
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Sets the timeout of a single generation call.
    #[inline]
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Sets the number of retries after transient provider errors.
    #[inline]
    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    let secs: f64 = parse(name, value.clone())?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
