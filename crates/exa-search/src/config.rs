use std::fmt::{self, Debug};

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";

/// Builder for [`ExaConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ExaConfigBuilder {
    api_key: String,
    base_url: Option<String>,
    num_results: Option<u32>,
    max_characters: Option<u32>,
}

impl ExaConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            num_results: None,
            max_characters: None,
        }
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets how many pages a search returns.
    #[inline]
    pub fn with_num_results(mut self, num_results: u32) -> Self {
        self.num_results = Some(num_results);
        self
    }

    /// Caps the page text kept per result.
    #[inline]
    pub fn with_max_characters(mut self, max_characters: u32) -> Self {
        self.max_characters = Some(max_characters);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ExaConfig {
        ExaConfig {
            api_key: self.api_key,
            base_url: self
                .base_url
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            num_results: self.num_results.unwrap_or(5).max(1),
            max_characters: self.max_characters.unwrap_or(1500).max(1),
        }
    }
}

impl Debug for ExaConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExaConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("num_results", &self.num_results)
            .field("max_characters", &self.max_characters)
            .finish()
    }
}

/// Configuration for the Exa search provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ExaConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) num_results: u32,
    pub(crate) max_characters: u32,
}

impl Debug for ExaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExaConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("num_results", &self.num_results)
            .field("max_characters", &self.max_characters)
            .finish()
    }
}
