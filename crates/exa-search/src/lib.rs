//! A grounded search provider backed by the Exa search API.

#[macro_use]
extern crate tracing;

mod config;
mod proto;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use pro_search_model::{
    ErrorKind, SearchProvider, SearchProviderError, SearchResponse,
};
use reqwest::{Client, StatusCode, header};

pub use config::{ExaConfig, ExaConfigBuilder};
use proto::SearchReply;

/// Error type for [`ExaProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl SearchProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Exa search provider.
#[derive(Clone, Debug)]
pub struct ExaProvider {
    client: Client,
    config: Arc<ExaConfig>,
}

impl ExaProvider {
    /// Creates a new `ExaProvider` with the given configuration.
    #[inline]
    pub fn new(config: ExaConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl SearchProvider for ExaProvider {
    type Error = Error;

    fn search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<SearchResponse, Self::Error>> + Send + 'static
    {
        let exa_req = proto::create_request(query, &self.config);
        let max_characters = self.config.max_characters as usize;
        let resp_fut = self
            .client
            .post(format!("{}{}", self.config.base_url, "/search"))
            .header("x-api-key", &self.config.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&exa_req)
            .send();

        async move {
            let resp = resp_fut
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                debug!("search failed with {status}: {body}");
                let kind = if status == StatusCode::TOO_MANY_REQUESTS {
                    ErrorKind::RateLimitExceeded
                } else {
                    ErrorKind::Other
                };
                return Err(Error::new(format!("HTTP {status}: {body}"), kind));
            }

            let reply = resp.json::<SearchReply>().await.map_err(|err| {
                Error::new(format!("invalid search reply: {err}"), ErrorKind::Other)
            })?;
            trace!("got {} hits", reply.results.len());
            Ok(proto::into_response(reply, max_characters))
        }
    }
}
