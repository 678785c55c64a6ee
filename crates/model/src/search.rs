use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// The error type for a search provider.
pub trait SearchProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A grounded web search backend.
///
/// Like [`crate::ModelProvider`], the provider should behave like a
/// stateless object, and the returned future must not borrow from it,
/// so that many searches can be in flight at the same time.
pub trait SearchProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: SearchProviderError;

    /// Runs a search for the given query text.
    fn search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<SearchResponse, Self::Error>> + Send + 'static;
}

/// Ranked snippets and the sources that support them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Snippet texts, best match first.
    pub snippets: Vec<String>,
    /// Sources backing the snippets.
    pub sources: Vec<GroundingSource>,
}

/// A web page that supports (part of) a snippet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundingSource {
    /// The URL as returned by the backend.
    pub url: String,
    /// A human readable title, may be empty.
    pub title: String,
    /// The part of a snippet this source supports, if known.
    pub span: Option<TextSpan>,
}

/// A byte range inside one of the snippets of a [`SearchResponse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextSpan {
    /// Index into [`SearchResponse::snippets`].
    pub snippet: usize,
    /// Start offset in bytes, inclusive.
    pub start: usize,
    /// End offset in bytes, exclusive.
    pub end: usize,
}
