use std::pin::Pin;
use std::sync::Arc;

use pro_search_model::{SearchProvider, SearchProviderError, SearchResponse};
use tracing::Instrument;

type SearchResult = Result<SearchResponse, Box<dyn SearchProviderError>>;
type BoxedSearchFuture = Pin<Box<dyn Future<Output = SearchResult> + Send>>;
type HandlerFn = Arc<dyn Fn(&str) -> BoxedSearchFuture + Send + Sync>;

/// A type-erased handle to a search provider, cheap to clone into
/// concurrent tasks.
#[derive(Clone)]
pub struct SearchClient {
    handler_fn: HandlerFn,
}

impl SearchClient {
    #[inline]
    pub fn new<P: SearchProvider + 'static>(provider: P) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |query| {
            let fut = provider.search(query);
            let span = trace_span!("search client req", query);
            Box::pin(
                async move {
                    let resp = fut.await.map_err(|err| {
                        debug!("got an error: {err:?}");
                        Box::new(err) as Box<dyn SearchProviderError>
                    })?;
                    trace!(
                        "got {} snippets and {} sources",
                        resp.snippets.len(),
                        resp.sources.len()
                    );
                    Ok(resp)
                }
                .instrument(span),
            )
        });
        Self { handler_fn }
    }

    /// Runs one search.
    #[inline]
    pub async fn search(&self, query: &str) -> SearchResult {
        (self.handler_fn)(query).await
    }
}
