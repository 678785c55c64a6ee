use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pro_search_model::{ErrorKind, SearchProvider, SearchResponse};
use tokio::time::sleep;

use crate::{Error, PresetSearch};

#[derive(Default)]
struct Inner {
    presets: Mutex<HashMap<String, PresetSearch>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// A local fake search backend for testing purpose.
///
/// Every query must have a preset outcome, keyed by the exact query text.
/// Unknown queries fail with [`ErrorKind::Other`].
#[derive(Clone, Default)]
pub struct TestSearchProvider {
    inner: Arc<Inner>,
    default_delay: Option<Duration>,
}

impl TestSearchProvider {
    #[inline]
    pub fn add_preset<S: Into<String>>(&mut self, query: S, preset: PresetSearch) {
        let mut presets = self
            .inner
            .presets
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        presets.insert(query.into(), preset);
    }

    #[inline]
    pub fn add_response<S: Into<String>>(
        &mut self,
        query: S,
        response: SearchResponse,
    ) {
        self.add_preset(query, PresetSearch::response(response));
    }

    #[inline]
    pub fn add_failure<S: Into<String>>(&mut self, query: S, kind: ErrorKind) {
        self.add_preset(query, PresetSearch::failure(kind));
    }

    /// Delays every search without its own delay.
    #[inline]
    pub fn set_default_delay(&mut self, delay: Duration) {
        self.default_delay = Some(delay);
    }

    /// Returns queries in the order the searches were started.
    pub fn calls(&self) -> Vec<String> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Returns the highest number of searches that were in flight at once.
    #[inline]
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<Inner>);

impl InFlightGuard {
    fn enter(inner: Arc<Inner>) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SearchProvider for TestSearchProvider {
    type Error = crate::Error;

    fn search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<SearchResponse, Self::Error>> + Send + 'static
    {
        let inner = Arc::clone(&self.inner);
        let query = query.to_owned();
        let default_delay = self.default_delay;

        async move {
            inner
                .calls
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .push(query.clone());
            let preset = inner
                .presets
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .get(&query)
                .cloned();

            let _guard = InFlightGuard::enter(Arc::clone(&inner));
            let Some(preset) = preset else {
                return Err(Error::new(
                    format!("no preset for query {query:?}"),
                    ErrorKind::Other,
                ));
            };
            if let Some(delay) = preset.delay.or(default_delay) {
                sleep(delay).await;
            } else {
                tokio::task::yield_now().await;
            }
            preset
                .outcome
                .map_err(|kind| Error::new("preset search failure", kind))
        }
    }
}
