use std::time::Duration;

use pro_search_model::{ErrorKind, SearchResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    /// Breaks the stream with an error after the previous events.
    #[serde(rename = "interrupt")]
    Interrupt,
}

/// The preset response for one model call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failure` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Creates a response that streams `text` in a few deltas.
    pub fn text(text: &str) -> Self {
        let mut events = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            let mut cut = rest.len().min(16);
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            let (head, tail) = rest.split_at(cut);
            events.push(PresetEvent::MessageDelta(head.to_owned()));
            rest = tail;
        }
        Self::with_events(events)
    }

    /// Creates a response whose text is the serialized JSON `value`.
    #[inline]
    pub fn json(value: &Value) -> Self {
        Self::text(&value.to_string())
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }
}

/// The preset outcome of one search query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresetSearch {
    pub(crate) outcome: Result<SearchResponse, ErrorKind>,
    pub(crate) delay: Option<Duration>,
}

impl PresetSearch {
    /// A search that succeeds with `response`.
    #[inline]
    pub fn response(response: SearchResponse) -> Self {
        Self {
            outcome: Ok(response),
            delay: None,
        }
    }

    /// A search that fails with an error of `kind`.
    #[inline]
    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            outcome: Err(kind),
            delay: None,
        }
    }

    /// Delays the outcome by `delay`.
    #[inline]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}
