use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pro_search_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, StreamError};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Set when a chunk carries a finish reason, cleared once the completed
    // event has been returned.
    pending_finish_reason: Option<ModelFinishReason>,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_finish_reason: None,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

fn finish_reason(raw: &str) -> ModelFinishReason {
    match raw {
        "length" => ModelFinishReason::Length,
        "content_filter" => ModelFinishReason::ContentFilter,
        _ => ModelFinishReason::Stop,
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    // A finish reason that arrived with the last delta goes out next.
    if let Some(reason) = partial_state.pending_finish_reason.take() {
        return Ok((Some(ModelResponseEvent::Completed(reason)), partial_state));
    }

    let sse = &mut partial_state.sse;
    loop {
        let sse_event = match sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            break;
        }

        let chunk = match serde_json::from_str::<ChatCompletionChunk>(&sse_event)
        {
            Ok(chunk) => chunk,
            Err(err) => {
                let message = match serde_json::from_str::<StreamError>(&sse_event) {
                    Ok(stream_err) => stream_err.error.message,
                    Err(_) => format!("{err}"),
                };
                return Err(Error::new(message, ErrorKind::Other));
            }
        };
        if let Some(id) = chunk.id {
            if partial_state.id.get_or_insert_with(|| id.clone()) != &id {
                return Err(Error::new("chunk id mismatch", ErrorKind::Other));
            }
        }

        // Usage-only chunks carry no choice.
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };
        let reason = choice.finish_reason.as_deref().map(finish_reason);
        let delta = choice.delta.content.filter(|c| !c.is_empty());

        match (delta, reason) {
            (Some(delta), reason) => {
                partial_state.pending_finish_reason = reason;
                return Ok((
                    Some(ModelResponseEvent::MessageDelta(delta)),
                    partial_state,
                ));
            }
            (None, Some(reason)) => {
                return Ok((
                    Some(ModelResponseEvent::Completed(reason)),
                    partial_state,
                ));
            }
            (None, None) => {}
        }
    }

    Ok((None, partial_state))
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;

    use super::*;
    use crate::io::Chunks;

    async fn collect(chunks: &[&'static str]) -> Result<Vec<ModelResponseEvent>, Error> {
        let chunks = Chunks::from_vec_deque(
            chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect(),
        );
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_simple_events() {
        let events = collect(&[
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"{\\\"ok\\\":\"},\"finish_reason\":null}]}\n\n",
            ": processing\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\" true}\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"total_tokens\":9}}\n\n",
            "data: [DONE]\n\n",
        ])
        .await
        .unwrap();
        assert_eq!(
            events,
            [
                ModelResponseEvent::MessageDelta("{\"ok\":".to_owned()),
                ModelResponseEvent::MessageDelta(" true}".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_delta_with_finish_reason() {
        let events = collect(&[
            "data: {\"id\":\"c2\",\"choices\":[{\"delta\":{\"content\":\"cut\"},\"finish_reason\":\"length\"}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await
        .unwrap();
        assert_eq!(
            events,
            [
                ModelResponseEvent::MessageDelta("cut".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Length),
            ]
        );
    }

    #[tokio::test]
    async fn test_errors() {
        let err = collect(&[
            "data: {\"error\":{\"message\":\"server overloaded\",\"code\":null}}\n\n",
        ])
        .await
        .unwrap_err();
        assert_eq!(err.message(), "server overloaded");

        let err = collect(&[
            "data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"b\",\"choices\":[{\"delta\":{\"content\":\"y\"},\"finish_reason\":null}]}\n\n",
        ])
        .await
        .unwrap_err();
        assert_eq!(err.message(), "chunk id mismatch");
    }
}
