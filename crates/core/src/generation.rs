use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use pro_search_model::{
    ErrorKind as ProviderErrorKind, ModelFinishReason, ModelProviderError,
    ModelRequest, ResponseFormat,
};
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::model_client::ModelClient;
use crate::prompt::Prompt;

/// A structured reply the model is asked to produce.
pub(crate) trait StructuredOutput: DeserializeOwned + JsonSchema {
    /// Name of the response format sent to the provider.
    const NAME: &'static str;
}

/// Calls a model for one research role.
///
/// Transient provider errors are retried with exponential backoff. Replies
/// that break the structured-output contract are retried once with a
/// stricter prompt.
#[derive(Clone)]
pub(crate) struct Generator {
    client: ModelClient,
    temperature: f32,
    timeout: Duration,
    max_transient_retries: u32,
}

impl Generator {
    #[inline]
    pub fn new(
        client: ModelClient,
        temperature: f32,
        timeout: Duration,
        max_transient_retries: u32,
    ) -> Self {
        Self {
            client,
            temperature,
            timeout,
            max_transient_retries,
        }
    }

    /// Generates a reply of type `T` and checks it with `validate`.
    ///
    /// A rejection from `validate` counts as a contract violation just like
    /// a reply that fails to parse.
    pub async fn generate<T, R, F>(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
        validate: F,
    ) -> Result<R>
    where
        T: StructuredOutput,
        F: Fn(T) -> Result<R, String>,
    {
        let format = ResponseFormat {
            name: T::NAME.to_owned(),
            schema: response_schema::<T>(),
            strict: true,
        };

        let mut rejection: Option<String> = None;
        for attempt in 0..2 {
            let req = prompt.to_request(
                Some(format.clone()),
                self.temperature,
                rejection.as_deref(),
            );
            let transcript = self.send(req, cancel, |_| {}).await?;
            match parse_json::<T>(&transcript).and_then(&validate) {
                Ok(output) => return Ok(output),
                Err(reason) => {
                    warn!(
                        "{} reply rejected (attempt {}): {reason}",
                        prompt.template().id(),
                        attempt + 1
                    );
                    rejection = Some(reason);
                }
            }
        }

        Err(Error::contract(format!(
            "{}: {}",
            T::NAME,
            rejection.unwrap_or_default()
        )))
    }

    /// Generates free text, passing its deltas to `on_delta`.
    ///
    /// Deltas are delivered once the reply has been fully received, and only
    /// for the attempt whose reply is returned.
    pub async fn generate_text<F>(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
        on_delta: F,
    ) -> Result<String>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let req = prompt.to_request(None, self.temperature, None);
        self.send(req, cancel, on_delta).await
    }

    async fn send<F>(
        &self,
        req: ModelRequest,
        cancel: &CancellationToken,
        on_delta: F,
    ) -> Result<String>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let on_delta = Arc::new(on_delta);
        let client = &self.client;
        let timeout = self.timeout;
        let max_retries = self.max_transient_retries;
        let mut attempts = 0u32;

        let op = || {
            attempts += 1;
            let attempt = attempts;
            let req = req.clone();
            let on_delta = Arc::clone(&on_delta);
            // Deltas of an attempt are held back until it succeeds, so a
            // retried call never repeats text to the listener.
            let held = Arc::new(Mutex::new(Vec::<String>::new()));
            async move {
                let fut = client.send_request(req, {
                    let held = Arc::clone(&held);
                    move |delta| lock(&held).push(delta.to_owned())
                });
                let resp = match tokio::time::timeout(timeout, fut).await {
                    Ok(Ok(resp)) => resp,
                    Ok(Err(err)) => {
                        let kind = err.kind();
                        let err = Error::Generation {
                            kind,
                            message: err.to_string(),
                        };
                        if kind.is_transient() && attempt <= max_retries {
                            warn!("transient generation error, retrying: {err}");
                            return Err(backoff::Error::transient(err));
                        }
                        return Err(backoff::Error::permanent(err));
                    }
                    Err(_) => {
                        return Err(backoff::Error::permanent(Error::Timeout(
                            timeout,
                        )));
                    }
                };
                if resp.finish_reason == Some(ModelFinishReason::ContentFilter) {
                    return Err(backoff::Error::permanent(Error::Generation {
                        kind: ProviderErrorKind::Moderated,
                        message: "reply stopped by the content filter".to_owned(),
                    }));
                }
                for delta in lock(&held).drain(..) {
                    on_delta(&delta);
                }
                Ok(resp.transcript)
            }
        };

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(8))
            .with_max_elapsed_time(None)
            .build();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = backoff::future::retry(policy, op) => res,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn response_schema<T: JsonSchema>() -> Value {
    let mut schema = schema_for!(T).to_value();
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
    }
    schema
}

/// Parses a JSON reply, tolerating code fences and surrounding prose.
pub(crate) fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let text = text.trim();
    let body = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err("the reply does not contain a JSON object".to_owned()),
    };
    serde_json::from_str(body).map_err(|err| format!("invalid JSON reply: {err}"))
}
