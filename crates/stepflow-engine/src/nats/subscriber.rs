//! JetStream consumer loop.

use std::sync::Arc;

use async_nats::jetstream::consumer::pull::Config as ConsumerConfig;
use async_nats::jetstream::{self, Context};
use async_nats::HeaderMap;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::bus::{BusError, Headers, MessageHandler};
use crate::result_ext::ResultExt;
use crate::telemetry::TRACEPARENT_HEADER;

/// Header keys carried from bus messages into handlers.
const PROPAGATED_HEADERS: &[&str] = &[TRACEPARENT_HEADER, "tracestate"];

/// Spawns one durable pull consumer per subject.
///
/// Each message is handled on its own task, at most `max_in_flight` per
/// subject, and acknowledged once the handler returns, whatever the outcome.
pub struct NatsConsumer {
    js: Context,
    stream: String,
    max_in_flight: usize,
}

impl NatsConsumer {
    pub fn new(js: Context, stream: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            js,
            stream: stream.into(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Create or get the durable consumer.
    async fn ensure_consumer(
        &self,
        subject: &str,
        durable: &str,
    ) -> Result<jetstream::consumer::Consumer<ConsumerConfig>, BusError> {
        let stream = self
            .js
            .get_stream(&self.stream)
            .await
            .map_err(|e| BusError::JetStream(e.to_string()))?;

        match stream.get_consumer::<ConsumerConfig>(durable).await {
            Ok(consumer) => Ok(consumer),
            Err(_) => {
                let config = ConsumerConfig {
                    durable_name: Some(durable.to_string()),
                    filter_subject: subject.to_string(),
                    ..Default::default()
                };
                let consumer = stream
                    .create_consumer(config)
                    .await
                    .map_err(|e| BusError::JetStream(e.to_string()))?;
                tracing::info!(consumer = %durable, subject = %subject, "Created NATS consumer");
                Ok(consumer)
            }
        }
    }

    /// Start consuming `subject` with `handler`.
    pub async fn spawn(
        &self,
        subject: &str,
        durable: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<JoinHandle<()>, BusError> {
        let durable = durable_name(durable);
        let consumer = self.ensure_consumer(subject, &durable).await?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let subject = subject.to_string();
        tracing::info!(subject = %subject, handler = handler.name(), "Consuming subject");

        Ok(tokio::spawn(async move {
            while let Some(next) = messages.next().await {
                let message = match next {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(subject = %subject, error = %e, "Failed to receive message");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let handler = Arc::clone(&handler);

                tokio::spawn(async move {
                    let _permit = permit;
                    let headers = extract_headers(message.headers.as_ref());

                    let _ = handler
                        .handle(&headers, &message.payload)
                        .await
                        .log(format!("handling {} message", handler.name()));

                    if let Err(e) = message.ack().await {
                        tracing::warn!(error = %e, "Failed to ack message");
                    }
                });
            }
            tracing::warn!(subject = %subject, "Message stream ended");
        }))
    }
}

fn extract_headers(map: Option<&HeaderMap>) -> Headers {
    let mut headers = Headers::new();
    if let Some(map) = map {
        for key in PROPAGATED_HEADERS {
            if let Some(value) = map.get(*key) {
                headers.insert(key.to_string(), value.as_str().to_string());
            }
        }
    }
    headers
}

/// Durable consumer names may not contain `.`, `*`, `>` or whitespace.
fn durable_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_name_sanitized() {
        assert_eq!(durable_name("stepflow-engine-steps"), "stepflow-engine-steps");
        assert_eq!(
            durable_name("stepflow-engine-responses-svc.a b"),
            "stepflow-engine-responses-svc-a-b"
        );
    }

    #[test]
    fn test_extract_known_headers() {
        let mut map = HeaderMap::new();
        map.insert("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");
        map.insert("x-other", "ignored");

        let headers = extract_headers(Some(&map));
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("traceparent"));
        assert!(extract_headers(None).is_empty());
    }
}
