//! JetStream publisher.

use async_nats::jetstream::{self, Context};
use async_nats::HeaderMap;
use async_trait::async_trait;

use crate::bus::{BusError, Headers, MessageBus};

/// Message bus backed by NATS JetStream.
///
/// Publishing waits for the JetStream ack, so a returned `Ok` means the
/// message is stored in the stream.
#[derive(Clone)]
pub struct NatsBus {
    /// JetStream context.
    js: Context,
}

impl NatsBus {
    /// Create a bus from a connected NATS client.
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            js: jetstream::new(client),
        }
    }

    pub fn context(&self) -> &Context {
        &self.js
    }

    /// Ensure the JetStream stream exists and captures `subjects`.
    pub async fn ensure_stream(&self, stream: &str, subjects: Vec<String>) -> Result<(), BusError> {
        let mut subjects = subjects;
        subjects.sort();
        subjects.dedup();

        match self.js.get_stream(stream).await {
            Ok(_) => {
                tracing::debug!(stream = %stream, "Using existing NATS stream");
                Ok(())
            }
            Err(_) => {
                let config = jetstream::stream::Config {
                    name: stream.to_string(),
                    subjects: subjects.clone(),
                    max_age: std::time::Duration::from_secs(24 * 3600),
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                };

                self.js
                    .create_stream(config)
                    .await
                    .map_err(|e| BusError::JetStream(e.to_string()))?;

                tracing::info!(stream = %stream, subjects = ?subjects, "Created NATS stream");
                Ok(())
            }
        }
    }
}

pub(crate) fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        map.insert(key.as_str(), value.as_str());
    }
    map
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(
        &self,
        subject: &str,
        headers: &Headers,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        self.js
            .publish_with_headers(subject.to_string(), to_header_map(headers), payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        tracing::debug!(subject = %subject, "Published message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_conversion() {
        let headers = Headers::from([(
            "traceparent".to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        )]);
        let map = to_header_map(&headers);
        assert_eq!(
            map.get("traceparent").map(|v| v.as_str()),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
    }
}
