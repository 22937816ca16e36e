//! The Sender, §4.5. Delivers one event to a subscriber over HTTP and
//! classifies the outcome; it never retries internally.

use std::time::Duration;

use event_log_types::Event;
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendingResult {
    Delivered,
    TemporarilyUnavailable,
    Misdelivered,
}

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("subscriber rejected the event: {status} {body}")]
    FatalClientError { status: u16, body: String },
    #[error("failed to build request: {0}")]
    RequestBuild(String),
}

pub struct Sender {
    client: Client,
}

impl Sender {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// `sendEvent(subscriberUrl, event)`, §4.5. POSTs `multipart/form-data`
    /// with an `event` JSON part and an optional `payload` part.
    pub async fn send_event(
        &self,
        subscriber_url: &str,
        event: &Event,
        payload: Option<Vec<u8>>,
    ) -> Result<SendingResult, SenderError> {
        let event_json = serde_json::to_string(event).map_err(|e| SenderError::RequestBuild(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("event", reqwest::multipart::Part::text(event_json).mime_str("application/json").map_err(|e| SenderError::RequestBuild(e.to_string()))?);

        if let Some(bytes) = payload {
            form = form.part("payload", reqwest::multipart::Part::bytes(bytes));
        }

        let response = match self.client.post(subscriber_url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(classify_transport_error(&e));
            }
        };

        classify_response(subscriber_url, response).await
    }

    /// Delivers one durable outbox notification (§3 SUPPLEMENT,
    /// `status_change_events_queue`) to a subscriber. Same `event` part,
    /// no `payload` part, and the same outcome classification as
    /// `send_event` — notifications have no binary payload to carry.
    pub async fn send_notification(&self, subscriber_url: &str, notification: &serde_json::Value) -> Result<SendingResult, SenderError> {
        let notification_json = serde_json::to_string(notification).map_err(|e| SenderError::RequestBuild(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part(
            "event",
            reqwest::multipart::Part::text(notification_json)
                .mime_str("application/json")
                .map_err(|e| SenderError::RequestBuild(e.to_string()))?,
        );

        let response = match self.client.post(subscriber_url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(classify_transport_error(&e));
            }
        };

        classify_response(subscriber_url, response).await
    }
}

async fn classify_response(subscriber_url: &str, response: reqwest::Response) -> Result<SendingResult, SenderError> {
    let status = response.status();
    match status.as_u16() {
        202 => {
            tracing::info!(subscriber_url, "event delivered");
            Ok(SendingResult::Delivered)
        }
        404 | 429 | 502 | 503 => {
            tracing::warn!(subscriber_url, status = status.as_u16(), "subscriber temporarily unavailable");
            Ok(SendingResult::TemporarilyUnavailable)
        }
        400..=499 => {
            let body = response.text().await.unwrap_or_default();
            Err(SenderError::FatalClientError {
                status: status.as_u16(),
                body,
            })
        }
        _ => {
            tracing::warn!(subscriber_url, status = status.as_u16(), "unexpected response status");
            Ok(SendingResult::TemporarilyUnavailable)
        }
    }
}

/// Connectivity failures (DNS, connection refused, TLS handshake) are
/// `Misdelivered`; timeouts and other transport errors are
/// `TemporarilyUnavailable` (§4.5).
fn classify_transport_error(error: &reqwest::Error) -> SendingResult {
    if error.is_timeout() {
        tracing::warn!(error = %error, "sender timed out");
        return SendingResult::TemporarilyUnavailable;
    }
    if error.is_connect() {
        tracing::warn!(error = %error, "sender misdelivered: connectivity failure");
        return SendingResult::Misdelivered;
    }
    tracing::warn!(error = %error, "sender transport error");
    SendingResult::TemporarilyUnavailable
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use event_log_types::EventStatus;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_event() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            project_id: 1,
            status: EventStatus::TriplesGenerated,
            created_date: Utc::now(),
            execution_date: Utc::now(),
            event_date: Utc::now(),
            batch_date: Utc::now(),
            event_body: json!({"kind": "commit"}),
            message: None,
        }
    }

    #[tokio::test]
    async fn accepted_response_classifies_as_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let sender = Sender::new(Duration::from_secs(5));
        let result = sender
            .send_event(&format!("{}/events", server.uri()), &sample_event(), None)
            .await
            .unwrap();
        assert_eq!(result, SendingResult::Delivered);
    }

    #[tokio::test]
    async fn service_unavailable_classifies_as_temporarily_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sender = Sender::new(Duration::from_secs(5));
        let result = sender
            .send_event(&format!("{}/events", server.uri()), &sample_event(), None)
            .await
            .unwrap();
        assert_eq!(result, SendingResult::TemporarilyUnavailable);
    }

    #[tokio::test]
    async fn bad_request_is_a_fatal_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad event"))
            .mount(&server)
            .await;

        let sender = Sender::new(Duration::from_secs(5));
        let result = sender.send_event(&format!("{}/events", server.uri()), &sample_event(), None).await;
        assert!(matches!(result, Err(SenderError::FatalClientError { status: 400, .. })));
    }

    #[tokio::test]
    async fn connection_refused_is_misdelivered() {
        let sender = Sender::new(Duration::from_secs(2));
        let result = sender
            .send_event("http://127.0.0.1:1", &sample_event(), None)
            .await
            .unwrap();
        assert_eq!(result, SendingResult::Misdelivered);
    }
}
