use hmac::{Hmac, Mac};
use reqwest::blocking::{Client, Request};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha512;
use tracing::debug;

use super::EventListener;
use crate::config::WebhookConfig;
use crate::error::ListenerError;
use crate::event::Event;

/// Header carrying the hex HMAC-SHA512 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Event-Signature";

type HmacSha512 = Hmac<Sha512>;

/// Hex-encoded HMAC-SHA512 of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &[u8]) -> Result<String, ListenerError> {
    let mut mac = HmacSha512::new_from_slice(secret)
        .map_err(|err| ListenerError::Failed(format!("invalid webhook secret: {}", err)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// POSTs every event as JSON to a configured URL.
///
/// Non-success responses and network errors fail the listener, so the event
/// is rolled back and redelivered.
pub struct WebhookListener {
    client: Client,
    url: String,
    secret: String,
}

impl WebhookListener {
    pub const NAME: &'static str = "audit_bus.listeners.WebhookListener";

    pub fn new(config: &WebhookConfig) -> Result<Self, ListenerError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| ListenerError::Failed("webhook url not configured".into()))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| ListenerError::Other(Box::new(err)))?;

        Ok(Self {
            client,
            url,
            secret: config.secret.clone(),
        })
    }

    /// Build the signed request for `event` without sending it.
    pub fn prepare(&self, event: &Event) -> Result<Request, ListenerError> {
        let body = event
            .to_json()
            .map_err(|err| ListenerError::Failed(format!("event serialization failed: {}", err)))?;
        let signature = sign(self.secret.as_bytes(), &body)?;

        self.client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .build()
            .map_err(|err| ListenerError::Other(Box::new(err)))
    }
}

impl EventListener for WebhookListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        let request = self.prepare(event)?;
        let response = self
            .client
            .execute(request)
            .map_err(|err| ListenerError::Failed(format!("webhook request failed: {}", err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListenerError::Failed(format!(
                "webhook {} answered {}",
                self.url, status
            )));
        }
        debug!(event_id = %event.id, %status, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Target};
    use assert_matches::assert_matches;

    fn config(url: &str) -> WebhookConfig {
        WebhookConfig {
            url: Some(url.to_string()),
            secret: "s3cret".into(),
            timeout_ms: 500,
        }
    }

    #[test]
    fn hmac_sha512_reference_vector() {
        // RFC 4231, test case 2.
        let signature = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn request_is_signed_json() {
        let listener = WebhookListener::new(&config("http://127.0.0.1:1/hook")).unwrap();
        let event = Event::builder(EventType::Created, Target::Consumer).build();

        let request = listener.prepare(&event).unwrap();
        let body = request.body().and_then(|b| b.as_bytes()).unwrap().to_vec();

        assert_eq!(request.method(), &reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "http://127.0.0.1:1/hook");
        assert_eq!(request.headers()[CONTENT_TYPE].to_str().unwrap(), "application/json");
        assert_eq!(
            request.headers()[SIGNATURE_HEADER].to_str().unwrap(),
            sign(b"s3cret", &body).unwrap()
        );
        assert_eq!(Event::from_json(&body).unwrap(), event);
    }

    #[test]
    fn missing_url_is_rejected() {
        let result = WebhookListener::new(&WebhookConfig::default());
        assert!(matches!(result, Err(ListenerError::Failed(_))));
    }

    #[test]
    fn unreachable_endpoint_fails_the_listener() {
        let listener = WebhookListener::new(&config("http://127.0.0.1:1/hook")).unwrap();
        let event = Event::builder(EventType::Created, Target::Consumer).build();

        assert_matches!(listener.on_event(&event), Err(ListenerError::Failed(_)));
    }
}
