//! Subscriber-side verification of incoming deliveries.

use chrono::{DateTime, Utc};

use crate::delivery::WebhookPayload;
use crate::error::{WebhookError, WebhookResult};
use crate::signature::WebhookSigner;

/// Verifies deliveries on the receiving end.
pub struct WebhookReceiver {
    signer: WebhookSigner,
    /// Maximum age of the payload timestamp, in seconds. `None` disables the check.
    tolerance_secs: Option<i64>,
}

impl WebhookReceiver {
    /// Creates a receiver for a subscription secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            signer: WebhookSigner::new(secret),
            tolerance_secs: Some(300), // 5 minutes
        }
    }

    /// Sets the timestamp tolerance.
    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = Some(tolerance_secs);
        self
    }

    /// Disables the timestamp check.
    pub fn without_tolerance(mut self) -> Self {
        self.tolerance_secs = None;
        self
    }

    /// Verifies the signature header value and parses the payload.
    pub fn verify(&self, signature: &str, body: &[u8]) -> WebhookResult<WebhookPayload> {
        if !self.signer.verify(body, signature) {
            return Err(WebhookError::InvalidSignature);
        }

        let payload: WebhookPayload = serde_json::from_slice(body)?;
        if let Some(tolerance) = self.tolerance_secs {
            let sent_at = DateTime::parse_from_rfc3339(&payload.timestamp)
                .map_err(|e| WebhookError::InvalidPayload(format!("bad timestamp: {e}")))?;
            let age = Utc::now().signed_duration_since(sent_at.with_timezone(&Utc));
            if age.num_seconds().abs() > tolerance {
                return Err(WebhookError::ExpiredSignature);
            }
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn body_at(timestamp: DateTime<Utc>) -> Vec<u8> {
        serde_json::to_vec(&WebhookPayload {
            event: "payment.settled".into(),
            timestamp: timestamp.to_rfc3339(),
            data: serde_json::json!({"paymentId": "pay_1"}),
        })
        .unwrap()
    }

    #[test]
    fn test_accepts_fresh_signed_delivery() {
        let body = body_at(Utc::now());
        let signature = WebhookSigner::new("whsec").sign(&body);

        let payload = WebhookReceiver::new("whsec").verify(&signature, &body).unwrap();
        assert_eq!(payload.event, "payment.settled");
        assert_eq!(payload.data["paymentId"], "pay_1");
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let body = body_at(Utc::now());
        let signature = WebhookSigner::new("whsec").sign(&body);

        assert!(matches!(
            WebhookReceiver::new("other").verify(&signature, &body),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn test_rejects_stale_delivery() {
        let body = body_at(Utc::now() - Duration::minutes(10));
        let signature = WebhookSigner::new("whsec").sign(&body);

        assert!(matches!(
            WebhookReceiver::new("whsec").verify(&signature, &body),
            Err(WebhookError::ExpiredSignature)
        ));
        assert!(WebhookReceiver::new("whsec")
            .without_tolerance()
            .verify(&signature, &body)
            .is_ok());
    }
}
