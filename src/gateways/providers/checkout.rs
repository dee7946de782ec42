use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    to_minor_units, ChargeRequest, ChargeResponse, CorrelationToken, NotificationEvent,
    NotificationOutcome, PaymentRail,
};
use crate::gateways::utils::{compute_hmac_sha256_hex, secure_eq, GatewayHttpClient, RequestAuth};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

/// Hosted-checkout card gateway.
///
/// The backend creates a checkout session priced in minor units, the donor
/// pays on the gateway's hosted page, and a signed webhook reports the
/// session outcome. The donation id travels in session metadata.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Webhook timestamps older than this are rejected as stale.
    pub signature_tolerance_secs: i64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl CheckoutConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("CHECKOUT_SECRET_KEY").map_err(|_| GatewayError::ConfigError {
                message: "CHECKOUT_SECRET_KEY environment variable is required".to_string(),
            })?;
        let webhook_secret =
            std::env::var("CHECKOUT_WEBHOOK_SECRET").map_err(|_| GatewayError::ConfigError {
                message: "CHECKOUT_WEBHOOK_SECRET environment variable is required".to_string(),
            })?;

        Ok(Self {
            secret_key,
            webhook_secret,
            base_url: std::env::var("CHECKOUT_BASE_URL")
                .unwrap_or_else(|_| "https://api.checkout-gateway.com".to_string()),
            success_url: std::env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "https://mindwell.app/donate/success".to_string()),
            cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "https://mindwell.app/donate/cancelled".to_string()),
            signature_tolerance_secs: std::env::var("CHECKOUT_SIGNATURE_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(300),
            timeout_secs: std::env::var("CHECKOUT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            // Initiation is not retried internally; a transport failure
            // fails the donation and the donor retries explicitly.
            max_retries: std::env::var("CHECKOUT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0),
        })
    }
}

pub struct CheckoutAdapter {
    config: CheckoutConfig,
    http: GatewayHttpClient,
}

impl CheckoutAdapter {
    pub fn new(config: CheckoutConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(CheckoutConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Split a `t=<unix>,v1=<hex>` signature header.
    fn parse_signature_header(header: &str) -> Option<(i64, &str)> {
        let mut timestamp = None;
        let mut v1 = None;
        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => v1 = Some(value),
                _ => {}
            }
        }
        Some((timestamp?, v1?))
    }
}

#[async_trait]
impl GatewayAdapter for CheckoutAdapter {
    fn rail(&self) -> PaymentRail {
        PaymentRail::Card
    }

    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse> {
        let unit_amount = to_minor_units(&request.amount)?;
        let token = CorrelationToken::from_donation_id(request.donation_id);

        let payload = serde_json::json!({
            "mode": "payment",
            "line_items": [{
                "price_data": {
                    "currency": request.currency.to_lowercase(),
                    "unit_amount": unit_amount,
                    "product_data": { "name": request.description },
                },
                "quantity": 1,
            }],
            "metadata": {
                "donation_id": request.donation_id,
                "correlation": token.as_str(),
            },
            "success_url": self.config.success_url,
            "cancel_url": self.config.cancel_url,
        });

        let session: CheckoutSession = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/sessions"),
                Some(RequestAuth::Bearer(&self.config.secret_key)),
                Some(&payload),
            )
            .await
            .map_err(|e| match e {
                GatewayError::Unavailable { message, gateway_code, .. } => {
                    GatewayError::Unavailable {
                        rail: "card".to_string(),
                        message,
                        gateway_code,
                    }
                }
                other => other,
            })?;

        info!(
            donation_id = %request.donation_id,
            session_id = %session.id,
            unit_amount,
            "checkout session created"
        );

        Ok(ChargeResponse {
            gateway_reference: session.id,
            checkout_url: Some(session.url),
        })
    }

    fn verify_notification(&self, payload: &[u8], signature: &str) -> GatewayResult<()> {
        let (timestamp, v1) = Self::parse_signature_header(signature).ok_or_else(|| {
            GatewayError::InvalidSignature {
                message: "malformed signature header".to_string(),
            }
        })?;

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age.abs() > self.config.signature_tolerance_secs {
            return Err(GatewayError::InvalidSignature {
                message: "signature timestamp outside tolerance".to_string(),
            });
        }

        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let expected = compute_hmac_sha256_hex(&signed, &self.config.webhook_secret);
        if !secure_eq(expected.as_bytes(), v1.trim().as_bytes()) {
            return Err(GatewayError::InvalidSignature {
                message: "signature mismatch".to_string(),
            });
        }
        Ok(())
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            GatewayError::MalformedNotification {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let session = parsed.get("data").and_then(|v| v.get("object"));
        let gateway_reference = session
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let correlation = session
            .and_then(|s| s.get("metadata"))
            .and_then(|m| m.get("correlation"))
            .and_then(|v| v.as_str())
            .and_then(CorrelationToken::parse);
        let receipt = session
            .and_then(|s| s.get("payment_intent"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let (outcome, failure_reason) = match event_type.as_str() {
            "checkout.session.completed" => (Some(NotificationOutcome::Completed), None),
            "checkout.session.expired" => (
                Some(NotificationOutcome::Failed),
                Some("checkout session expired".to_string()),
            ),
            "checkout.session.async_payment_failed" => (
                Some(NotificationOutcome::Failed),
                Some("payment failed at gateway".to_string()),
            ),
            _ => (None, None),
        };

        Ok(NotificationEvent {
            rail: PaymentRail::Card,
            event_type,
            outcome,
            gateway_reference,
            correlation,
            receipt,
            failure_reason,
            received_at: chrono::Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> CheckoutAdapter {
        CheckoutAdapter::new(CheckoutConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec_test".to_string(),
            base_url: "https://api.checkout-gateway.com".to_string(),
            success_url: "https://example.com/success".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            signature_tolerance_secs: 300,
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("adapter init should succeed")
    }

    fn sign(payload: &[u8], secret: &str) -> String {
        let ts = chrono::Utc::now().timestamp();
        let mut signed = ts.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        format!("t={},v1={}", ts, compute_hmac_sha256_hex(&signed, secret))
    }

    #[test]
    fn default_config_does_not_retry_initiation() {
        std::env::set_var("CHECKOUT_SECRET_KEY", "sk_test");
        std::env::set_var("CHECKOUT_WEBHOOK_SECRET", "whsec_test");
        std::env::remove_var("CHECKOUT_MAX_RETRIES");
        let config = CheckoutConfig::from_env().expect("config should load");
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn valid_signature_is_accepted() {
        let adapter = adapter();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(payload, "whsec_test");
        assert!(adapter.verify_notification(payload, &header).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let adapter = adapter();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(payload, "whsec_other");
        assert!(matches!(
            adapter.verify_notification(payload, &header),
            Err(GatewayError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let adapter = adapter();
        let payload = br#"{}"#;
        let ts = chrono::Utc::now().timestamp() - 3600;
        let mut signed = ts.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let header = format!(
            "t={},v1={}",
            ts,
            compute_hmac_sha256_hex(&signed, "whsec_test")
        );
        assert!(matches!(
            adapter.verify_notification(payload, &header),
            Err(GatewayError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let adapter = adapter();
        assert!(adapter.verify_notification(b"{}", "garbage").is_err());
        assert!(adapter.verify_notification(b"{}", "t=abc,v1=00").is_err());
    }

    #[test]
    fn completed_session_parses_to_completed_outcome() {
        let adapter = adapter();
        let payload = serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "sess_abc",
                "payment_intent": "pi_123",
                "metadata": { "correlation": uuid::Uuid::new_v4().simple().to_string() },
            }},
        });
        let event = adapter
            .parse_notification(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.outcome, Some(NotificationOutcome::Completed));
        assert_eq!(event.gateway_reference.as_deref(), Some("sess_abc"));
        assert_eq!(event.receipt.as_deref(), Some("pi_123"));
        assert!(event.correlation.is_some());
    }

    #[test]
    fn expired_session_parses_to_failed_outcome() {
        let adapter = adapter();
        let payload = serde_json::json!({
            "type": "checkout.session.expired",
            "data": { "object": { "id": "sess_old" } },
        });
        let event = adapter
            .parse_notification(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.outcome, Some(NotificationOutcome::Failed));
        assert!(event.failure_reason.is_some());
    }

    #[test]
    fn unknown_event_types_have_no_outcome() {
        let adapter = adapter();
        let payload = br#"{"type":"invoice.created","data":{"object":{"id":"in_1"}}}"#;
        let event = adapter
            .parse_notification(payload)
            .expect("parse should succeed");
        assert!(event.outcome.is_none());
    }
}
