use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    to_whole_units, ChargeRequest, ChargeResponse, CorrelationToken, NotificationEvent,
    NotificationOutcome, PaymentRail,
};
use crate::gateways::utils::{verify_hmac_sha256_hex, GatewayHttpClient, RequestAuth};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Mobile-money STK push gateway (Daraja-style).
///
/// Initiation acquires an OAuth bearer token, fires a push prompt to the
/// donor's phone and records the push request id; the outcome arrives later
/// on an async callback. The correlation token rides in the push's
/// account-reference field and is echoed back in the callback metadata.
#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub base_url: String,
    pub callback_url: String,
    pub callback_secret: String,
    /// Safety margin subtracted from the token's reported lifetime.
    pub token_expiry_margin_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl DarajaConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| GatewayError::ConfigError {
                message: format!("{} environment variable is required", name),
            })
        };

        Ok(Self {
            consumer_key: require("DARAJA_CONSUMER_KEY")?,
            consumer_secret: require("DARAJA_CONSUMER_SECRET")?,
            shortcode: std::env::var("DARAJA_SHORTCODE").unwrap_or_else(|_| "174379".to_string()),
            passkey: require("DARAJA_PASSKEY")?,
            base_url: std::env::var("DARAJA_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            callback_url: require("DARAJA_CALLBACK_URL")?,
            callback_secret: require("DARAJA_CALLBACK_SECRET")?,
            token_expiry_margin_secs: std::env::var("DARAJA_TOKEN_MARGIN_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60),
            timeout_secs: std::env::var("DARAJA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            // The only retry on this rail is the single token-refresh
            // resend after a 401; the wire client itself does not retry.
            max_retries: std::env::var("DARAJA_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: chrono::DateTime<Utc>,
}

pub struct DarajaAdapter {
    config: DarajaConfig,
    http: GatewayHttpClient,
    token_cache: Mutex<Option<CachedToken>>,
}

impl DarajaAdapter {
    pub fn new(config: DarajaConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            token_cache: Mutex::new(None),
        })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(DarajaConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// `base64(shortcode + passkey + timestamp)` as the STK push API requires.
    fn stk_password(&self, timestamp: &str) -> String {
        let raw = format!("{}{}{}", self.config.shortcode, self.config.passkey, timestamp);
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    async fn fetch_access_token(&self) -> GatewayResult<CachedToken> {
        let response: OauthTokenResponse = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint("/oauth/v1/generate?grant_type=client_credentials"),
                Some(RequestAuth::Basic {
                    username: &self.config.consumer_key,
                    password: &self.config.consumer_secret,
                }),
                None,
            )
            .await?;

        let expires_in = response
            .expires_in
            .parse::<u64>()
            .unwrap_or(3600)
            .saturating_sub(self.config.token_expiry_margin_secs);

        Ok(CachedToken {
            access_token: response.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in as i64),
        })
    }

    /// Returns a cached token while it is still fresh; fetches otherwise.
    async fn access_token(&self, force_refresh: bool) -> GatewayResult<String> {
        let mut cache = self.token_cache.lock().await;
        if !force_refresh {
            if let Some(token) = cache.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }
        let fresh = self.fetch_access_token().await?;
        let access_token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access_token)
    }

    async fn send_push(
        &self,
        token: &str,
        payload: &JsonValue,
    ) -> GatewayResult<StkPushResponse> {
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/mpesa/stkpush/v1/processrequest"),
                Some(RequestAuth::Bearer(token)),
                Some(payload),
            )
            .await
    }
}

#[async_trait]
impl GatewayAdapter for DarajaAdapter {
    fn rail(&self) -> PaymentRail {
        PaymentRail::MobileMoney
    }

    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse> {
        let amount = to_whole_units(&request.amount)?;
        let phone = request
            .phone_number
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| GatewayError::ValidationError {
                message: "phone_number is required for the mobile-money rail".to_string(),
                field: Some("phone_number".to_string()),
            })?;

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let token = CorrelationToken::from_donation_id(request.donation_id);
        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.stk_password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone,
            "PartyB": self.config.shortcode,
            "PhoneNumber": phone,
            "CallBackURL": self.config.callback_url,
            "AccountReference": token.as_str(),
            "TransactionDesc": request.description,
        });

        let bearer = self.access_token(false).await?;
        let response = match self.send_push(&bearer, &payload).await {
            Ok(resp) => resp,
            Err(e) if is_auth_rejection(&e) => {
                // Expired or revoked token; refresh and retry exactly once.
                warn!(
                    donation_id = %request.donation_id,
                    "push rejected with 401, refreshing access token"
                );
                let fresh = self.access_token(true).await?;
                self.send_push(&fresh, &payload).await.map_err(|e| {
                    as_rail_unavailable(e)
                })?
            }
            Err(e) => return Err(as_rail_unavailable(e)),
        };

        if response.response_code != "0" {
            return Err(GatewayError::Unavailable {
                rail: "mobile_money".to_string(),
                message: response.response_description,
                gateway_code: Some(response.response_code),
            });
        }

        info!(
            donation_id = %request.donation_id,
            checkout_request_id = %response.checkout_request_id,
            amount,
            "stk push accepted"
        );

        Ok(ChargeResponse {
            gateway_reference: response.checkout_request_id,
            checkout_url: None,
        })
    }

    fn verify_notification(&self, payload: &[u8], signature: &str) -> GatewayResult<()> {
        if verify_hmac_sha256_hex(payload, &self.config.callback_secret, signature) {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature {
                message: "callback signature mismatch".to_string(),
            })
        }
    }

    fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            GatewayError::MalformedNotification {
                message: format!("invalid callback JSON payload: {}", e),
            }
        })?;

        let callback = parsed
            .get("Body")
            .and_then(|b| b.get("stkCallback"))
            .ok_or_else(|| GatewayError::MalformedNotification {
                message: "missing Body.stkCallback".to_string(),
            })?;

        let result_code = callback
            .get("ResultCode")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| GatewayError::MalformedNotification {
                message: "missing ResultCode".to_string(),
            })?;
        let gateway_reference = callback
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let result_desc = callback
            .get("ResultDesc")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let mut receipt = None;
        let mut correlation = None;
        if let Some(items) = callback
            .get("CallbackMetadata")
            .and_then(|m| m.get("Item"))
            .and_then(|v| v.as_array())
        {
            for item in items {
                let name = item.get("Name").and_then(|v| v.as_str());
                match name {
                    Some("MpesaReceiptNumber") => {
                        receipt = item
                            .get("Value")
                            .and_then(|v| v.as_str())
                            .map(|v| v.to_string());
                    }
                    Some("AccountReference") => {
                        correlation = item
                            .get("Value")
                            .and_then(|v| v.as_str())
                            .and_then(CorrelationToken::parse);
                    }
                    _ => {}
                }
            }
        }

        let (outcome, failure_reason, event_type) = if result_code == 0 {
            (Some(NotificationOutcome::Completed), None, "stk.completed")
        } else {
            (
                Some(NotificationOutcome::Failed),
                Some(result_desc.clone().unwrap_or_else(|| {
                    format!("push failed with result code {}", result_code)
                })),
                "stk.failed",
            )
        };

        Ok(NotificationEvent {
            rail: PaymentRail::MobileMoney,
            event_type: event_type.to_string(),
            outcome,
            gateway_reference,
            correlation,
            receipt,
            failure_reason,
            received_at: Utc::now(),
        })
    }
}

fn is_auth_rejection(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::Unavailable {
            gateway_code: Some(code),
            ..
        } if code == "401"
    )
}

fn as_rail_unavailable(error: GatewayError) -> GatewayError {
    match error {
        GatewayError::Unavailable {
            message,
            gateway_code,
            ..
        } => GatewayError::Unavailable {
            rail: "mobile_money".to_string(),
            message,
            gateway_code,
        },
        GatewayError::NetworkError { message } => GatewayError::Unavailable {
            rail: "mobile_money".to_string(),
            message,
            gateway_code: None,
        },
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    /// The gateway reports lifetime as a numeric string.
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
}
