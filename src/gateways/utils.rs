use crate::gateways::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Option<RequestAuth<'_>>,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            match auth {
                Some(RequestAuth::Bearer(token)) => {
                    request = request.bearer_auth(token);
                }
                Some(RequestAuth::Basic { username, password }) => {
                    request = request.basic_auth(username, Some(password));
                }
                None => {}
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::Unavailable {
                                rail: "http".to_string(),
                                message: format!("invalid gateway JSON response: {}", e),
                                gateway_code: None,
                            }
                        });
                    }

                    if status.as_u16() == 401 {
                        // Auth failures are the caller's to handle (token
                        // refresh); retrying with the same credential is
                        // pointless.
                        return Err(GatewayError::Unavailable {
                            rail: "http".to_string(),
                            message: format!("HTTP 401: {}", text),
                            gateway_code: Some("401".to_string()),
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::Unavailable {
                        rail: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        gateway_code: Some(status.as_u16().to_string()),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

#[derive(Clone, Copy)]
pub enum RequestAuth<'a> {
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

pub fn compute_hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        // HMAC accepts keys of any length; fail closed regardless.
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = compute_hmac_sha256_hex(payload, secret);
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_verification_accepts_matching_signature() {
        let payload = br#"{"ResultCode":0}"#;
        let signature = compute_hmac_sha256_hex(payload, "secret");
        assert!(verify_hmac_sha256_hex(payload, "secret", &signature));
    }

    #[tokio::test]
    async fn unreachable_gateway_surfaces_network_error() {
        let client = GatewayHttpClient::new(Duration::from_secs(1), 0).expect("client init");
        // Port 1 is never listening locally; the connection is refused.
        let result: GatewayResult<JsonValue> = client
            .request_json(
                reqwest::Method::POST,
                "http://127.0.0.1:1/v1/checkout/sessions",
                Some(RequestAuth::Bearer("sk_test")),
                Some(&serde_json::json!({"mode": "payment"})),
            )
            .await;
        assert!(matches!(result, Err(GatewayError::NetworkError { .. })));
    }

    #[test]
    fn hmac_verification_detects_invalid_signature() {
        let payload = br#"{"ResultCode":0}"#;
        assert!(!verify_hmac_sha256_hex(payload, "secret", "not-a-valid-signature"));
        let other = compute_hmac_sha256_hex(payload, "other-secret");
        assert!(!verify_hmac_sha256_hex(payload, "secret", &other));
    }
}
