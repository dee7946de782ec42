use crate::gateways::error::GatewayResult;
use crate::gateways::types::{ChargeRequest, ChargeResponse, NotificationEvent, PaymentRail};
use async_trait::async_trait;

/// Capability surface every payment rail adapter provides.
///
/// Initiation is async and network-bound; notification handling is pure so
/// the dispatcher can verify signatures against raw bytes before anything
/// else runs.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn rail(&self) -> PaymentRail;

    /// Start collection for a pending donation. Returns the gateway-side
    /// reference (and, on the card rail, the hosted checkout URL).
    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse>;

    /// Verify a notification's authenticity against the raw body bytes.
    fn verify_notification(&self, payload: &[u8], signature: &str) -> GatewayResult<()>;

    /// Parse a verified notification into the normalized event shape.
    fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent>;
}
