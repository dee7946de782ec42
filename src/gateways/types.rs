use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::gateways::error::GatewayError;

/// Payment rail handled by a gateway adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    Card,
    MobileMoney,
}

impl PaymentRail {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRail::Card => "card",
            PaymentRail::MobileMoney => "mobile_money",
        }
    }
}

impl fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentRail {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentRail::Card),
            "mobile_money" | "mobile-money" | "mpesa" => Ok(PaymentRail::MobileMoney),
            other => Err(GatewayError::ValidationError {
                message: format!("unknown payment rail: {}", other),
                field: Some("rail".to_string()),
            }),
        }
    }
}

/// Correlation token carried through the mobile-money rail.
///
/// The token is the donation id in simple (hyphenless) UUID form: 32 ASCII
/// hex characters, which fits the gateway's bounded alphanumeric
/// account-reference field and parses back without any free-text scraping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub const LEN: usize = 32;

    pub fn from_donation_id(id: Uuid) -> Self {
        Self(id.simple().to_string())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() != Self::LEN || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_lowercase()))
    }

    pub fn donation_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convert a decimal amount to minor units (cents) with exact arithmetic.
///
/// Rejects anything with a sub-cent remainder rather than rounding, so a
/// stored `19.99` always maps to `1999` and back with zero drift.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, GatewayError> {
    let cents = (amount * BigDecimal::from(100)).normalized();
    if cents.fractional_digit_count() > 0 {
        return Err(GatewayError::ValidationError {
            message: format!("amount {} has sub-cent precision", amount),
            field: Some("amount".to_string()),
        });
    }
    cents.to_i64().ok_or_else(|| GatewayError::ValidationError {
        message: format!("amount {} out of range for minor units", amount),
        field: Some("amount".to_string()),
    })
}

/// Convert minor units back to a decimal amount with two fractional digits.
pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

/// Number of significant decimal places after normalization.
pub fn fractional_digits(amount: &BigDecimal) -> i64 {
    amount.normalized().fractional_digit_count()
}

/// Convert a decimal amount to whole currency units.
///
/// The STK push endpoint takes an integer amount field; fractional amounts
/// are rejected upstream by validation before this rail is ever selected.
pub fn to_whole_units(amount: &BigDecimal) -> Result<u64, GatewayError> {
    let whole = amount.normalized();
    if whole.fractional_digit_count() > 0 {
        return Err(GatewayError::ValidationError {
            message: format!("amount {} is not a whole unit", amount),
            field: Some("amount".to_string()),
        });
    }
    whole.to_u64().ok_or_else(|| GatewayError::ValidationError {
        message: format!("amount {} out of range", amount),
        field: Some("amount".to_string()),
    })
}

/// Request handed to a gateway adapter to start collection.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub donation_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    /// E.164-style MSISDN, required on the mobile-money rail.
    pub phone_number: Option<String>,
    pub description: String,
}

/// Successful initiation result.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeResponse {
    /// Gateway-side handle: checkout session id or push request id.
    pub gateway_reference: String,
    /// Hosted payment page, present on the card rail only.
    pub checkout_url: Option<String>,
}

/// Terminal outcome reported by a gateway notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Completed,
    Failed,
}

/// Parsed webhook / callback, normalized across rails.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub rail: PaymentRail,
    pub event_type: String,
    /// Outcome, if the event maps to a terminal state. Events with no
    /// outcome (unknown types) are acknowledged and ignored.
    pub outcome: Option<NotificationOutcome>,
    /// Gateway-side handle echoed in the notification.
    pub gateway_reference: Option<String>,
    /// Correlation token echoed through metadata, when the rail carries one.
    pub correlation: Option<CorrelationToken>,
    /// Gateway receipt for completed payments.
    pub receipt: Option<String>,
    /// Human-readable failure cause, when the gateway supplies one.
    pub failure_reason: Option<String>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_are_exact_for_two_decimal_amounts() {
        let amount = BigDecimal::from_str("19.99").unwrap();
        assert_eq!(to_minor_units(&amount).unwrap(), 1999);
        assert_eq!(from_minor_units(1999), amount);
    }

    #[test]
    fn minor_units_round_trip_whole_amounts() {
        let amount = BigDecimal::from_str("250").unwrap();
        assert_eq!(to_minor_units(&amount).unwrap(), 25000);
        assert_eq!(from_minor_units(25000), BigDecimal::from_str("250.00").unwrap());
    }

    #[test]
    fn sub_cent_amounts_are_rejected_not_rounded() {
        let amount = BigDecimal::from_str("10.999").unwrap();
        assert!(matches!(
            to_minor_units(&amount),
            Err(GatewayError::ValidationError { .. })
        ));
    }

    #[test]
    fn whole_units_reject_fractional_amounts() {
        assert_eq!(
            to_whole_units(&BigDecimal::from_str("150.00").unwrap()).unwrap(),
            150
        );
        assert!(to_whole_units(&BigDecimal::from_str("150.50").unwrap()).is_err());
    }

    #[test]
    fn correlation_token_round_trips_donation_id() {
        let id = Uuid::new_v4();
        let token = CorrelationToken::from_donation_id(id);
        assert_eq!(token.as_str().len(), CorrelationToken::LEN);
        let parsed = CorrelationToken::parse(token.as_str()).unwrap();
        assert_eq!(parsed.donation_id(), Some(id));
    }

    #[test]
    fn correlation_token_rejects_free_text() {
        assert!(CorrelationToken::parse("Donation-42").is_none());
        assert!(CorrelationToken::parse("").is_none());
        assert!(CorrelationToken::parse("zzzz").is_none());
    }

    #[test]
    fn payment_rail_parses_known_values() {
        assert_eq!("card".parse::<PaymentRail>().unwrap(), PaymentRail::Card);
        assert_eq!(
            "mobile_money".parse::<PaymentRail>().unwrap(),
            PaymentRail::MobileMoney
        );
        assert!("crypto".parse::<PaymentRail>().is_err());
    }
}
