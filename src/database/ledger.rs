use crate::database::error::DatabaseError;
use crate::gateways::types::PaymentRail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Donation lifecycle status.
///
/// `Pending` is the only non-terminal state; the three terminal states are
/// sinks and are never overwritten once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl DonationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DonationStatus::Pending)
    }

    pub fn as_db_status(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Completed => "completed",
            DonationStatus::Failed => "failed",
            DonationStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(DonationStatus::Pending),
            "completed" => Some(DonationStatus::Completed),
            "failed" => Some(DonationStatus::Failed),
            "cancelled" => Some(DonationStatus::Cancelled),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> &'static [DonationStatus] {
        match self {
            DonationStatus::Pending => &[
                DonationStatus::Completed,
                DonationStatus::Failed,
                DonationStatus::Cancelled,
            ],
            _ => &[],
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_status())
    }
}

/// Terminal status a pending donation may transition to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Failed,
    Cancelled,
}

impl TerminalStatus {
    pub fn as_db_status(&self) -> &'static str {
        match self {
            TerminalStatus::Completed => "completed",
            TerminalStatus::Failed => "failed",
            TerminalStatus::Cancelled => "cancelled",
        }
    }

    pub fn as_status(&self) -> DonationStatus {
        match self {
            TerminalStatus::Completed => DonationStatus::Completed,
            TerminalStatus::Failed => DonationStatus::Failed,
            TerminalStatus::Cancelled => DonationStatus::Cancelled,
        }
    }
}

/// How the donor pays. `Bank` is accepted by the model but has no gateway
/// adapter yet; initiation with it fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    MobileMoney,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Bank => "bank",
        }
    }

    pub fn rail(&self) -> Option<PaymentRail> {
        match self {
            PaymentMethod::Card => Some(PaymentRail::Card),
            PaymentMethod::MobileMoney => Some(PaymentRail::MobileMoney),
            PaymentMethod::Bank => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "mobile_money" | "mpesa" => Ok(PaymentMethod::MobileMoney),
            "bank" | "bank_transfer" => Ok(PaymentMethod::Bank),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringFrequency {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl RecurringFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurringFrequency::Weekly => "weekly",
            RecurringFrequency::Monthly => "monthly",
            RecurringFrequency::Quarterly => "quarterly",
            RecurringFrequency::Yearly => "yearly",
        }
    }
}

impl FromStr for RecurringFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" => Ok(RecurringFrequency::Weekly),
            "monthly" => Ok(RecurringFrequency::Monthly),
            "quarterly" => Ok(RecurringFrequency::Quarterly),
            "yearly" => Ok(RecurringFrequency::Yearly),
            other => Err(format!("unknown recurring frequency: {}", other)),
        }
    }
}

/// Donation ledger row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Donation {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub external_receipt: Option<String>,
    pub failure_reason: Option<String>,
    pub is_anonymous: bool,
    pub is_recurring: bool,
    pub recurring_frequency: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cancelled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Donation {
    pub fn status(&self) -> Option<DonationStatus> {
        DonationStatus::from_db_status(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

/// Fields for inserting a fresh pending donation.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub donor_id: Uuid,
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub is_anonymous: bool,
    pub is_recurring: bool,
    pub recurring_frequency: Option<RecurringFrequency>,
}

/// Lookup key for the conditional terminal transition.
#[derive(Debug, Clone, Copy)]
pub enum DonationKey<'a> {
    Id(Uuid),
    GatewayReference(&'a str),
}

impl fmt::Display for DonationKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DonationKey::Id(id) => write!(f, "id={}", id),
            DonationKey::GatewayReference(r) => write!(f, "gateway_reference={}", r),
        }
    }
}

/// Ledger store contract.
///
/// `transition_if_pending` is the concurrency point: it compiles to a single
/// conditional UPDATE guarded by `status = 'pending'` and reports the
/// affected-row count. `1` means this caller performed the transition; `0`
/// means the row was already terminal (or absent) and nothing changed.
#[async_trait]
pub trait DonationLedger: Send + Sync {
    async fn create(&self, new: NewDonation) -> Result<Donation, DatabaseError>;

    /// Record the gateway handle after successful initiation.
    async fn set_gateway_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<Donation, DatabaseError>;

    async fn transition_if_pending(
        &self,
        key: DonationKey<'_>,
        target: TerminalStatus,
        receipt: Option<&str>,
        cause: Option<&str>,
    ) -> Result<u64, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>, DatabaseError>;

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Donation>, DatabaseError>;

    async fn find_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>, DatabaseError>;

    /// Sum of completed donation amounts for a wellness provider.
    async fn sum_completed(&self, provider_id: Uuid) -> Result<BigDecimal, DatabaseError>;

    /// Pending donations older than `older_than`, oldest first, for the
    /// sweeper worker.
    async fn find_stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<Donation>, DatabaseError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_state() {
        assert!(!DonationStatus::Pending.is_terminal());
        assert!(DonationStatus::Completed.is_terminal());
        assert!(DonationStatus::Failed.is_terminal());
        assert!(DonationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn terminal_states_allow_no_transitions() {
        assert_eq!(DonationStatus::Pending.valid_transitions().len(), 3);
        assert!(DonationStatus::Completed.valid_transitions().is_empty());
        assert!(DonationStatus::Failed.valid_transitions().is_empty());
        assert!(DonationStatus::Cancelled.valid_transitions().is_empty());
    }

    #[test]
    fn db_status_round_trip() {
        for status in [
            DonationStatus::Pending,
            DonationStatus::Completed,
            DonationStatus::Failed,
            DonationStatus::Cancelled,
        ] {
            assert_eq!(
                DonationStatus::from_db_status(status.as_db_status()),
                Some(status)
            );
        }
        assert_eq!(DonationStatus::from_db_status("refunded"), None);
    }

    #[test]
    fn bank_method_has_no_rail() {
        assert_eq!(PaymentMethod::Card.rail(), Some(PaymentRail::Card));
        assert_eq!(
            PaymentMethod::MobileMoney.rail(),
            Some(PaymentRail::MobileMoney)
        );
        assert_eq!(PaymentMethod::Bank.rail(), None);
    }

    #[test]
    fn payment_method_parses_aliases() {
        assert_eq!(
            "mpesa".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::MobileMoney
        );
        assert_eq!(
            "bank_transfer".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::Bank
        );
        assert!("crypto".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn recurring_frequency_parses_known_values() {
        for value in ["weekly", "monthly", "quarterly", "yearly"] {
            assert!(value.parse::<RecurringFrequency>().is_ok());
        }
        assert!("daily".parse::<RecurringFrequency>().is_err());
    }
}
