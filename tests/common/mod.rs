//! Shared fixtures for integration tests: an in-memory donation ledger with
//! the same conditional-transition semantics as the Postgres repository, and
//! helpers for signing gateway notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use mindwell_backend::database::error::DatabaseError;
use mindwell_backend::database::ledger::{
    Donation, DonationKey, DonationLedger, NewDonation, PaymentMethod, TerminalStatus,
};
use mindwell_backend::gateways::utils::compute_hmac_sha256_hex;

#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<HashMap<Uuid, Donation>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Donation> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl DonationLedger for InMemoryLedger {
    async fn create(&self, new: NewDonation) -> Result<Donation, DatabaseError> {
        let donation = Donation {
            id: Uuid::new_v4(),
            donor_id: new.donor_id,
            provider_id: new.provider_id,
            amount: new.amount,
            currency: new.currency,
            payment_method: new.payment_method.to_string(),
            status: "pending".to_string(),
            gateway_reference: None,
            external_receipt: None,
            failure_reason: None,
            is_anonymous: new.is_anonymous,
            is_recurring: new.is_recurring,
            recurring_frequency: new.recurring_frequency.map(|f| f.as_str().to_string()),
            created_at: chrono::Utc::now(),
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
        };
        self.rows
            .lock()
            .unwrap()
            .insert(donation.id, donation.clone());
        Ok(donation)
    }

    async fn set_gateway_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<Donation, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .filter(|d| d.status == "pending")
            .ok_or_else(|| DatabaseError::not_found("donation", &id.to_string()))?;
        row.gateway_reference = Some(reference.to_string());
        Ok(row.clone())
    }

    async fn transition_if_pending(
        &self,
        key: DonationKey<'_>,
        target: TerminalStatus,
        receipt: Option<&str>,
        cause: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let row = match key {
            DonationKey::Id(id) => rows.get_mut(&id),
            DonationKey::GatewayReference(r) => rows
                .values_mut()
                .find(|d| d.gateway_reference.as_deref() == Some(r)),
        };
        match row {
            Some(row) if row.status == "pending" => {
                row.status = target.as_db_status().to_string();
                if let Some(receipt) = receipt {
                    row.external_receipt = Some(receipt.to_string());
                }
                if let Some(cause) = cause {
                    row.failure_reason = Some(cause.to_string());
                }
                let now = chrono::Utc::now();
                match target {
                    TerminalStatus::Completed => row.completed_at = Some(now),
                    TerminalStatus::Failed => row.failed_at = Some(now),
                    TerminalStatus::Cancelled => row.cancelled_at = Some(now),
                }
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>, DatabaseError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Donation>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|d| d.gateway_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.donor_id == donor_id)
            .cloned()
            .collect())
    }

    async fn sum_completed(&self, provider_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.provider_id == provider_id && d.status == "completed")
            .map(|d| d.amount.clone())
            .sum())
    }

    async fn find_stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<Donation>, DatabaseError> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut stale: Vec<Donation> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.status == "pending" && d.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stale.truncate(limit as usize);
        Ok(stale)
    }
}

/// Seed a pending donation with a recorded gateway session id.
pub async fn seed_pending_donation(
    ledger: &Arc<InMemoryLedger>,
    reference: &str,
) -> Donation {
    let donation = ledger
        .create(NewDonation {
            donor_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            amount: BigDecimal::from(100),
            currency: "KES".to_string(),
            payment_method: PaymentMethod::Card,
            is_anonymous: false,
            is_recurring: false,
            recurring_frequency: None,
        })
        .await
        .unwrap();
    ledger
        .set_gateway_reference(donation.id, reference)
        .await
        .unwrap()
}

/// Sign a card-rail webhook body the way the gateway does:
/// `t=<unix>,v1=<hex hmac of "{t}.{body}">`.
pub fn card_signature(secret: &str, body: &str, timestamp: i64) -> String {
    let signed = format!("{}.{}", timestamp, body);
    let mac = compute_hmac_sha256_hex(signed.as_bytes(), secret);
    format!("t={},v1={}", timestamp, mac)
}

/// Sign a mobile-money callback body: plain hex HMAC of the raw bytes.
pub fn daraja_signature(secret: &str, body: &str) -> String {
    compute_hmac_sha256_hex(body.as_bytes(), secret)
}
