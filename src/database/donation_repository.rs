use crate::database::error::DatabaseError;
use crate::database::ledger::{
    Donation, DonationKey, DonationLedger, NewDonation, TerminalStatus,
};
use async_trait::async_trait;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

const DONATION_COLUMNS: &str = "id, donor_id, provider_id, amount, currency, payment_method, \
     status, gateway_reference, external_receipt, failure_reason, is_anonymous, is_recurring, \
     recurring_frequency, created_at, completed_at, failed_at, cancelled_at";

/// Postgres-backed donation ledger.
pub struct DonationRepository {
    pool: PgPool,
}

impl DonationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DonationLedger for DonationRepository {
    async fn create(&self, new: NewDonation) -> Result<Donation, DatabaseError> {
        // The id is generated here, not by the database; it seeds the
        // correlation token handed to the gateway before any row exists
        // on their side.
        sqlx::query_as::<_, Donation>(&format!(
            "INSERT INTO donations \
             (id, donor_id, provider_id, amount, currency, payment_method, status, is_anonymous, \
              is_recurring, recurring_frequency) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9) \
             RETURNING {}",
            DONATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.donor_id)
        .bind(new.provider_id)
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.payment_method.as_str())
        .bind(new.is_anonymous)
        .bind(new.is_recurring)
        .bind(new.recurring_frequency.map(|f| f.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn set_gateway_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<Donation, DatabaseError> {
        sqlx::query_as::<_, Donation>(&format!(
            "UPDATE donations \
             SET gateway_reference = $2 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            DONATION_COLUMNS
        ))
        .bind(id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("pending donation", id))
    }

    async fn transition_if_pending(
        &self,
        key: DonationKey<'_>,
        target: TerminalStatus,
        receipt: Option<&str>,
        cause: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        // One conditional UPDATE; the status guard makes concurrent and
        // duplicate deliveries converge on exactly one winner.
        let sql = format!(
            "UPDATE donations \
             SET status = $2, \
                 external_receipt = COALESCE($3, external_receipt), \
                 failure_reason = COALESCE($4, failure_reason), \
                 completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END, \
                 failed_at = CASE WHEN $2 = 'failed' THEN NOW() ELSE failed_at END, \
                 cancelled_at = CASE WHEN $2 = 'cancelled' THEN NOW() ELSE cancelled_at END \
             WHERE {} = $1 AND status = 'pending'",
            match key {
                DonationKey::Id(_) => "id",
                DonationKey::GatewayReference(_) => "gateway_reference",
            }
        );

        let query = sqlx::query(&sql);
        let query = match key {
            DonationKey::Id(id) => query.bind(id),
            DonationKey::GatewayReference(r) => query.bind(r),
        };

        let result = query
            .bind(target.as_db_status())
            .bind(receipt)
            .bind(cause)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>, DatabaseError> {
        sqlx::query_as::<_, Donation>(&format!(
            "SELECT {} FROM donations WHERE id = $1",
            DONATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Donation>, DatabaseError> {
        sqlx::query_as::<_, Donation>(&format!(
            "SELECT {} FROM donations WHERE gateway_reference = $1",
            DONATION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>, DatabaseError> {
        sqlx::query_as::<_, Donation>(&format!(
            "SELECT {} FROM donations WHERE donor_id = $1 ORDER BY created_at DESC",
            DONATION_COLUMNS
        ))
        .bind(donor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn sum_completed(&self, provider_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        let total: Option<BigDecimal> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM donations \
             WHERE provider_id = $1 AND status = 'completed'",
        )
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn find_stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<Donation>, DatabaseError> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::seconds(older_than.as_secs().min(i64::MAX as u64) as i64);

        sqlx::query_as::<_, Donation>(&format!(
            "SELECT {} FROM donations \
             WHERE status = 'pending' AND created_at < $1 \
             ORDER BY created_at ASC \
             LIMIT $2",
            DONATION_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
