//! Donation Orchestrator Service
//!
//! Validates donation requests, records them in the ledger before any
//! gateway traffic, routes initiation to the right rail adapter, and keeps
//! the row consistent when the gateway misbehaves.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use bigdecimal::BigDecimal;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::directory_repository::Directory;
use crate::database::error::DatabaseError;
use crate::database::ledger::{
    Donation, DonationKey, DonationLedger, NewDonation, PaymentMethod, RecurringFrequency,
    TerminalStatus,
};
use crate::gateways::factory::GatewayRegistry;
use crate::gateways::types::{fractional_digits, ChargeRequest, CorrelationToken};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Smallest accepted donation, in whole currency units.
    pub min_amount: BigDecimal,
    /// Largest accepted donation.
    pub max_amount: BigDecimal,
    /// Upper bound on a single gateway initiation call.
    pub gateway_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_amount: BigDecimal::from(1),
            max_amount: BigDecimal::from(1_000_000),
            gateway_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            min_amount: std::env::var("DONATION_MIN_AMOUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(BigDecimal::from(1)),
            max_amount: std::env::var("DONATION_MAX_AMOUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(BigDecimal::from(1_000_000)),
            gateway_timeout_secs: std::env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum DonationError {
    #[error("{message}")]
    Validation { field: Option<String>, message: String },
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("Donation is no longer pending")]
    NotPending,
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl DonationError {
    fn validation(field: &str, message: impl Into<String>) -> Self {
        DonationError::Validation {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

/// Incoming donation request, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct DonationRequest {
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurring_frequency: Option<String>,
}

/// Outcome of a successful initiation.
#[derive(Debug, Clone)]
pub struct InitiatedDonation {
    pub donation: Donation,
    /// Hosted payment page for the card rail; mobile money pushes a prompt
    /// to the donor's handset instead.
    pub checkout_url: Option<String>,
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // E.164 without punctuation, optionally prefixed with '+'.
        Regex::new(r"^\+?[1-9]\d{8,14}$").expect("Invalid regex pattern")
    })
}

pub struct DonationOrchestrator {
    ledger: Arc<dyn DonationLedger>,
    directory: Arc<dyn Directory>,
    registry: Arc<GatewayRegistry>,
    config: OrchestratorConfig,
}

impl DonationOrchestrator {
    pub fn new(
        ledger: Arc<dyn DonationLedger>,
        directory: Arc<dyn Directory>,
        registry: Arc<GatewayRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            directory,
            registry,
            config,
        }
    }

    /// Create a pending donation and kick off payment on the chosen rail.
    ///
    /// The ledger row is written before the gateway is contacted, so every
    /// attempt leaves a trace. If the gateway call fails or times out the
    /// row is moved to `failed` on the way out.
    pub async fn initiate(
        &self,
        donor_id: Uuid,
        mut request: DonationRequest,
    ) -> Result<InitiatedDonation, DonationError> {
        request.currency = request.currency.trim().to_uppercase();
        let (method, rail, frequency) = self.validate(&request)?;

        if !self.directory.donor_exists(donor_id).await? {
            return Err(DonationError::NotFound { entity: "donor" });
        }
        if !self.directory.provider_exists(request.provider_id).await? {
            return Err(DonationError::NotFound {
                entity: "wellness provider",
            });
        }

        let donation = self
            .ledger
            .create(NewDonation {
                donor_id,
                provider_id: request.provider_id,
                amount: request.amount.clone(),
                currency: request.currency.clone(),
                payment_method: method,
                is_anonymous: request.is_anonymous,
                is_recurring: request.is_recurring,
                recurring_frequency: frequency,
            })
            .await?;

        info!(
            donation_id = %donation.id,
            provider_id = %request.provider_id,
            method = %method,
            amount = %request.amount,
            "donation recorded, initiating payment"
        );

        let adapter = match self.registry.adapter_for(rail) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.mark_failed(donation.id, "payment rail not configured")
                    .await;
                return Err(DonationError::GatewayUnavailable(e.to_string()));
            }
        };

        let charge = ChargeRequest {
            donation_id: donation.id,
            amount: request.amount.clone(),
            currency: donation.currency.clone(),
            phone_number: request.phone_number.clone(),
            description: format!("Donation {}", CorrelationToken::from_donation_id(donation.id)),
        };

        let timeout = Duration::from_secs(self.config.gateway_timeout_secs);
        let response = match tokio::time::timeout(timeout, adapter.initiate(charge)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(donation_id = %donation.id, rail = %rail, error = %e, "gateway initiation failed");
                self.mark_failed(donation.id, &e.to_string()).await;
                return Err(DonationError::GatewayUnavailable(e.user_message()));
            }
            Err(_) => {
                error!(donation_id = %donation.id, rail = %rail, "gateway initiation timed out");
                self.mark_failed(donation.id, "gateway initiation timed out")
                    .await;
                return Err(DonationError::GatewayUnavailable(
                    "The payment gateway did not respond in time".to_string(),
                ));
            }
        };

        let donation = self
            .ledger
            .set_gateway_reference(donation.id, &response.gateway_reference)
            .await?;

        info!(
            donation_id = %donation.id,
            gateway_reference = %response.gateway_reference,
            "payment initiated"
        );

        Ok(InitiatedDonation {
            donation,
            checkout_url: response.checkout_url,
        })
    }

    /// Donor-initiated cancellation. Only a pending donation can be
    /// cancelled; anything else reports `NotPending`.
    pub async fn cancel(&self, id: Uuid, donor_id: Uuid) -> Result<Donation, DonationError> {
        let donation = self
            .ledger
            .find_by_id(id)
            .await?
            .ok_or(DonationError::NotFound { entity: "donation" })?;
        if donation.donor_id != donor_id {
            return Err(DonationError::NotFound { entity: "donation" });
        }

        let affected = self
            .ledger
            .transition_if_pending(
                DonationKey::Id(id),
                TerminalStatus::Cancelled,
                None,
                Some("cancelled by donor"),
            )
            .await?;
        if affected == 0 {
            return Err(DonationError::NotPending);
        }

        info!(donation_id = %id, "donation cancelled by donor");
        self.ledger
            .find_by_id(id)
            .await?
            .ok_or(DonationError::NotFound { entity: "donation" })
    }

    pub async fn get(&self, id: Uuid, donor_id: Uuid) -> Result<Donation, DonationError> {
        let donation = self
            .ledger
            .find_by_id(id)
            .await?
            .ok_or(DonationError::NotFound { entity: "donation" })?;
        if donation.donor_id != donor_id {
            return Err(DonationError::NotFound { entity: "donation" });
        }
        Ok(donation)
    }

    pub async fn list_for_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>, DonationError> {
        Ok(self.ledger.find_by_donor(donor_id).await?)
    }

    /// Total completed donations for a wellness provider.
    pub async fn provider_total(&self, provider_id: Uuid) -> Result<BigDecimal, DonationError> {
        if !self.directory.provider_exists(provider_id).await? {
            return Err(DonationError::NotFound {
                entity: "wellness provider",
            });
        }
        Ok(self.ledger.sum_completed(provider_id).await?)
    }

    fn validate(
        &self,
        request: &DonationRequest,
    ) -> Result<(PaymentMethod, crate::gateways::types::PaymentRail, Option<RecurringFrequency>), DonationError>
    {
        if request.amount < self.config.min_amount {
            return Err(DonationError::validation(
                "amount",
                format!("Amount must be at least {}", self.config.min_amount),
            ));
        }
        if request.amount > self.config.max_amount {
            return Err(DonationError::validation(
                "amount",
                format!("Amount must not exceed {}", self.config.max_amount),
            ));
        }
        if fractional_digits(&request.amount) > 2 {
            return Err(DonationError::validation(
                "amount",
                "Amount supports at most 2 decimal places",
            ));
        }

        let currency = request.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DonationError::validation(
                "currency",
                "Currency must be a 3-letter ISO code",
            ));
        }

        let method: PaymentMethod = request
            .payment_method
            .parse()
            .map_err(|e: String| DonationError::validation("payment_method", e))?;
        let rail = method.rail().ok_or_else(|| {
            DonationError::validation(
                "payment_method",
                format!("{} donations cannot be initiated online", method),
            )
        })?;

        if rail == crate::gateways::types::PaymentRail::MobileMoney {
            let phone = request
                .phone_number
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    DonationError::validation(
                        "phone_number",
                        "Phone number is required for mobile money",
                    )
                })?;
            if !phone_pattern().is_match(phone) {
                return Err(DonationError::validation(
                    "phone_number",
                    "Phone number must be in international format, e.g. 254712345678",
                ));
            }
            // The push API bills in whole currency units.
            if fractional_digits(&request.amount) > 0 {
                return Err(DonationError::validation(
                    "amount",
                    "Mobile money donations must be a whole amount",
                ));
            }
        }

        let frequency = match (request.is_recurring, request.recurring_frequency.as_deref()) {
            (true, Some(raw)) => Some(
                raw.parse::<RecurringFrequency>()
                    .map_err(|e| DonationError::validation("recurring_frequency", e))?,
            ),
            (true, None) => {
                return Err(DonationError::validation(
                    "recurring_frequency",
                    "Recurring donations require a frequency",
                ))
            }
            (false, Some(_)) => {
                return Err(DonationError::validation(
                    "recurring_frequency",
                    "Frequency is only valid for recurring donations",
                ))
            }
            (false, None) => None,
        };

        Ok((method, rail, frequency))
    }

    async fn mark_failed(&self, donation_id: Uuid, cause: &str) {
        // Best effort: the sweeper picks up anything this misses.
        match self
            .ledger
            .transition_if_pending(
                DonationKey::Id(donation_id),
                TerminalStatus::Failed,
                None,
                Some(cause),
            )
            .await
        {
            Ok(0) => warn!(donation_id = %donation_id, "donation already terminal while recording gateway failure"),
            Ok(_) => {}
            Err(e) => error!(donation_id = %donation_id, error = %e, "failed to record gateway failure"),
        }
    }
}
