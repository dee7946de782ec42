use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::ledger::Donation;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::donation_orchestrator::{DonationOrchestrator, DonationRequest};

#[derive(Clone)]
pub struct DonationState {
    pub orchestrator: Arc<DonationOrchestrator>,
}

#[derive(Debug, Serialize)]
pub struct DonationResponse {
    pub donation_id: Uuid,
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub is_anonymous: bool,
    pub is_recurring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_frequency: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl DonationResponse {
    fn from_donation(donation: Donation, checkout_url: Option<String>) -> Self {
        Self {
            donation_id: donation.id,
            provider_id: donation.provider_id,
            amount: donation.amount,
            currency: donation.currency,
            payment_method: donation.payment_method,
            status: donation.status,
            gateway_reference: donation.gateway_reference,
            external_receipt: donation.external_receipt,
            failure_reason: donation.failure_reason,
            is_anonymous: donation.is_anonymous,
            is_recurring: donation.is_recurring,
            recurring_frequency: donation.recurring_frequency,
            created_at: donation.created_at,
            checkout_url,
        }
    }
}

/// Caller identity from the `x-user-id` header, set by the API gateway
/// after session validation.
fn donor_id_from_headers(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(AppError::unauthorized)
}

fn with_request_id(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err: AppError = err.into();
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// POST /api/donations
pub async fn create_donation(
    State(state): State<DonationState>,
    headers: HeaderMap,
    Json(request): Json<DonationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let donor_id = donor_id_from_headers(&headers)?;
    info!(
        donor_id = %donor_id,
        provider_id = %request.provider_id,
        method = %request.payment_method,
        "Donation requested"
    );

    let initiated = state
        .orchestrator
        .initiate(donor_id, request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    Ok((
        StatusCode::CREATED,
        Json(DonationResponse::from_donation(
            initiated.donation,
            initiated.checkout_url,
        )),
    ))
}

/// GET /api/donations/{id}
pub async fn get_donation(
    State(state): State<DonationState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let donor_id = donor_id_from_headers(&headers)?;
    let donation = state
        .orchestrator
        .get(id, donor_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(DonationResponse::from_donation(donation, None)))
}

/// GET /api/donations
pub async fn list_donations(
    State(state): State<DonationState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let donor_id = donor_id_from_headers(&headers)?;
    let donations = state
        .orchestrator
        .list_for_donor(donor_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    let donations: Vec<DonationResponse> = donations
        .into_iter()
        .map(|d| DonationResponse::from_donation(d, None))
        .collect();
    Ok(Json(donations))
}

/// POST /api/donations/{id}/cancel
pub async fn cancel_donation(
    State(state): State<DonationState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let donor_id = donor_id_from_headers(&headers)?;
    let donation = state
        .orchestrator
        .cancel(id, donor_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    info!(donation_id = %id, donor_id = %donor_id, "Donation cancelled");
    Ok(Json(DonationResponse::from_donation(donation, None)))
}

#[derive(Debug, Serialize)]
pub struct ProviderTotalResponse {
    pub provider_id: Uuid,
    pub total_completed: BigDecimal,
}

/// GET /api/providers/{id}/donations/total
pub async fn provider_donation_total(
    State(state): State<DonationState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let total = state
        .orchestrator
        .provider_total(id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(ProviderTotalResponse {
        provider_id: id,
        total_completed: total,
    }))
}
