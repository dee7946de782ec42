use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::reconciliation::{
    ReconciliationDispatcher, ReconciliationError, ReconciliationOutcome,
};

pub struct WebhookState {
    pub dispatcher: Arc<ReconciliationDispatcher>,
}

/// POST /webhooks/{rail}
///
/// Signature verification runs against the raw request bytes, so the body
/// is taken untouched rather than as parsed JSON.
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(rail): Path<String>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(rail = %rail, "Received gateway notification");

    // Extract signature from headers
    let signature = match rail.as_str() {
        "card" => headers
            .get("checkout-signature")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        "mobile_money" => headers
            .get("x-daraja-signature")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        _ => None,
    };

    match state
        .dispatcher
        .handle_notification(&rail, signature.as_deref(), &body)
        .await
    {
        Ok(ReconciliationOutcome::Applied {
            donation_id,
            status,
        }) => {
            info!(rail = %rail, donation_id = %donation_id, status = %status, "Notification applied");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Ok(ReconciliationOutcome::AlreadyTerminal { donation_id }) => {
            info!(rail = %rail, donation_id = %donation_id, "Notification already applied");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Ok(ReconciliationOutcome::Ignored { reason }) => {
            info!(rail = %rail, reason = %reason, "Notification ignored");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(ReconciliationError::InvalidSignature) => {
            warn!(rail = %rail, "Invalid notification signature");
            (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
        }
        Err(ReconciliationError::UnknownRail(_)) => {
            warn!(rail = %rail, "Notification for unknown rail");
            (StatusCode::NOT_FOUND, "Unknown rail").into_response()
        }
        Err(ReconciliationError::MalformedPayload(e)) => {
            error!(rail = %rail, error = %e, "Malformed notification payload");
            (StatusCode::BAD_REQUEST, "Malformed payload").into_response()
        }
        Err(ReconciliationError::DonationNotFound(reference)) => {
            // Acknowledged so the gateway stops retrying; nothing to change
            // on our side.
            warn!(rail = %rail, reference = %reference, "Notification for unknown donation");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(e) => {
            error!(rail = %rail, error = %e, "Notification processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Processing failed",
            )
                .into_response()
        }
    }
}
