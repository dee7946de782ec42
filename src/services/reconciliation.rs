use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::ledger::{DonationKey, DonationLedger, DonationStatus, TerminalStatus};
use crate::gateways::error::GatewayError;
use crate::gateways::factory::GatewayRegistry;
use crate::gateways::types::{NotificationEvent, NotificationOutcome, PaymentRail};

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unknown rail: {0}")]
    UnknownRail(String),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Donation not found for {0}")]
    DonationNotFound(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Result of applying one gateway notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// This notification performed the terminal transition.
    Applied {
        donation_id: Uuid,
        status: DonationStatus,
    },
    /// The donation was already terminal; duplicate or late delivery
    /// absorbed as a no-op.
    AlreadyTerminal { donation_id: Uuid },
    /// The event carries no terminal outcome for us.
    Ignored { reason: String },
}

/// Applies gateway notifications to the donation ledger.
///
/// Processing order is fixed: resolve the adapter, verify the signature
/// against the raw bytes, parse, resolve the donation, then apply the
/// conditional transition. Nothing observable happens before verification
/// passes.
pub struct ReconciliationDispatcher {
    registry: Arc<GatewayRegistry>,
    ledger: Arc<dyn DonationLedger>,
}

impl ReconciliationDispatcher {
    pub fn new(registry: Arc<GatewayRegistry>, ledger: Arc<dyn DonationLedger>) -> Self {
        Self { registry, ledger }
    }

    pub async fn handle_notification(
        &self,
        rail_name: &str,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let rail = PaymentRail::from_str(rail_name)
            .map_err(|_| ReconciliationError::UnknownRail(rail_name.to_string()))?;
        let adapter = self
            .registry
            .adapter_for(rail)
            .map_err(|_| ReconciliationError::UnknownRail(rail_name.to_string()))?;

        let signature = signature.ok_or(ReconciliationError::InvalidSignature)?;
        adapter
            .verify_notification(raw_body, signature)
            .map_err(|e| match e {
                GatewayError::InvalidSignature { .. } => ReconciliationError::InvalidSignature,
                other => ReconciliationError::MalformedPayload(other.to_string()),
            })?;

        let event = adapter.parse_notification(raw_body).map_err(|e| {
            ReconciliationError::MalformedPayload(e.to_string())
        })?;

        let outcome = match event.outcome {
            Some(outcome) => outcome,
            None => {
                info!(
                    rail = %rail,
                    event_type = %event.event_type,
                    "notification has no terminal outcome, acknowledging"
                );
                return Ok(ReconciliationOutcome::Ignored {
                    reason: format!("event type {} is not handled", event.event_type),
                });
            }
        };

        let donation_id = self.resolve_donation(&event).await?;
        self.apply_transition(donation_id, outcome, &event).await
    }

    /// Resolve the ledger row. The mobile-money rail echoes the correlation
    /// token directly; the card rail is matched by the stored session id.
    async fn resolve_donation(
        &self,
        event: &NotificationEvent,
    ) -> Result<Uuid, ReconciliationError> {
        if let Some(id) = event.correlation.as_ref().and_then(|t| t.donation_id()) {
            if self
                .ledger
                .find_by_id(id)
                .await
                .map_err(|e| ReconciliationError::DatabaseError(e.to_string()))?
                .is_some()
            {
                return Ok(id);
            }
        }

        if let Some(reference) = event.gateway_reference.as_deref() {
            if let Some(donation) = self
                .ledger
                .find_by_gateway_reference(reference)
                .await
                .map_err(|e| ReconciliationError::DatabaseError(e.to_string()))?
            {
                return Ok(donation.id);
            }
        }

        Err(ReconciliationError::DonationNotFound(
            event
                .gateway_reference
                .clone()
                .unwrap_or_else(|| "<no reference>".to_string()),
        ))
    }

    async fn apply_transition(
        &self,
        donation_id: Uuid,
        outcome: NotificationOutcome,
        event: &NotificationEvent,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let (target, receipt, cause) = match outcome {
            NotificationOutcome::Completed => {
                (TerminalStatus::Completed, event.receipt.as_deref(), None)
            }
            NotificationOutcome::Failed => (
                TerminalStatus::Failed,
                None,
                event
                    .failure_reason
                    .as_deref()
                    .or(Some("payment failed at gateway")),
            ),
        };

        let affected = self
            .ledger
            .transition_if_pending(DonationKey::Id(donation_id), target, receipt, cause)
            .await
            .map_err(|e| ReconciliationError::DatabaseError(e.to_string()))?;

        if affected == 0 {
            // First terminal notification won; this one changes nothing.
            info!(
                donation_id = %donation_id,
                event_type = %event.event_type,
                "donation already terminal, absorbing duplicate notification"
            );
            return Ok(ReconciliationOutcome::AlreadyTerminal { donation_id });
        }

        let status = target.as_status();
        match status {
            DonationStatus::Completed => info!(
                donation_id = %donation_id,
                receipt = receipt.unwrap_or(""),
                "donation completed"
            ),
            _ => warn!(
                donation_id = %donation_id,
                status = %status,
                cause = cause.unwrap_or(""),
                "donation moved to terminal failure state"
            ),
        }

        Ok(ReconciliationOutcome::Applied {
            donation_id,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;

    use crate::database::ledger::memory::InMemoryLedger;
    use crate::database::ledger::{NewDonation, PaymentMethod};
    use crate::gateways::adapter::GatewayAdapter;
    use crate::gateways::error::GatewayResult;
    use crate::gateways::types::{ChargeRequest, ChargeResponse, CorrelationToken};

    /// Adapter whose notifications are the raw body split as
    /// `outcome:reference:token`, verified against the literal signature
    /// "good".
    struct ScriptedAdapter {
        rail: PaymentRail,
    }

    #[async_trait]
    impl GatewayAdapter for ScriptedAdapter {
        fn rail(&self) -> PaymentRail {
            self.rail
        }

        async fn initiate(&self, _request: ChargeRequest) -> GatewayResult<ChargeResponse> {
            unreachable!("not exercised here")
        }

        fn verify_notification(&self, _payload: &[u8], signature: &str) -> GatewayResult<()> {
            if signature == "good" {
                Ok(())
            } else {
                Err(GatewayError::InvalidSignature {
                    message: "signature mismatch".to_string(),
                })
            }
        }

        fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent> {
            let text = std::str::from_utf8(payload).map_err(|_| {
                GatewayError::MalformedNotification {
                    message: "not utf-8".to_string(),
                }
            })?;
            let mut parts = text.splitn(3, ':');
            let outcome = match parts.next() {
                Some("completed") => Some(NotificationOutcome::Completed),
                Some("failed") => Some(NotificationOutcome::Failed),
                _ => None,
            };
            let reference = parts.next().filter(|s| !s.is_empty()).map(String::from);
            let correlation = parts.next().and_then(CorrelationToken::parse);
            Ok(NotificationEvent {
                rail: self.rail,
                event_type: "scripted".to_string(),
                outcome,
                gateway_reference: reference,
                correlation,
                receipt: Some("RCPT123".to_string()),
                failure_reason: Some("insufficient funds".to_string()),
                received_at: chrono::Utc::now(),
            })
        }
    }

    async fn seeded() -> (Arc<InMemoryLedger>, ReconciliationDispatcher, Uuid, String) {
        let ledger = Arc::new(InMemoryLedger::new());
        let donation = ledger
            .create(NewDonation {
                donor_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                amount: BigDecimal::from(50),
                currency: "KES".to_string(),
                payment_method: PaymentMethod::Card,
                is_anonymous: false,
                is_recurring: false,
                recurring_frequency: None,
            })
            .await
            .unwrap();
        let reference = format!("sess_{}", donation.id.simple());
        ledger
            .set_gateway_reference(donation.id, &reference)
            .await
            .unwrap();

        let registry = crate::gateways::factory::GatewayRegistry::with_adapters(vec![
            Arc::new(ScriptedAdapter {
                rail: PaymentRail::Card,
            }),
            Arc::new(ScriptedAdapter {
                rail: PaymentRail::MobileMoney,
            }),
        ]);
        let dispatcher = ReconciliationDispatcher::new(Arc::new(registry), ledger.clone());
        (ledger, dispatcher, donation.id, reference)
    }

    #[tokio::test]
    async fn completed_notification_applies_once_then_absorbs_duplicates() {
        let (ledger, dispatcher, donation_id, reference) = seeded().await;
        let body = format!("completed:{}:", reference);

        let first = dispatcher
            .handle_notification("card", Some("good"), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            first,
            ReconciliationOutcome::Applied {
                donation_id,
                status: DonationStatus::Completed,
            }
        );

        let second = dispatcher
            .handle_notification("card", Some("good"), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(second, ReconciliationOutcome::AlreadyTerminal { donation_id });

        let row = ledger.get(donation_id).unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.external_receipt.as_deref(), Some("RCPT123"));
        assert!(row.completed_at.is_some());
        assert!(row.failed_at.is_none());
    }

    #[tokio::test]
    async fn racing_completed_and_failed_apply_exactly_one_terminal_state() {
        let (ledger, dispatcher, donation_id, reference) = seeded().await;
        let dispatcher = Arc::new(dispatcher);

        let completed_body = format!("completed:{}:", reference);
        let failed_body = format!("failed:{}:", reference);
        let a = {
            let d = dispatcher.clone();
            tokio::spawn(async move {
                d.handle_notification("card", Some("good"), completed_body.as_bytes())
                    .await
            })
        };
        let b = {
            let d = dispatcher.clone();
            tokio::spawn(async move {
                d.handle_notification("card", Some("good"), failed_body.as_bytes())
                    .await
            })
        };
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, ReconciliationOutcome::Applied { .. }))
            .count();
        let absorbed = outcomes
            .iter()
            .filter(|o| matches!(o, ReconciliationOutcome::AlreadyTerminal { .. }))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(absorbed, 1);

        let row = ledger.get(donation_id).unwrap();
        assert!(row.status == "completed" || row.status == "failed");
        // Exactly one terminal timestamp is set.
        let stamps = [row.completed_at, row.failed_at, row.cancelled_at]
            .iter()
            .filter(|t| t.is_some())
            .count();
        assert_eq!(stamps, 1);
    }

    #[tokio::test]
    async fn failed_notification_records_cause() {
        let (ledger, dispatcher, donation_id, reference) = seeded().await;
        let body = format!("failed:{}:", reference);

        let outcome = dispatcher
            .handle_notification("card", Some("good"), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconciliationOutcome::Applied {
                donation_id,
                status: DonationStatus::Failed,
            }
        );
        let row = ledger.get(donation_id).unwrap();
        assert_eq!(row.failure_reason.as_deref(), Some("insufficient funds"));
        assert!(row.external_receipt.is_none());
    }

    #[tokio::test]
    async fn correlation_token_resolves_without_gateway_reference() {
        let (_ledger, dispatcher, donation_id, _reference) = seeded().await;
        let token = CorrelationToken::from_donation_id(donation_id);
        let body = format!("completed::{}", token);

        let outcome = dispatcher
            .handle_notification("mobile_money", Some("good"), body.as_bytes())
            .await
            .unwrap();
        assert!(matches!(outcome, ReconciliationOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn bad_or_missing_signature_is_rejected_before_parsing() {
        let (ledger, dispatcher, donation_id, reference) = seeded().await;
        let body = format!("completed:{}:", reference);

        let err = dispatcher
            .handle_notification("card", Some("bad"), body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidSignature));

        let err = dispatcher
            .handle_notification("card", None, body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidSignature));

        assert_eq!(ledger.get(donation_id).unwrap().status, "pending");
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged_and_ignored() {
        let (ledger, dispatcher, donation_id, reference) = seeded().await;
        let body = format!("created:{}:", reference);

        let outcome = dispatcher
            .handle_notification("card", Some("good"), body.as_bytes())
            .await
            .unwrap();
        assert!(matches!(outcome, ReconciliationOutcome::Ignored { .. }));
        assert_eq!(ledger.get(donation_id).unwrap().status, "pending");
    }

    #[tokio::test]
    async fn unknown_reference_reports_donation_not_found() {
        let (_ledger, dispatcher, _donation_id, _reference) = seeded().await;
        let outcome = dispatcher
            .handle_notification("card", Some("good"), b"completed:sess_missing:")
            .await;
        assert!(matches!(
            outcome,
            Err(ReconciliationError::DonationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_rail_is_rejected() {
        let (_ledger, dispatcher, _donation_id, _reference) = seeded().await;
        let err = dispatcher
            .handle_notification("crypto", Some("good"), b"completed:x:")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::UnknownRail(_)));
    }
}
