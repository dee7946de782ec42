//! Services module for business logic and payment coordination

pub mod donation_orchestrator;
pub mod reconciliation;

pub use donation_orchestrator::{
    DonationError, DonationOrchestrator, DonationRequest, InitiatedDonation, OrchestratorConfig,
};
pub use reconciliation::{ReconciliationDispatcher, ReconciliationError, ReconciliationOutcome};
