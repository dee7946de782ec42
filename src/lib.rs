//! Mindwell backend: donation orchestration and payment reconciliation for
//! the Mindwell wellness platform.
//!
//! A donation moves through a small state machine (`pending` then exactly
//! one of `completed`, `failed`, `cancelled`). Payment runs over two rails,
//! a hosted card checkout and a mobile-money STK push, and asynchronous
//! gateway notifications are reconciled against the ledger with a single
//! guarded UPDATE so duplicate or late deliveries can never corrupt a
//! finalized donation.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateways;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
