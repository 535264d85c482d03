//!
//! User rights reconciliation
//!
//! Grants and revokes entries of the "User Rights Assignment" security
//! policy idempotently: given the requested operations for one principal or
//! one privilege, the engine snapshots the current assignment state,
//! computes the minimal delta, applies it (or simulates it in dry-run mode)
//! and reports one outcome per attempted mutation.
#![deny(missing_docs)]

pub use store::PolicyStore;

pub mod listing;
pub mod logging;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod validate;
