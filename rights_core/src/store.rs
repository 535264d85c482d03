//! The capability interface over the security policy subsystem.
//!
//! The engine only ever talks to a [`PolicyStore`]; whether the calls land
//! on the local machine, a remote one, or an in-memory double is the
//! implementation's business.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Assignment, Principal, Privilege};

pub mod memory;

/// Errors reported by a policy store.
///
/// Every call can fail independently; there is no atomicity across calls.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The target machine is unreachable or access was denied. Fatal for the
    /// whole invocation.
    #[error("unable to open the policy store on {target}: {reason}")]
    Connection {
        /// The machine the connection was attempted against
        target: String,
        /// The underlying system reason
        reason: String,
    },
    /// A single grant failed. Non-fatal - the engine records it and moves on.
    #[error("unable to grant {privilege} to {principal}: {reason}")]
    Grant {
        /// The principal the grant was for
        principal: Principal,
        /// The privilege being granted
        privilege: Privilege,
        /// The underlying system reason
        reason: String,
    },
    /// A single revocation failed. Non-fatal.
    #[error("unable to revoke {privilege} from {principal}: {reason}")]
    Revoke {
        /// The principal the revocation was for
        principal: Principal,
        /// The privilege being revoked
        privilege: Privilege,
        /// The underlying system reason
        reason: String,
    },
    /// The full assignment snapshot could not be read.
    #[error("unable to enumerate assignments: {reason}")]
    Enumeration {
        /// The underlying system reason
        reason: String,
    },
}

/// The trait all policy store implementations are expected to implement.
///
/// Connection establishment is each implementation's constructor; everything
/// past that point goes through this interface. `grant` and `revoke` are
/// idempotent: granting an already-held right or revoking one that is not
/// held succeeds as a no-op.
#[async_trait]
pub trait PolicyStore {
    /// All principals currently holding `privilege`.
    async fn principals_for(&self, privilege: &Privilege)
        -> Result<HashSet<Principal>, StoreError>;

    /// All privileges currently held by `principal`.
    async fn privileges_for(&self, principal: &Principal)
        -> Result<HashSet<Privilege>, StoreError>;

    /// Grant `privilege` to `principal`.
    async fn grant(&mut self, principal: &Principal, privilege: &Privilege)
        -> Result<(), StoreError>;

    /// Revoke `privilege` from `principal`.
    async fn revoke(&mut self, principal: &Principal, privilege: &Privilege)
        -> Result<(), StoreError>;

    /// A full snapshot of the assignment set. Used only for listing.
    async fn enumerate_all(&self) -> Result<Vec<Assignment>, StoreError>;
}
