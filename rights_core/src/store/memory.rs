//! An in-memory policy store double.
//!
//! Backs the engine's tests and any caller that wants to exercise a
//! reconciliation without touching a real machine. Mutating calls are
//! journaled so callers can assert on what the engine actually asked for.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;

use crate::types::{Assignment, Principal, Privilege};

use super::{PolicyStore, StoreError};

/// A policy store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    assignments: BTreeMap<Privilege, BTreeSet<Principal>>,
    unresolvable: HashSet<Principal>,
    journal: Vec<String>,
}

impl MemoryPolicyStore {
    /// An empty store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Seed an assignment without going through `grant` (no journal entry).
    pub fn seed(&mut self, privilege: impl Into<Privilege>, principal: impl Into<Principal>) {
        self.assignments
            .entry(privilege.into())
            .or_default()
            .insert(principal.into());
    }

    /// Mark a principal as unresolvable: any grant or revoke naming it will
    /// fail, the way a real store fails to resolve a deleted account.
    pub fn deny_resolution(&mut self, principal: impl Into<Principal>) {
        self.unresolvable.insert(principal.into());
    }

    /// The mutating calls made so far, in order.
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    /// Whether the (privilege, principal) assignment currently exists.
    pub fn holds(&self, privilege: &Privilege, principal: &Principal) -> bool {
        self.assignments
            .get(privilege)
            .map(|principals| principals.contains(principal))
            .unwrap_or(false)
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn principals_for(
        &self,
        privilege: &Privilege,
    ) -> Result<HashSet<Principal>, StoreError> {
        Ok(self
            .assignments
            .get(privilege)
            .map(|principals| principals.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn privileges_for(
        &self,
        principal: &Principal,
    ) -> Result<HashSet<Privilege>, StoreError> {
        Ok(self
            .assignments
            .iter()
            .filter(|(_, principals)| principals.contains(principal))
            .map(|(privilege, _)| privilege.to_owned())
            .collect())
    }

    async fn grant(
        &mut self,
        principal: &Principal,
        privilege: &Privilege,
    ) -> Result<(), StoreError> {
        self.journal.push(format!("grant {privilege} {principal}"));
        if self.unresolvable.contains(principal) {
            return Err(StoreError::Grant {
                principal: principal.to_owned(),
                privilege: privilege.to_owned(),
                reason: "no mapping between account names and security IDs was done".to_owned(),
            });
        }
        self.assignments
            .entry(privilege.to_owned())
            .or_default()
            .insert(principal.to_owned());
        Ok(())
    }

    async fn revoke(
        &mut self,
        principal: &Principal,
        privilege: &Privilege,
    ) -> Result<(), StoreError> {
        self.journal.push(format!("revoke {privilege} {principal}"));
        if self.unresolvable.contains(principal) {
            return Err(StoreError::Revoke {
                principal: principal.to_owned(),
                privilege: privilege.to_owned(),
                reason: "no mapping between account names and security IDs was done".to_owned(),
            });
        }
        if let Some(principals) = self.assignments.get_mut(privilege) {
            principals.remove(principal);
            if principals.is_empty() {
                self.assignments.remove(privilege);
            }
        }
        Ok(())
    }

    async fn enumerate_all(&self) -> Result<Vec<Assignment>, StoreError> {
        Ok(self
            .assignments
            .iter()
            .flat_map(|(privilege, principals)| {
                principals.iter().map(|principal| Assignment {
                    privilege: privilege.to_owned(),
                    principal: principal.to_owned(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::Result;

    #[tokio::test]
    async fn test_grant_and_revoke_are_idempotent() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        let principal = Principal::from("DOMAIN\\svc");
        let privilege = Privilege::from("SeServiceLogonRight");

        store.grant(&principal, &privilege).await?;
        store.grant(&principal, &privilege).await?;
        assert!(store.holds(&privilege, &principal));

        store.revoke(&principal, &privilege).await?;
        store.revoke(&principal, &privilege).await?;
        assert!(!store.holds(&privilege, &principal));
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_principal_fails_per_call() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.deny_resolution("GHOST\\gone");
        let err = store
            .grant(
                &Principal::from("GHOST\\gone"),
                &Privilege::from("SeBatchLogonRight"),
            )
            .await;
        assert!(matches!(err, Err(StoreError::Grant { .. })));
        Ok(())
    }
}
