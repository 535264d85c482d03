//! The reconciliation engine.
//!
//! Snapshots the current assignment state once, computes the grant and
//! revoke deltas implied by the request, applies them in order (grants
//! before revokes, so a principal present in both never transiently loses
//! everything), and emits one outcome per attempted mutation. A failed item
//! never aborts the rest of the delta.

use std::collections::BTreeSet;
use std::fmt::Display;

use colored::Colorize;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{PolicyStore, StoreError};
use crate::types::{Principal, Privilege};
use crate::validate::{validate_principal, validate_privilege, PrincipalOps, PrivilegeOps};

/// The direction of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Add the assignment
    Grant,
    /// Remove the assignment
    Revoke,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Grant => write!(f, "grant"),
            Action::Revoke => write!(f, "revoke"),
        }
    }
}

/// How a single delta item ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The store call succeeded
    Applied,
    /// Dry-run mode: the item would have been applied, no store call was made
    DryRun,
    /// Requested grant of a privilege already held - no store call was made
    AlreadyHeld,
    /// Requested revocation of a privilege not held - no store call was made
    NotHeld,
    /// The store call failed, with the store's reason
    Failed(String),
}

/// One record per attempted mutation. Never merged or deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// The right involved
    pub privilege: Privilege,
    /// The identity involved
    pub principal: Principal,
    /// Grant or revoke
    pub action: Action,
    /// What happened
    pub status: OutcomeStatus,
}

impl OperationOutcome {
    /// Whether this item counts against the overall invocation result.
    pub fn failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }
}

impl Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = match self.action {
            Action::Grant => "+",
            Action::Revoke => "-",
        };
        let bare = format!("{} {} -> {}", self.action, self.privilege, self.principal);
        let line = format!("{sign} {bare}");
        let text = match &self.status {
            OutcomeStatus::Applied => match self.action {
                Action::Grant => format!("{}", line.green()),
                Action::Revoke => format!("{}", line.red()),
            },
            OutcomeStatus::DryRun => format!("{}", format!("{line} (dry run)").yellow()),
            OutcomeStatus::AlreadyHeld => format!("  {bare} (already held)"),
            OutcomeStatus::NotHeld => format!("  {bare} (not held)"),
            OutcomeStatus::Failed(reason) => {
                format!("{}", format!("! {bare} failed: {reason}").red())
            }
        };
        write!(f, "{text}")
    }
}

/// The aggregate result of one reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// One entry per attempted mutation, in application order
    pub outcomes: Vec<OperationOutcome>,
}

impl ReconcileReport {
    /// True when no item failed. An empty delta is a success.
    pub fn succeeded(&self) -> bool {
        !self.outcomes.iter().any(|outcome| outcome.failed())
    }

    /// The number of failed items.
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed()).count()
    }
}

/// Errors that abort a reconciliation before any mutation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The request itself is inconsistent. Reported before any store access.
    #[error("invalid request:\n  {}", .0.join("\n  "))]
    Validation(Vec<String>),
    /// Reading the current state failed. Nothing was mutated.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reconcile the privileges held by one principal.
pub async fn reconcile_principal(
    store: &mut (dyn PolicyStore + Send),
    ops: &PrincipalOps,
) -> Result<ReconcileReport, ReconcileError> {
    info!(mode = "principal", subject = %ops.principal, dry_run = ops.dry_run, "reconciling");
    let errors = validate_principal(ops);
    if !errors.is_empty() {
        warn!(mode = "principal", subject = %ops.principal, ?errors, "request rejected");
        return Err(ReconcileError::Validation(errors));
    }

    // Snapshot once; never re-read mid-operation.
    let held = store.privileges_for(&ops.principal).await?;

    let mut report = ReconcileReport::default();

    for privilege in &ops.grants {
        let status = if held.contains(privilege) {
            OutcomeStatus::AlreadyHeld
        } else {
            apply(
                store,
                Action::Grant,
                &ops.principal,
                privilege,
                ops.dry_run,
            )
            .await
        };
        report.outcomes.push(OperationOutcome {
            privilege: privilege.to_owned(),
            principal: ops.principal.to_owned(),
            action: Action::Grant,
            status,
        });
    }

    // Sorted so the revoke order is deterministic.
    let revoke_delta: Vec<(Privilege, OutcomeStatus)> = if ops.revoke_all {
        held.iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| (p.to_owned(), OutcomeStatus::Applied))
            .collect()
    } else if ops.revoke_others {
        held.iter()
            .filter(|p| !ops.grants.contains(*p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| (p.to_owned(), OutcomeStatus::Applied))
            .collect()
    } else {
        ops.revocations
            .iter()
            .map(|p| {
                if held.contains(p) {
                    (p.to_owned(), OutcomeStatus::Applied)
                } else {
                    (p.to_owned(), OutcomeStatus::NotHeld)
                }
            })
            .collect()
    };

    for (privilege, status) in revoke_delta {
        let status = match status {
            OutcomeStatus::NotHeld => OutcomeStatus::NotHeld,
            _ => {
                apply(
                    store,
                    Action::Revoke,
                    &ops.principal,
                    &privilege,
                    ops.dry_run,
                )
                .await
            }
        };
        report.outcomes.push(OperationOutcome {
            privilege,
            principal: ops.principal.to_owned(),
            action: Action::Revoke,
            status,
        });
    }

    Ok(report)
}

/// Reconcile the principals holding one privilege.
pub async fn reconcile_privilege(
    store: &mut (dyn PolicyStore + Send),
    ops: &PrivilegeOps,
) -> Result<ReconcileReport, ReconcileError> {
    info!(mode = "privilege", subject = %ops.privilege, dry_run = ops.dry_run, "reconciling");
    let errors = validate_privilege(ops);
    if !errors.is_empty() {
        warn!(mode = "privilege", subject = %ops.privilege, ?errors, "request rejected");
        return Err(ReconcileError::Validation(errors));
    }

    let holders = store.principals_for(&ops.privilege).await?;

    let mut report = ReconcileReport::default();

    for principal in &ops.grants {
        let status = if holders.contains(principal) {
            OutcomeStatus::AlreadyHeld
        } else {
            apply(store, Action::Grant, principal, &ops.privilege, ops.dry_run).await
        };
        report.outcomes.push(OperationOutcome {
            privilege: ops.privilege.to_owned(),
            principal: principal.to_owned(),
            action: Action::Grant,
            status,
        });
    }

    let revoke_delta: Vec<(Principal, OutcomeStatus)> = if ops.revoke_all {
        holders
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| (p.to_owned(), OutcomeStatus::Applied))
            .collect()
    } else if ops.revoke_others {
        holders
            .iter()
            .filter(|p| !ops.grants.contains(*p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| (p.to_owned(), OutcomeStatus::Applied))
            .collect()
    } else if let Some(pattern) = &ops.revoke_pattern {
        // Validation already compiled this once.
        let re = Regex::new(pattern).map_err(|e| {
            ReconcileError::Validation(vec![format!("invalid --revoke-pattern: {e}")])
        })?;
        // Matched against the identifier form the store returned, current
        // holders only, minus anything being granted.
        holders
            .iter()
            .filter(|p| !ops.grants.contains(*p) && re.is_match(&p.0))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| (p.to_owned(), OutcomeStatus::Applied))
            .collect()
    } else {
        ops.revocations
            .iter()
            .map(|p| {
                if holders.contains(p) {
                    (p.to_owned(), OutcomeStatus::Applied)
                } else {
                    (p.to_owned(), OutcomeStatus::NotHeld)
                }
            })
            .collect()
    };

    for (principal, status) in revoke_delta {
        let status = match status {
            OutcomeStatus::NotHeld => OutcomeStatus::NotHeld,
            _ => apply(store, Action::Revoke, &principal, &ops.privilege, ops.dry_run).await,
        };
        report.outcomes.push(OperationOutcome {
            privilege: ops.privilege.to_owned(),
            principal,
            action: Action::Revoke,
            status,
        });
    }

    Ok(report)
}

/// Apply one delta item. Store failures become `Failed` outcomes here, at
/// the item boundary - they never abort the rest of the delta.
async fn apply(
    store: &mut (dyn PolicyStore + Send),
    action: Action,
    principal: &Principal,
    privilege: &Privilege,
    dry_run: bool,
) -> OutcomeStatus {
    if dry_run {
        info!(%action, %principal, %privilege, "dry run, skipping");
        return OutcomeStatus::DryRun;
    }
    let result = match action {
        Action::Grant => store.grant(principal, privilege).await,
        Action::Revoke => store.revoke(principal, privilege).await,
    };
    match result {
        Ok(()) => {
            info!(%action, %principal, %privilege, "applied");
            OutcomeStatus::Applied
        }
        Err(e) => {
            warn!(%action, %principal, %privilege, error = %e, "failed");
            OutcomeStatus::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::memory::MemoryPolicyStore;

    use anyhow::Result;

    fn principal_ops(principal: &str) -> PrincipalOps {
        PrincipalOps {
            principal: Principal::from(principal),
            ..Default::default()
        }
    }

    fn privilege_ops(privilege: &str) -> PrivilegeOps {
        PrivilegeOps {
            privilege: Privilege::from(privilege),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_revoke_all_on_empty_state_is_a_noop_success() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        let ops = PrincipalOps {
            revoke_all: true,
            ..principal_ops("DOMAIN\\svc")
        };
        let report = reconcile_principal(&mut store, &ops).await?;
        assert!(report.outcomes.is_empty());
        assert!(report.succeeded());
        assert!(store.journal().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_contradictory_request_is_rejected_before_any_store_call() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        let ops = PrincipalOps {
            grants: vec![Privilege::from("SeServiceLogonRight")],
            revocations: vec![Privilege::from("SeServiceLogonRight")],
            ..principal_ops("DOMAIN\\svc")
        };
        let result = reconcile_principal(&mut store, &ops).await;
        assert!(matches!(result, Err(ReconcileError::Validation(_))));
        assert!(store.journal().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_double_grant_is_idempotent() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        let ops = PrincipalOps {
            grants: vec![Privilege::from("SeServiceLogonRight")],
            ..principal_ops("DOMAIN\\svc")
        };

        let first = reconcile_principal(&mut store, &ops).await?;
        assert_eq!(first.outcomes[0].status, OutcomeStatus::Applied);

        let second = reconcile_principal(&mut store, &ops).await?;
        assert_eq!(second.outcomes[0].status, OutcomeStatus::AlreadyHeld);
        assert!(second.succeeded());

        // Only the first invocation reached the store.
        assert_eq!(store.journal().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.seed("SeBatchLogonRight", "DOMAIN\\svc");
        let ops = PrincipalOps {
            grants: vec![Privilege::from("SeServiceLogonRight")],
            revoke_others: true,
            dry_run: true,
            ..principal_ops("DOMAIN\\svc")
        };
        let report = reconcile_principal(&mut store, &ops).await?;
        assert_eq!(report.outcomes.len(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::DryRun));
        assert!(store.journal().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_grants_are_applied_before_revokes() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.seed("SeBatchLogonRight", "DOMAIN\\svc");
        let ops = PrincipalOps {
            grants: vec![Privilege::from("SeServiceLogonRight")],
            revoke_others: true,
            ..principal_ops("DOMAIN\\svc")
        };
        reconcile_principal(&mut store, &ops).await?;
        assert_eq!(
            store.journal().to_vec(),
            vec![
                "grant SeServiceLogonRight DOMAIN\\svc".to_owned(),
                "revoke SeBatchLogonRight DOMAIN\\svc".to_owned(),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_failure_still_reports_every_item() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.seed("SeServiceLogonRight", "DOMAIN\\a");
        store.seed("SeServiceLogonRight", "DOMAIN\\b");
        store.seed("SeServiceLogonRight", "DOMAIN\\c");
        // The middle holder (by revoke order) no longer resolves.
        store.deny_resolution("DOMAIN\\b");

        let ops = PrivilegeOps {
            revoke_all: true,
            ..privilege_ops("SeServiceLogonRight")
        };
        let report = reconcile_privilege(&mut store, &ops).await?;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.succeeded());
        // All three revokes were attempted despite the failure.
        assert_eq!(store.journal().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_pattern_revoke_matches_store_identifiers() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.seed("SeServiceLogonRight", "S-1-5-21-1004336348-1177238915-682003330-512");
        store.seed("SeServiceLogonRight", "S-1-5-19");

        let ops = PrivilegeOps {
            revoke_pattern: Some("^S-1-5-21-".to_owned()),
            ..privilege_ops("SeServiceLogonRight")
        };
        let report = reconcile_privilege(&mut store, &ops).await?;

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Applied);
        assert_eq!(
            report.outcomes[0].principal,
            Principal::from("S-1-5-21-1004336348-1177238915-682003330-512")
        );
        assert!(store.holds(
            &Privilege::from("SeServiceLogonRight"),
            &Principal::from("S-1-5-19")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_pattern_revoke_excludes_newly_granted_principals() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.seed("SeServiceLogonRight", "S-1-5-21-100");
        store.seed("SeServiceLogonRight", "S-1-5-21-200");

        let ops = PrivilegeOps {
            grants: vec![Principal::from("S-1-5-21-100")],
            revoke_pattern: Some("^S-1-5-21-".to_owned()),
            ..privilege_ops("SeServiceLogonRight")
        };
        let report = reconcile_privilege(&mut store, &ops).await?;

        // Grant is a no-op (already held); only the non-granted holder goes.
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::AlreadyHeld);
        assert_eq!(report.outcomes[1].action, Action::Revoke);
        assert_eq!(report.outcomes[1].principal, Principal::from("S-1-5-21-200"));
        Ok(())
    }

    #[tokio::test]
    async fn test_revoke_others_keeps_requested_grants() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        store.seed("A", "D\\U");
        store.seed("C", "D\\U");

        let ops = PrincipalOps {
            grants: vec![Privilege::from("A"), Privilege::from("B")],
            revoke_others: true,
            ..principal_ops("D\\U")
        };
        let report = reconcile_principal(&mut store, &ops).await?;

        assert_eq!(report.outcomes.len(), 3);
        // A already held, B freshly granted, C revoked.
        assert_eq!(report.outcomes[0].status, OutcomeStatus::AlreadyHeld);
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Applied);
        assert_eq!(report.outcomes[1].privilege, Privilege::from("B"));
        assert_eq!(report.outcomes[2].action, Action::Revoke);
        assert_eq!(report.outcomes[2].privilege, Privilege::from("C"));

        assert!(store.holds(&Privilege::from("A"), &Principal::from("D\\U")));
        assert!(store.holds(&Privilege::from("B"), &Principal::from("D\\U")));
        assert!(!store.holds(&Privilege::from("C"), &Principal::from("D\\U")));
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_revocation_of_unheld_privilege_is_reported_not_failed() -> Result<()> {
        let mut store = MemoryPolicyStore::new();
        let ops = PrincipalOps {
            revocations: vec![Privilege::from("SeServiceLogonRight")],
            ..principal_ops("DOMAIN\\svc")
        };
        let report = reconcile_principal(&mut store, &ops).await?;
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::NotHeld);
        assert!(report.succeeded());
        assert!(store.journal().is_empty());
        Ok(())
    }
}
