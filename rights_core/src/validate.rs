//! Pre-flight validation of requested operation combinations.
//!
//! Pure functions: each returns the full list of human-readable problems
//! with a request (an empty list means valid). Nothing here touches the
//! policy store - contradictory requests are rejected before any mutation
//! is attempted.

use regex::Regex;

use crate::types::{Principal, Privilege};

/// The requested operations for one principal.
#[derive(Debug, Clone, Default)]
pub struct PrincipalOps {
    /// The principal whose privileges are being reconciled
    pub principal: Principal,
    /// Privileges to grant
    pub grants: Vec<Privilege>,
    /// Privileges to revoke explicitly
    pub revocations: Vec<Privilege>,
    /// Revoke every currently held privilege
    pub revoke_all: bool,
    /// Revoke every currently held privilege not also being granted
    pub revoke_others: bool,
    /// Compute and report the delta without applying it
    pub dry_run: bool,
}

/// The requested operations for one privilege.
#[derive(Debug, Clone, Default)]
pub struct PrivilegeOps {
    /// The privilege whose holders are being reconciled
    pub privilege: Privilege,
    /// Principals to grant it to
    pub grants: Vec<Principal>,
    /// Principals to revoke it from explicitly
    pub revocations: Vec<Principal>,
    /// Revoke from every current holder
    pub revoke_all: bool,
    /// Revoke from every current holder not also being granted
    pub revoke_others: bool,
    /// Revoke from current holders whose identifier matches this pattern.
    /// Matched against the identifier form the store returns, typically a
    /// raw SID string.
    pub revoke_pattern: Option<String>,
    /// Compute and report the delta without applying it
    pub dry_run: bool,
}

/// Validate a principal-mode request. Empty result = valid.
pub fn validate_principal(ops: &PrincipalOps) -> Vec<String> {
    let mut errors = vec![];

    if ops.principal.0.is_empty() {
        errors.push("a principal must be provided".to_owned());
    }
    if ops.grants.is_empty() && ops.revocations.is_empty() && !ops.revoke_all && !ops.revoke_others
    {
        errors.push("no operation requested: nothing to grant or revoke".to_owned());
    }
    if ops.revoke_all && !ops.grants.is_empty() {
        errors.push("--revoke-all cannot be combined with --grant".to_owned());
    }
    if ops.revoke_all && !ops.revocations.is_empty() {
        errors.push("--revoke-all cannot be combined with --revoke".to_owned());
    }
    if ops.revoke_all && ops.revoke_others {
        errors.push("--revoke-all cannot be combined with --revoke-others".to_owned());
    }
    if ops.revoke_others && ops.grants.is_empty() {
        errors.push(
            "--revoke-others requires at least one --grant (use --revoke-all to revoke everything)"
                .to_owned(),
        );
    }
    if ops.revoke_others && !ops.revocations.is_empty() {
        errors.push("--revoke-others cannot be combined with --revoke".to_owned());
    }
    for privilege in overlap(&ops.grants, &ops.revocations) {
        errors.push(format!(
            "{privilege} appears in both --grant and --revoke"
        ));
    }

    errors
}

/// Validate a privilege-mode request. Empty result = valid.
pub fn validate_privilege(ops: &PrivilegeOps) -> Vec<String> {
    let mut errors = vec![];

    if ops.privilege.0.is_empty() {
        errors.push("a privilege must be provided".to_owned());
    }
    if ops.grants.is_empty()
        && ops.revocations.is_empty()
        && !ops.revoke_all
        && !ops.revoke_others
        && ops.revoke_pattern.is_none()
    {
        errors.push("no operation requested: nothing to grant or revoke".to_owned());
    }
    if ops.revoke_all && !ops.grants.is_empty() {
        errors.push("--revoke-all cannot be combined with --grant".to_owned());
    }
    if ops.revoke_all && !ops.revocations.is_empty() {
        errors.push("--revoke-all cannot be combined with --revoke".to_owned());
    }
    if ops.revoke_all && ops.revoke_others {
        errors.push("--revoke-all cannot be combined with --revoke-others".to_owned());
    }
    if ops.revoke_others && ops.grants.is_empty() {
        errors.push(
            "--revoke-others requires at least one --grant (use --revoke-all to revoke everything)"
                .to_owned(),
        );
    }
    if ops.revoke_others && !ops.revocations.is_empty() {
        errors.push("--revoke-others cannot be combined with --revoke".to_owned());
    }
    if let Some(pattern) = &ops.revoke_pattern {
        if ops.revoke_all {
            errors.push("--revoke-pattern cannot be combined with --revoke-all".to_owned());
        }
        if ops.revoke_others {
            errors.push("--revoke-pattern cannot be combined with --revoke-others".to_owned());
        }
        if !ops.revocations.is_empty() {
            errors.push("--revoke-pattern cannot be combined with --revoke".to_owned());
        }
        if let Err(e) = Regex::new(pattern) {
            errors.push(format!("invalid --revoke-pattern: {e}"));
        }
    }
    for principal in overlap(&ops.grants, &ops.revocations) {
        errors.push(format!(
            "{principal} appears in both --grant and --revoke"
        ));
    }

    errors
}

/// Items requested in both lists, in the order they appear in `grants`.
fn overlap<'a, T: PartialEq>(grants: &'a [T], revocations: &[T]) -> Vec<&'a T> {
    grants
        .iter()
        .filter(|item| revocations.contains(item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_principal_ops() -> PrincipalOps {
        PrincipalOps {
            principal: Principal::from("DOMAIN\\svc"),
            ..Default::default()
        }
    }

    fn base_privilege_ops() -> PrivilegeOps {
        PrivilegeOps {
            privilege: Privilege::from("SeServiceLogonRight"),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_request_is_rejected() {
        let errors = validate_principal(&base_principal_ops());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no operation requested"));
    }

    #[test]
    fn test_missing_principal_is_rejected() {
        let ops = PrincipalOps {
            principal: Principal::from(""),
            revoke_all: true,
            ..Default::default()
        };
        assert!(validate_principal(&ops)
            .iter()
            .any(|e| e.contains("principal must be provided")));
    }

    #[test]
    fn test_revoke_all_excludes_everything_else() {
        let ops = PrincipalOps {
            grants: vec![Privilege::from("SeBatchLogonRight")],
            revocations: vec![Privilege::from("SeServiceLogonRight")],
            revoke_all: true,
            revoke_others: true,
            ..base_principal_ops()
        };
        let errors = validate_principal(&ops);
        assert!(errors.iter().any(|e| e.contains("--revoke-all") && e.contains("--grant")));
        assert!(errors.iter().any(|e| e.ends_with("combined with --revoke")));
        assert!(errors
            .iter()
            .any(|e| e.contains("--revoke-all") && e.contains("--revoke-others")));
    }

    #[test]
    fn test_revoke_others_requires_grants() {
        let ops = PrincipalOps {
            revoke_others: true,
            ..base_principal_ops()
        };
        assert!(validate_principal(&ops)
            .iter()
            .any(|e| e.contains("--revoke-others requires")));
    }

    #[test]
    fn test_grant_revoke_overlap_is_rejected() {
        let ops = PrincipalOps {
            grants: vec![
                Privilege::from("SeServiceLogonRight"),
                Privilege::from("SeBatchLogonRight"),
            ],
            revocations: vec![Privilege::from("SeServiceLogonRight")],
            ..base_principal_ops()
        };
        let errors = validate_principal(&ops);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("SeServiceLogonRight"));
    }

    #[test]
    fn test_valid_principal_request_passes() {
        let ops = PrincipalOps {
            grants: vec![Privilege::from("SeServiceLogonRight")],
            revoke_others: true,
            ..base_principal_ops()
        };
        assert!(validate_principal(&ops).is_empty());
    }

    #[test]
    fn test_pattern_combines_with_grants_only() {
        let ok = PrivilegeOps {
            grants: vec![Principal::from("DOMAIN\\svc")],
            revoke_pattern: Some("^S-1-5-21-".to_owned()),
            ..base_privilege_ops()
        };
        assert!(validate_privilege(&ok).is_empty());

        let bad = PrivilegeOps {
            revoke_all: true,
            revoke_pattern: Some("^S-1-5-21-".to_owned()),
            ..base_privilege_ops()
        };
        assert!(validate_privilege(&bad)
            .iter()
            .any(|e| e.contains("--revoke-pattern") && e.contains("--revoke-all")));
    }

    #[test]
    fn test_unparseable_pattern_is_rejected() {
        let ops = PrivilegeOps {
            revoke_pattern: Some("S-1-5-(".to_owned()),
            ..base_privilege_ops()
        };
        assert!(validate_privilege(&ops)
            .iter()
            .any(|e| e.contains("invalid --revoke-pattern")));
    }
}
