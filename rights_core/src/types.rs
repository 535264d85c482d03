//! Core identifiers of the assignment model.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A named right, such as `SeServiceLogonRight`.
///
/// Opaque and case-sensitive; the engine only ever compares privileges for
/// equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege(pub String);

impl Display for Privilege {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Privilege {
    fn from(val: &str) -> Self {
        Privilege(val.to_owned())
    }
}

impl From<String> for Privilege {
    fn from(val: String) -> Self {
        Privilege(val)
    }
}

/// An identity that can hold privileges.
///
/// Either a resolvable account name (`DOMAIN\user`) or a raw SID string
/// (`S-1-5-21-…`). The engine never resolves principals itself - that is the
/// policy store's job, and it may fail per item.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub String);

impl Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(val: &str) -> Self {
        Principal(val.to_owned())
    }
}

impl From<String> for Principal {
    fn from(val: String) -> Self {
        Principal(val)
    }
}

/// A held (privilege, principal) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// The right being held
    pub privilege: Privilege,
    /// The identity holding it
    pub principal: Principal,
}
