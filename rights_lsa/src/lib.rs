//!
//! LSA-backed policy store
//!
//! Implements the `rights_core` policy store capability with the Local
//! Security Authority calls (`LsaOpenPolicy`, `LsaEnumerateAccountRights`,
//! `LsaAddAccountRights`, ...), locally or against a remote machine.
//! Windows only; on other targets this crate is empty.
#![deny(missing_docs)]

#[cfg(windows)]
mod lsa;

#[cfg(windows)]
pub use lsa::LsaPolicyStore;
