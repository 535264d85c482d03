//! The raw LSA call sequence behind the store trait.
//!
//! Principals coming out of this store are raw SID strings (`S-1-…`) - the
//! stable identifier form, and the form revoke patterns are matched
//! against. Principals going in may be either a SID string or an account
//! name; names are resolved per call and resolution failures surface as
//! per-item grant/revoke errors.

use std::collections::HashSet;
use std::ffi::c_void;
use std::ptr;

use async_trait::async_trait;
use tracing::debug;

use rights_core::store::{PolicyStore, StoreError};
use rights_core::types::{Assignment, Principal, Privilege};

use windows_sys::Win32::Foundation::{GetLastError, LocalFree, NTSTATUS};
use windows_sys::Win32::Security::Authentication::Identity::{
    LsaAddAccountRights, LsaClose, LsaEnumerateAccountRights,
    LsaEnumerateAccountsWithUserRight, LsaFreeMemory, LsaNtStatusToWinError, LsaOpenPolicy,
    LsaRemoveAccountRights, LSA_ENUMERATION_INFORMATION, LSA_HANDLE, LSA_OBJECT_ATTRIBUTES,
    LSA_UNICODE_STRING,
};
use windows_sys::Win32::Security::Authorization::{
    ConvertSidToStringSidW, ConvertStringSidToSidW,
};
use windows_sys::Win32::Security::{LookupAccountNameW, SID_NAME_USE};

const POLICY_VIEW_LOCAL_INFORMATION: u32 = 0x0000_0001;
const POLICY_CREATE_ACCOUNT: u32 = 0x0000_0010;
const POLICY_LOOKUP_NAMES: u32 = 0x0000_0800;

const STATUS_SUCCESS: NTSTATUS = 0;
const STATUS_NO_MORE_ENTRIES: NTSTATUS = 0x8000_001Au32 as NTSTATUS;
const STATUS_OBJECT_NAME_NOT_FOUND: NTSTATUS = 0xC000_0034u32 as NTSTATUS;

/// The rights LSA knows how to assign. There is no enumeration call for
/// these; listing walks this table the way the interactive policy editor
/// does.
const WELL_KNOWN_RIGHTS: &[&str] = &[
    "SeAssignPrimaryTokenPrivilege",
    "SeAuditPrivilege",
    "SeBackupPrivilege",
    "SeBatchLogonRight",
    "SeChangeNotifyPrivilege",
    "SeCreateGlobalPrivilege",
    "SeCreatePagefilePrivilege",
    "SeCreatePermanentPrivilege",
    "SeCreateSymbolicLinkPrivilege",
    "SeCreateTokenPrivilege",
    "SeDebugPrivilege",
    "SeDelegateSessionUserImpersonatePrivilege",
    "SeDenyBatchLogonRight",
    "SeDenyInteractiveLogonRight",
    "SeDenyNetworkLogonRight",
    "SeDenyRemoteInteractiveLogonRight",
    "SeDenyServiceLogonRight",
    "SeEnableDelegationPrivilege",
    "SeImpersonatePrivilege",
    "SeIncreaseBasePriorityPrivilege",
    "SeIncreaseQuotaPrivilege",
    "SeIncreaseWorkingSetPrivilege",
    "SeInteractiveLogonRight",
    "SeLoadDriverPrivilege",
    "SeLockMemoryPrivilege",
    "SeMachineAccountPrivilege",
    "SeManageVolumePrivilege",
    "SeNetworkLogonRight",
    "SeProfileSingleProcessPrivilege",
    "SeRelabelPrivilege",
    "SeRemoteInteractiveLogonRight",
    "SeRemoteShutdownPrivilege",
    "SeRestorePrivilege",
    "SeSecurityPrivilege",
    "SeServiceLogonRight",
    "SeShutdownPrivilege",
    "SeSyncAgentPrivilege",
    "SeSystemEnvironmentPrivilege",
    "SeSystemProfilePrivilege",
    "SeSystemtimePrivilege",
    "SeTakeOwnershipPrivilege",
    "SeTcbPrivilege",
    "SeTimeZonePrivilege",
    "SeTrustedCredManAccessPrivilege",
    "SeUndockPrivilege",
];

/// A policy store backed by the Local Security Authority of one machine.
pub struct LsaPolicyStore {
    handle: LSA_HANDLE,
    target: String,
}

// The handle is only ever used from the invocation's single thread of
// control; LSA policy handles are not thread-affine.
unsafe impl Send for LsaPolicyStore {}

impl LsaPolicyStore {
    /// Open the policy database on `system` (the local machine when `None`).
    pub fn connect(system: Option<&str>) -> Result<Self, StoreError> {
        let target = system.unwrap_or("localhost").to_owned();
        let system_wide = system.map(to_wide);
        let system_lsa = system_wide.as_deref().map(lsa_string);

        let attributes: LSA_OBJECT_ATTRIBUTES = unsafe { std::mem::zeroed() };
        let mut handle: LSA_HANDLE = unsafe { std::mem::zeroed() };
        let status = unsafe {
            LsaOpenPolicy(
                system_lsa
                    .as_ref()
                    .map(|s| s as *const LSA_UNICODE_STRING)
                    .unwrap_or(ptr::null()),
                &attributes,
                POLICY_VIEW_LOCAL_INFORMATION | POLICY_CREATE_ACCOUNT | POLICY_LOOKUP_NAMES,
                &mut handle,
            )
        };
        if status != STATUS_SUCCESS {
            return Err(StoreError::Connection {
                target,
                reason: win32_reason(status),
            });
        }
        debug!(%target, "policy store opened");
        Ok(LsaPolicyStore { handle, target })
    }

    /// The machine this store was opened against.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn sid_for(&self, principal: &Principal) -> Result<SidBuf, String> {
        if principal.0.starts_with("S-1-") {
            let wide = to_wide(&principal.0);
            let mut psid: *mut c_void = ptr::null_mut();
            let ok = unsafe { ConvertStringSidToSidW(wide.as_ptr(), &mut psid) };
            if ok == 0 {
                return Err(format!(
                    "invalid SID string (win32 error {})",
                    unsafe { GetLastError() }
                ));
            }
            return Ok(SidBuf::Local(psid));
        }

        // Name form: two-pass LookupAccountNameW, sized then filled.
        let wide = to_wide(&principal.0);
        let mut sid_len = 0u32;
        let mut domain_len = 0u32;
        let mut sid_use: SID_NAME_USE = 0;
        unsafe {
            LookupAccountNameW(
                ptr::null(),
                wide.as_ptr(),
                ptr::null_mut(),
                &mut sid_len,
                ptr::null_mut(),
                &mut domain_len,
                &mut sid_use,
            );
        }
        if sid_len == 0 {
            return Err(format!(
                "unable to resolve account name (win32 error {})",
                unsafe { GetLastError() }
            ));
        }
        let mut sid = vec![0u8; sid_len as usize];
        let mut domain = vec![0u16; domain_len as usize];
        let ok = unsafe {
            LookupAccountNameW(
                ptr::null(),
                wide.as_ptr(),
                sid.as_mut_ptr() as *mut c_void,
                &mut sid_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut sid_use,
            )
        };
        if ok == 0 {
            return Err(format!(
                "unable to resolve account name (win32 error {})",
                unsafe { GetLastError() }
            ));
        }
        Ok(SidBuf::Owned(sid))
    }
}

impl Drop for LsaPolicyStore {
    fn drop(&mut self) {
        unsafe {
            LsaClose(self.handle);
        }
    }
}

#[async_trait]
impl PolicyStore for LsaPolicyStore {
    async fn principals_for(
        &self,
        privilege: &Privilege,
    ) -> Result<HashSet<Principal>, StoreError> {
        let wide = to_wide(&privilege.0);
        let right = lsa_string(&wide);
        let mut buffer: *mut c_void = ptr::null_mut();
        let mut count = 0u32;
        let status = unsafe {
            LsaEnumerateAccountsWithUserRight(self.handle, &right, &mut buffer, &mut count)
        };
        if status == STATUS_NO_MORE_ENTRIES {
            return Ok(HashSet::new());
        }
        if status != STATUS_SUCCESS {
            return Err(StoreError::Enumeration {
                reason: format!("{privilege}: {}", win32_reason(status)),
            });
        }

        let mut principals = HashSet::new();
        unsafe {
            let entries =
                std::slice::from_raw_parts(buffer as *const LSA_ENUMERATION_INFORMATION, count as usize);
            for entry in entries {
                if let Some(sid) = sid_to_string(entry.Sid) {
                    principals.insert(Principal(sid));
                }
            }
            LsaFreeMemory(buffer);
        }
        Ok(principals)
    }

    async fn privileges_for(
        &self,
        principal: &Principal,
    ) -> Result<HashSet<Privilege>, StoreError> {
        let sid = self
            .sid_for(principal)
            .map_err(|reason| StoreError::Enumeration {
                reason: format!("{principal}: {reason}"),
            })?;

        let mut rights: *mut LSA_UNICODE_STRING = ptr::null_mut();
        let mut count = 0u32;
        let status = unsafe {
            LsaEnumerateAccountRights(self.handle, sid.as_psid(), &mut rights, &mut count)
        };
        // An account with no assignments is not an error, just empty.
        if status == STATUS_OBJECT_NAME_NOT_FOUND {
            return Ok(HashSet::new());
        }
        if status != STATUS_SUCCESS {
            return Err(StoreError::Enumeration {
                reason: format!("{principal}: {}", win32_reason(status)),
            });
        }

        let mut privileges = HashSet::new();
        unsafe {
            let entries = std::slice::from_raw_parts(rights, count as usize);
            for entry in entries {
                privileges.insert(Privilege(lsa_string_to_string(entry)));
            }
            LsaFreeMemory(rights as *mut c_void);
        }
        Ok(privileges)
    }

    async fn grant(
        &mut self,
        principal: &Principal,
        privilege: &Privilege,
    ) -> Result<(), StoreError> {
        let sid = self.sid_for(principal).map_err(|reason| StoreError::Grant {
            principal: principal.to_owned(),
            privilege: privilege.to_owned(),
            reason,
        })?;
        let wide = to_wide(&privilege.0);
        let right = lsa_string(&wide);
        let status = unsafe { LsaAddAccountRights(self.handle, sid.as_psid(), &right, 1) };
        if status != STATUS_SUCCESS {
            return Err(StoreError::Grant {
                principal: principal.to_owned(),
                privilege: privilege.to_owned(),
                reason: win32_reason(status),
            });
        }
        Ok(())
    }

    async fn revoke(
        &mut self,
        principal: &Principal,
        privilege: &Privilege,
    ) -> Result<(), StoreError> {
        let sid = self
            .sid_for(principal)
            .map_err(|reason| StoreError::Revoke {
                principal: principal.to_owned(),
                privilege: privilege.to_owned(),
                reason,
            })?;
        let wide = to_wide(&privilege.0);
        let right = lsa_string(&wide);
        let status =
            unsafe { LsaRemoveAccountRights(self.handle, sid.as_psid(), 0, &right, 1) };
        // Revoking a right that is not held is a no-op.
        if status == STATUS_OBJECT_NAME_NOT_FOUND {
            return Ok(());
        }
        if status != STATUS_SUCCESS {
            return Err(StoreError::Revoke {
                principal: principal.to_owned(),
                privilege: privilege.to_owned(),
                reason: win32_reason(status),
            });
        }
        Ok(())
    }

    async fn enumerate_all(&self) -> Result<Vec<Assignment>, StoreError> {
        let mut assignments = vec![];
        for right in WELL_KNOWN_RIGHTS {
            let privilege = Privilege::from(*right);
            for principal in self.principals_for(&privilege).await? {
                assignments.push(Assignment {
                    privilege: privilege.to_owned(),
                    principal,
                });
            }
        }
        Ok(assignments)
    }
}

/// A SID either allocated by the system (LocalFree) or by us.
enum SidBuf {
    Local(*mut c_void),
    Owned(Vec<u8>),
}

impl SidBuf {
    fn as_psid(&self) -> *mut c_void {
        match self {
            SidBuf::Local(psid) => *psid,
            SidBuf::Owned(bytes) => bytes.as_ptr() as *mut c_void,
        }
    }
}

impl Drop for SidBuf {
    fn drop(&mut self) {
        if let SidBuf::Local(psid) = self {
            unsafe {
                LocalFree(*psid);
            }
        }
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Build an LSA string over a nul-terminated UTF-16 buffer. The buffer must
/// outlive the returned value.
fn lsa_string(wide: &[u16]) -> LSA_UNICODE_STRING {
    let chars = wide.len().saturating_sub(1);
    LSA_UNICODE_STRING {
        Length: (chars * 2) as u16,
        MaximumLength: (wide.len() * 2) as u16,
        Buffer: wide.as_ptr() as *mut u16,
    }
}

fn lsa_string_to_string(s: &LSA_UNICODE_STRING) -> String {
    let chars = (s.Length / 2) as usize;
    let slice = unsafe { std::slice::from_raw_parts(s.Buffer, chars) };
    String::from_utf16_lossy(slice)
}

fn sid_to_string(sid: *mut c_void) -> Option<String> {
    let mut buffer: *mut u16 = ptr::null_mut();
    let ok = unsafe { ConvertSidToStringSidW(sid, &mut buffer) };
    if ok == 0 {
        return None;
    }
    let text = unsafe {
        let mut len = 0;
        while *buffer.add(len) != 0 {
            len += 1;
        }
        String::from_utf16_lossy(std::slice::from_raw_parts(buffer, len))
    };
    unsafe {
        LocalFree(buffer as *mut c_void);
    }
    Some(text)
}

fn win32_reason(status: NTSTATUS) -> String {
    format!("win32 error {}", unsafe { LsaNtStatusToWinError(status) })
}
