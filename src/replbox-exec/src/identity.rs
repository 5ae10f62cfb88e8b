//! Resolution of OS accounts.
//!
//! The sandbox identity is looked up once at startup and then shared
//! read-only by every execution.

use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{ExecError, Result};

/// Upper bound for the getpwnam_r scratch buffer.
const MAX_PASSWD_BUFFER: usize = 1024 * 1024;

/// A resolved OS account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    name: String,
    uid: u32,
    gid: u32,
    home: PathBuf,
}

/// The unprivileged account every command executes as.
pub type SandboxIdentity = Account;

impl Account {
    /// Build an account from already known values.
    pub fn new(name: impl Into<String>, uid: u32, gid: u32, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            home: home.into(),
        }
    }

    /// Look up an account by name in the system password database.
    pub fn lookup(name: &str) -> Result<Self> {
        let name_c =
            CString::new(name).map_err(|_| ExecError::InvalidAccountName(name.to_string()))?;

        let mut buf_len = match unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) } {
            n if n > 0 => n as usize,
            _ => 1024,
        };

        loop {
            let mut buf: Vec<libc::c_char> = vec![0; buf_len];
            let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
            let mut result: *mut libc::passwd = std::ptr::null_mut();

            let ret = unsafe {
                libc::getpwnam_r(
                    name_c.as_ptr(),
                    &mut passwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };

            if ret == libc::ERANGE && buf_len < MAX_PASSWD_BUFFER {
                buf_len *= 2;
                continue;
            }
            if ret != 0 {
                return Err(ExecError::AccountLookup {
                    name: name.to_string(),
                    source: std::io::Error::from_raw_os_error(ret),
                });
            }
            if result.is_null() {
                return Err(ExecError::UnknownAccount {
                    name: name.to_string(),
                });
            }

            // pw_dir points into `buf`, which is still alive here
            let home = if passwd.pw_dir.is_null() {
                PathBuf::new()
            } else {
                let dir = unsafe { CStr::from_ptr(passwd.pw_dir) };
                PathBuf::from(OsStr::from_bytes(dir.to_bytes()))
            };

            return Ok(Self {
                name: name.to_string(),
                uid: passwd.pw_uid,
                gid: passwd.pw_gid,
                home,
            });
        }
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric user id.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Primary group id.
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Home directory from the password database.
    pub fn home(&self) -> &Path {
        &self.home
    }
}
