//! Simulated user identities and scoped impersonation.
//!
//! Impersonation mutates global process state (effective uid/gid), so it is
//! only sound under the engine's single-threaded model. The guards restore
//! the prior identity on every exit path, panics included.

use std::ffi::CString;
use std::io;
use std::process::Command;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

impl Identity {
    /// Resolve a user name via the passwd database. Resolved fresh per
    /// call, never cached on entities.
    pub fn resolve(name: &str) -> Result<Identity> {
        let cname = CString::new(name)
            .map_err(|_| EngineError::UnknownUser(name.to_string()))?;
        // getpwnam returns a pointer into static storage; we copy the two
        // fields out before any other libc call can clobber it.
        let pw = unsafe { libc::getpwnam(cname.as_ptr()) };
        if pw.is_null() {
            return Err(EngineError::UnknownUser(name.to_string()));
        }
        let (uid, gid) = unsafe { ((*pw).pw_uid, (*pw).pw_gid) };
        Ok(Identity {
            name: name.to_string(),
            uid,
            gid,
        })
    }
}

/// Scoped effective uid/gid switch. Drop restores the captured baseline,
/// euid first so the egid restore still has the privilege to succeed.
pub struct IdentityGuard {
    restore: Option<(libc::uid_t, libc::gid_t)>,
}

impl IdentityGuard {
    pub fn switch(identity: &Identity) -> Result<IdentityGuard> {
        let prev_uid = unsafe { libc::geteuid() };
        let prev_gid = unsafe { libc::getegid() };
        if identity.uid == prev_uid {
            // Already that user; lets the suite run unprivileged.
            return Ok(IdentityGuard { restore: None });
        }
        // gid must change while we still hold the uid privilege.
        if unsafe { libc::setegid(identity.gid) } != 0 {
            return Err(EngineError::Impersonation {
                user: identity.name.clone(),
                source: io::Error::last_os_error(),
            });
        }
        if unsafe { libc::seteuid(identity.uid) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::setegid(prev_gid) };
            return Err(EngineError::Impersonation {
                user: identity.name.clone(),
                source: err,
            });
        }
        Ok(IdentityGuard {
            restore: Some((prev_uid, prev_gid)),
        })
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        if let Some((uid, gid)) = self.restore.take() {
            unsafe {
                libc::seteuid(uid);
                libc::setegid(gid);
            }
        }
    }
}

/// Scoped umask change.
pub struct UmaskGuard {
    prev: libc::mode_t,
}

impl UmaskGuard {
    pub fn set(mask: u32) -> UmaskGuard {
        let prev = unsafe { libc::umask(mask as libc::mode_t) };
        UmaskGuard { prev }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::umask(self.prev);
        }
    }
}

pub fn effective_uid() -> libc::uid_t {
    unsafe { libc::geteuid() }
}

/// Name of the effective user, for collapsing the simulated user list
/// when running unprivileged.
pub fn current_user_name() -> Option<String> {
    let pw = unsafe { libc::getpwuid(libc::geteuid()) };
    if pw.is_null() {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr((*pw).pw_name) };
    Some(name.to_string_lossy().into_owned())
}

/// Create the simulated OS users and groups. Root only; failures of
/// individual commands are logged and ignored since the accounts usually
/// already exist from a previous run.
pub fn provision(users: &[String], groups: &[String]) {
    if effective_uid() != 0 {
        tracing::debug!("not root, skipping user provisioning");
        return;
    }
    for group in groups {
        run_quiet("groupadd", &["-f", group.as_str()]);
    }
    for user in users {
        if user == "root" {
            continue;
        }
        run_quiet("useradd", &["-m", "-g", user.as_str(), user.as_str()]);
    }
}

/// Reassign a user's supplementary groups via usermod.
pub fn change_groups(user: &str, groups: &[String]) -> io::Result<()> {
    let list = groups.join(",");
    let status = Command::new("usermod").args(["-G", &list, user]).status()?;
    if !status.success() {
        return Err(io::Error::other(format!(
            "usermod -G {list} {user} exited with {status}"
        )));
    }
    Ok(())
}

fn run_quiet(cmd: &str, args: &[&str]) {
    match Command::new(cmd).args(args).output() {
        Ok(out) if !out.status.success() => {
            tracing::debug!(cmd, ?args, "provisioning command failed (ignored)");
        }
        Err(err) => {
            tracing::debug!(cmd, %err, "provisioning command missing (ignored)");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_root_is_uid_zero() {
        let id = Identity::resolve("root").unwrap();
        assert_eq!(id.uid, 0);
        assert_eq!(id.gid, 0);
    }

    #[test]
    fn resolve_unknown_user_errors() {
        assert!(matches!(
            Identity::resolve("no-such-user-zzqq"),
            Err(EngineError::UnknownUser(_))
        ));
    }

    #[test]
    fn switch_to_current_identity_is_a_noop() {
        let uid = effective_uid();
        let me = Identity {
            name: "self".into(),
            uid,
            gid: unsafe { libc::getegid() },
        };
        {
            let _guard = IdentityGuard::switch(&me).unwrap();
            assert_eq!(effective_uid(), uid);
        }
        assert_eq!(effective_uid(), uid);
    }

    #[test]
    fn umask_guard_restores_previous_mask() {
        let before = unsafe { libc::umask(0o022) };
        unsafe { libc::umask(0o022) };
        {
            let _guard = UmaskGuard::set(0o077);
            let current = unsafe { libc::umask(0o077) };
            assert_eq!(current, 0o077);
        }
        let after = unsafe { libc::umask(before) };
        assert_eq!(after, 0o022);
    }
}
