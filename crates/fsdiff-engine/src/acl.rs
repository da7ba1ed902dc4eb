//! External ACL tool delegation.
//!
//! The engine never computes ACL semantics itself. It drives `setfacl`
//! and `getfacl` and compares their textual output; mask recalculation
//! flags are passed through verbatim.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::outcome::OpResult;

/// One `setfacl -m` invocation. Empty permission sets render as `-`.
#[derive(Debug, Clone, Default)]
pub struct AclSpec {
    pub user: String,
    pub user_perm: String,
    pub group: String,
    pub group_perm: String,
    pub other_perm: String,
    /// `m::<perm>` entry; `None` leaves the mask to the tool.
    pub mask: Option<String>,
    /// `-d`: operate on the default ACL.
    pub default_acl: bool,
    /// `-R`: recurse.
    pub recursive: bool,
    /// `--mask` / `--no-mask`: force or suppress mask recalculation.
    pub recalc_mask: bool,
    pub no_recalc_mask: bool,
    /// `-L` / `-P`: symlink policy while recursing.
    pub logical: bool,
    pub physical: bool,
}

fn perm(p: &str) -> &str {
    if p.is_empty() {
        "-"
    } else {
        p
    }
}

impl AclSpec {
    /// The `u:...,g:...,o::...[,m::...]` entry text.
    pub fn entry(&self) -> String {
        let mut s = format!(
            "u:{}:{},g:{}:{},o::{}",
            self.user,
            perm(&self.user_perm),
            self.group,
            perm(&self.group_perm),
            perm(&self.other_perm)
        );
        if let Some(mask) = &self.mask {
            s.push_str(&format!(",m::{}", perm(mask)));
        }
        s
    }

    pub fn args(&self, path: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if self.default_acl {
            args.push("-d".to_string());
        }
        if self.recursive {
            args.push("-R".to_string());
            // symlink policy only means anything while recursing
            if self.logical {
                args.push("-L".to_string());
            } else if self.physical {
                args.push("-P".to_string());
            }
        }
        if self.recalc_mask {
            args.push("--mask".to_string());
        } else if self.no_recalc_mask {
            args.push("--no-mask".to_string());
        }
        args.push("-m".to_string());
        args.push(self.entry());
        args.push(path.to_string_lossy().into_owned());
        args
    }
}

/// Look for setfacl and getfacl on PATH; ACL rules are disabled when
/// either is missing.
pub fn detect_acl_tools() -> Option<(PathBuf, PathBuf)> {
    let set = find_on_path("setfacl")?;
    let get = find_on_path("getfacl")?;
    Some((set, get))
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn set_acl(path: &Path, spec: &AclSpec) -> OpResult {
    run_tool("setfacl", &spec.args(path), path)
}

/// `setfacl -b`: strip all extended entries.
pub fn remove_acl(path: &Path) -> OpResult {
    let args = vec!["-b".to_string(), path.to_string_lossy().into_owned()];
    run_tool("setfacl", &args, path)
}

/// The textual ACL dump with the `# file:` header stripped; compared as
/// an opaque string by the oracle.
pub fn get_acl(path: &Path) -> OpResult {
    let out = match Command::new("getfacl").arg(path).output() {
        Ok(out) => out,
        Err(e) => return OpResult::fail("getfacl", path, e),
    };
    if !out.status.success() {
        return OpResult::fail(
            "getfacl",
            path,
            String::from_utf8_lossy(&out.stderr).trim(),
        );
    }
    let text = String::from_utf8_lossy(&out.stdout);
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !line.starts_with("# file:"))
        .collect();
    OpResult::Text(kept.join("\n").trim().to_string())
}

fn run_tool(tool: &str, args: &[String], path: &Path) -> OpResult {
    let out = match Command::new(tool).args(args).output() {
        Ok(out) => out,
        Err(e) => return OpResult::fail(tool, path, e),
    };
    if out.status.success() {
        get_acl(path)
    } else {
        OpResult::fail(tool, path, String::from_utf8_lossy(&out.stderr).trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_perms_render_as_dash() {
        let spec = AclSpec {
            user: "user1".into(),
            user_perm: String::new(),
            group: "group1".into(),
            group_perm: "rw".into(),
            other_perm: "r".into(),
            ..AclSpec::default()
        };
        assert_eq!(spec.entry(), "u:user1:-,g:group1:rw,o::r");
    }

    #[test]
    fn mask_entry_is_appended() {
        let spec = AclSpec {
            user: "u".into(),
            user_perm: "rwx".into(),
            group: "g".into(),
            group_perm: "r".into(),
            other_perm: String::new(),
            mask: Some("rx".into()),
            ..AclSpec::default()
        };
        assert_eq!(spec.entry(), "u:u:rwx,g:g:r,o::-,m::rx");
    }

    #[test]
    fn flags_order_and_symlink_policy() {
        let spec = AclSpec {
            user: "u".into(),
            group: "g".into(),
            default_acl: true,
            recursive: true,
            logical: true,
            no_recalc_mask: true,
            ..AclSpec::default()
        };
        let args = spec.args(Path::new("/x"));
        assert_eq!(
            args,
            vec!["-d", "-R", "-L", "--no-mask", "-m", "u:u:-,g:g:-,o::-", "/x"]
        );
    }

    #[test]
    fn symlink_policy_dropped_without_recursion() {
        let spec = AclSpec {
            user: "u".into(),
            group: "g".into(),
            logical: true,
            ..AclSpec::default()
        };
        let args = spec.args(Path::new("/x"));
        assert!(!args.contains(&"-L".to_string()));
    }

    #[test]
    fn get_acl_strips_file_header() {
        let Some(_) = detect_acl_tools() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();
        match get_acl(&path) {
            OpResult::Text(text) => {
                assert!(!text.contains("# file:"));
                assert!(text.contains("user::"));
            }
            OpResult::Failure(_) => {} // getfacl may be unusable here
            other => panic!("unexpected {other:?}"),
        }
    }
}
