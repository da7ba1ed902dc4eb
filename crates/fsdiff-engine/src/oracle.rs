//! Equivalence oracle.
//!
//! Compares the result pair of one operation. Success values compare
//! structurally; failure and text values are normalized first so that
//! root paths and build provenance never cause false divergence. Any
//! mismatch is a hard `Divergence` and ends the run.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{EngineError, Result};
use crate::outcome::OpResult;

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // vendor log-location prefixes like [store.go:123]
    RE.get_or_init(|| Regex::new(r"\[\w+\.go:\d+\]\s?").unwrap())
}

pub struct Oracle {
    root_a: String,
    root_b: String,
    bypass: bool,
}

impl Oracle {
    pub fn new(root_a: &Path, root_b: &Path, bypass: bool) -> Self {
        Oracle {
            root_a: root_a.to_string_lossy().into_owned(),
            root_b: root_b.to_string_lossy().into_owned(),
            bypass,
        }
    }

    /// Normalize one side's message: drop severity markers and vendor
    /// log locations, neutralize that side's root path, and canonicalize
    /// multi-line tool output by sorting its lines.
    pub fn normalize(&self, side_root: &str, msg: &str) -> String {
        let msg = msg.replace("<FATAL>:", "").replace("<ERROR>:", "");
        let msg = location_re().replace_all(&msg, "");
        let msg = msg.replace(side_root, "***");
        let msg = msg.trim();
        if msg.contains('\n') {
            let mut lines: Vec<&str> = msg.lines().map(str::trim_end).collect();
            lines.sort_unstable();
            lines.join("\n")
        } else {
            msg.to_string()
        }
    }

    fn normalized_pair(&self, left: &str, right: &str) -> (String, String) {
        (
            self.normalize(&self.root_a, left),
            self.normalize(&self.root_b, right),
        )
    }

    /// Compare the raw pair; `Err(Divergence)` carries both raw results.
    pub fn check(&self, op: &str, left: &OpResult, right: &OpResult) -> Result<()> {
        if self.bypass {
            return Ok(());
        }
        let equal = match (left, right) {
            (OpResult::Failure(l), OpResult::Failure(r)) => {
                // a crash is a severity class above ordinary divergence
                if l.contains("panic") || r.contains("panic") {
                    false
                } else {
                    let (l, r) = self.normalized_pair(l, r);
                    l == r
                }
            }
            (OpResult::Text(l), OpResult::Text(r)) => {
                let (l, r) = self.normalized_pair(l, r);
                l == r
            }
            (l, r) => l == r,
        };
        if equal {
            Ok(())
        } else {
            Err(EngineError::Divergence {
                op: op.to_string(),
                left: left.clone(),
                right: right.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::StatView;

    fn oracle() -> Oracle {
        Oracle::new(Path::new("/tmp/fsdiff/a"), Path::new("/tmp/fsdiff/b"), false)
    }

    #[test]
    fn equal_success_passes() {
        let o = oracle();
        assert!(o.check("mkdir", &OpResult::Unit, &OpResult::Unit).is_ok());
        let stat = OpResult::Stat(StatView::Dir {
            uid: 0,
            gid: 0,
            mode: "0o755".into(),
        });
        assert!(o.check("mkdir", &stat, &stat.clone()).is_ok());
    }

    #[test]
    fn tag_mismatch_diverges() {
        let o = oracle();
        let err = o
            .check("unlink", &OpResult::Unit, &OpResult::Failure("nope".into()))
            .unwrap_err();
        assert!(err.is_divergence());
    }

    #[test]
    fn root_paths_are_neutralized_in_failures() {
        let o = oracle();
        let l = OpResult::Failure("unlink /tmp/fsdiff/a/x: No such file or directory".into());
        let r = OpResult::Failure("unlink /tmp/fsdiff/b/x: No such file or directory".into());
        assert!(o.check("unlink", &l, &r).is_ok());
    }

    #[test]
    fn differing_errno_text_diverges() {
        let o = oracle();
        let l = OpResult::Failure("open /tmp/fsdiff/a/x: Permission denied".into());
        let r = OpResult::Failure("open /tmp/fsdiff/b/x: No such file or directory".into());
        assert!(o.check("open", &l, &r).is_err());
    }

    #[test]
    fn markers_and_go_locations_are_stripped() {
        let o = oracle();
        let l = OpResult::Failure("<ERROR>: [meta.go:421] stale handle".into());
        let r = OpResult::Failure("stale handle".into());
        assert!(o.check("stat", &l, &r).is_ok());
    }

    #[test]
    fn panic_is_never_equivalent() {
        let o = oracle();
        let msg = "runtime panic: index out of range".to_string();
        let l = OpResult::Failure(msg.clone());
        let r = OpResult::Failure(msg);
        assert!(o.check("write", &l, &r).is_err());
    }

    #[test]
    fn multiline_tool_output_compares_order_insensitively() {
        let o = oracle();
        let l = OpResult::Failure("setfacl: /tmp/fsdiff/a/f: bad entry\nsetfacl: extra".into());
        let r = OpResult::Failure("setfacl: extra\nsetfacl: /tmp/fsdiff/b/f: bad entry".into());
        assert!(o.check("set_acl", &l, &r).is_ok());
    }

    #[test]
    fn acl_text_compares_after_normalization() {
        let o = oracle();
        let l = OpResult::Text("user::rw-\ngroup::r--\nother::r--".into());
        let r = OpResult::Text("group::r--\nuser::rw-\nother::r--".into());
        assert!(o.check("get_acl", &l, &r).is_ok());
    }

    #[test]
    fn normalize_is_idempotent() {
        let o = oracle();
        let raw = "<ERROR>: [x.go:9] b\na under /tmp/fsdiff/a";
        let once = o.normalize("/tmp/fsdiff/a", raw);
        let twice = o.normalize("/tmp/fsdiff/a", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn generate_mode_bypasses_all_checks() {
        let o = Oracle::new(Path::new("/a"), Path::new("/b"), true);
        assert!(o
            .check("unlink", &OpResult::Unit, &OpResult::Failure("panic".into()))
            .is_ok());
    }
}
