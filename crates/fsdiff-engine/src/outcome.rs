//! Operation results as comparable data.
//!
//! Every per-root operation produces an `OpResult`. Success carries a
//! structural value (stat view, sorted listing, content digest, text);
//! failure carries the error message. The oracle compares these, never
//! raw filesystem state.

use std::fmt::Display;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use serde::Serialize;

/// The stat fields the engine compares. Inode and time fields are
/// deliberately excluded since they legitimately differ across two
/// independent trees. Mode is kept as an octal string so log lines and
/// divergence reports stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum StatView {
    File {
        uid: u32,
        gid: u32,
        size: u64,
        mode: String,
        nlink: u64,
    },
    Dir {
        uid: u32,
        gid: u32,
        mode: String,
    },
    Symlink {
        uid: u32,
        gid: u32,
        mode: String,
    },
    Other {
        uid: u32,
        gid: u32,
        mode: String,
    },
}

impl StatView {
    pub fn from_metadata(meta: &Metadata) -> StatView {
        let mode = format!("0o{:o}", meta.mode() & 0o7777);
        let ft = meta.file_type();
        if ft.is_symlink() {
            StatView::Symlink {
                uid: meta.uid(),
                gid: meta.gid(),
                mode,
            }
        } else if ft.is_dir() {
            StatView::Dir {
                uid: meta.uid(),
                gid: meta.gid(),
                mode,
            }
        } else if ft.is_file() {
            StatView::File {
                uid: meta.uid(),
                gid: meta.gid(),
                size: meta.len(),
                mode,
                nlink: meta.nlink(),
            }
        } else {
            StatView::Other {
                uid: meta.uid(),
                gid: meta.gid(),
                mode,
            }
        }
    }

    /// Capture the view at `path`. `follow` picks stat vs lstat semantics.
    pub fn capture(path: &Path, follow: bool) -> std::io::Result<StatView> {
        let meta = if follow {
            std::fs::metadata(path)?
        } else {
            std::fs::symlink_metadata(path)?
        };
        Ok(StatView::from_metadata(&meta))
    }
}

/// Parsed summary fields of the admin `info` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InfoFields {
    pub files: u64,
    pub dirs: u64,
    pub length: u64,
    pub size: u64,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum OpResult {
    Unit,
    Bool(bool),
    Num(u64),
    Stat(StatView),
    /// blake3 hex digest of read content.
    Digest(String),
    Bytes(Vec<u8>),
    Text(String),
    /// Sorted directory listing, control files filtered.
    Listing(Vec<String>),
    /// Sorted (name, value) attribute pairs.
    Pairs(Vec<(String, Vec<u8>)>),
    Info(InfoFields),
    Failure(String),
}

impl OpResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, OpResult::Failure(_))
    }

    /// Standard failure shape for an operation on one path.
    pub fn fail(op: &str, path: &Path, err: impl Display) -> OpResult {
        OpResult::Failure(format!("{op} {}: {err}", path.display()))
    }

    /// Failure shape for operations with a source and a destination.
    pub fn fail2(op: &str, src: &Path, dst: &Path, err: impl Display) -> OpResult {
        OpResult::Failure(format!(
            "{op} {} {}: {err}",
            src.display(),
            dst.display()
        ))
    }

    /// Capture a post-operation stat view, the way most mutating ops
    /// report success.
    pub fn stat_of(op: &str, path: &Path, follow: bool) -> OpResult {
        match StatView::capture(path, follow) {
            Ok(view) => OpResult::Stat(view),
            Err(err) => OpResult::fail(op, path, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_view_captures_size_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        match StatView::capture(&path, true).unwrap() {
            StatView::File { size, nlink, .. } => {
                assert_eq!(size, 5);
                assert_eq!(nlink, 1);
            }
            other => panic!("expected file view, got {other:?}"),
        }
    }

    #[test]
    fn symlink_view_requires_nofollow() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("t");
        let link = dir.path().join("l");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert!(matches!(
            StatView::capture(&link, false).unwrap(),
            StatView::Symlink { .. }
        ));
        assert!(matches!(
            StatView::capture(&link, true).unwrap(),
            StatView::File { .. }
        ));
    }

    #[test]
    fn mode_renders_as_octal_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m");
        std::fs::write(&path, b"").unwrap();
        std::fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o640)).unwrap();
        match StatView::capture(&path, true).unwrap() {
            StatView::File { mode, .. } => assert_eq!(mode, "0o640"),
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn failure_shape_includes_op_and_path() {
        let r = OpResult::fail("unlink", Path::new("/tmp/x"), "gone");
        assert_eq!(r, OpResult::Failure("unlink /tmp/x: gone".into()));
        assert!(r.is_failure());
        assert!(!OpResult::Unit.is_failure());
    }
}
