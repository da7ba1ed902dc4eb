//! Per-root filesystem operations and the dual executor.
//!
//! `RootFs` performs the actual syscalls against one root; every path it
//! takes is relative to that root. Offsets are reduced modulo the live
//! file size here, at execution time. POSIX failures become
//! `OpResult::Failure`; only engine bugs surface as errors.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Result;
use crate::identity::{Identity, IdentityGuard, UmaskGuard};
use crate::outcome::OpResult;
use crate::strategy::{OpenMode, Whence, XattrFlag};

/// One side of the root pair.
pub struct RootFs {
    label: String,
    root: PathBuf,
    control_files: Vec<String>,
}

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

fn cstr(s: &str) -> io::Result<CString> {
    CString::new(s).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string contains NUL"))
}

/// Offsets wrap around the live size; an empty file pins them to zero.
pub fn wrap_offset(size: u64, offset: u64) -> u64 {
    if size == 0 {
        0
    } else {
        offset % size
    }
}

impl RootFs {
    pub fn new(label: impl Into<String>, root: impl Into<PathBuf>, control_files: Vec<String>) -> Self {
        RootFs {
            label: label.into(),
            root: root.into(),
            control_files,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative handle; the empty string is the root itself.
    pub fn abs(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn live_size(&self, path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn stat(&self, rel: &str, follow: bool) -> OpResult {
        let path = self.abs(rel);
        let op = if follow { "stat" } else { "lstat" };
        OpResult::stat_of(op, &path, follow)
    }

    pub fn exists(&self, rel: &str) -> OpResult {
        OpResult::Bool(std::fs::metadata(self.abs(rel)).is_ok())
    }

    pub fn open(&self, rel: &str, flags: libc::c_int, mode: u32) -> OpResult {
        let path = self.abs(rel);
        let cp = match cpath(&path) {
            Ok(c) => c,
            Err(e) => return OpResult::fail("open", &path, e),
        };
        let fd = unsafe { libc::open(cp.as_ptr(), flags, mode as libc::c_uint) };
        if fd < 0 {
            return OpResult::fail("open", &path, io::Error::last_os_error());
        }
        unsafe { libc::close(fd) };
        OpResult::stat_of("open", &path, false)
    }

    pub fn open2(&self, rel: &str, mode: OpenMode) -> OpResult {
        let path = self.abs(rel);
        let mut opts = OpenOptions::new();
        match mode {
            OpenMode::Read => opts.read(true),
            OpenMode::ReadPlus => opts.read(true).write(true),
            OpenMode::Write => opts.write(true).create(true).truncate(true),
            OpenMode::WritePlus => opts.read(true).write(true).create(true).truncate(true),
            OpenMode::Append => opts.append(true).create(true),
            OpenMode::AppendPlus => opts.read(true).append(true).create(true),
        };
        match opts.open(&path) {
            Ok(_) => OpResult::stat_of("open2", &path, false),
            Err(e) => OpResult::fail("open2", &path, e),
        }
    }

    /// Read up to `length` bytes at the wrapped offset, reported as a
    /// content digest to bound memory on large payloads.
    pub fn read(&self, rel: &str, offset: u64, length: u64) -> OpResult {
        let path = self.abs(rel);
        let offset = wrap_offset(self.live_size(&path), offset);
        let run = || -> io::Result<String> {
            let mut f = File::open(&path)?;
            f.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::new();
            f.take(length).read_to_end(&mut buf)?;
            Ok(blake3::hash(&buf).to_hex().to_string())
        };
        match run() {
            Ok(digest) => OpResult::Digest(digest),
            Err(e) => OpResult::fail("read", &path, e),
        }
    }

    pub fn write(&self, rel: &str, offset: u64, whence: Whence, data: &[u8]) -> OpResult {
        let path = self.abs(rel);
        let offset = wrap_offset(self.live_size(&path), offset);
        let run = || -> io::Result<()> {
            let mut f = OpenOptions::new().write(true).open(&path)?;
            let from = match whence {
                Whence::Set => SeekFrom::Start(offset),
                Whence::Cur => SeekFrom::Current(offset as i64),
                Whence::End => SeekFrom::End(offset as i64),
            };
            f.seek(from)?;
            f.write_all(data)
        };
        match run() {
            Ok(()) => OpResult::stat_of("write", &path, false),
            Err(e) => OpResult::fail("write", &path, e),
        }
    }

    pub fn truncate(&self, rel: &str, size: u64) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<()> {
            let f = OpenOptions::new().write(true).truncate(true).open(&path)?;
            f.set_len(size)
        };
        match run() {
            Ok(()) => OpResult::stat_of("truncate", &path, false),
            Err(e) => OpResult::fail("truncate", &path, e),
        }
    }

    pub fn fallocate(&self, rel: &str, offset: u64, length: u64, mode: libc::c_int) -> OpResult {
        let path = self.abs(rel);
        let offset = wrap_offset(self.live_size(&path), offset);
        let run = || -> io::Result<()> {
            let f = OpenOptions::new().read(true).write(true).open(&path)?;
            let rc = unsafe {
                libc::fallocate(
                    f.as_raw_fd(),
                    mode,
                    offset as libc::off_t,
                    length as libc::off_t,
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        };
        match run() {
            Ok(()) => OpResult::stat_of("fallocate", &path, false),
            Err(e) => OpResult::fail("fallocate", &path, e),
        }
    }

    pub fn copy_file_range(
        &self,
        src: &str,
        dst: &str,
        off_in: u64,
        off_out: u64,
        length: u64,
    ) -> OpResult {
        let src_path = self.abs(src);
        let dst_path = self.abs(dst);
        let off_in = wrap_offset(self.live_size(&src_path), off_in);
        let off_out = wrap_offset(self.live_size(&dst_path), off_out);
        let run = || -> io::Result<u64> {
            let fin = File::open(&src_path)?;
            let fout = OpenOptions::new().write(true).open(&dst_path)?;
            let mut oin = off_in as libc::off64_t;
            let mut oout = off_out as libc::off64_t;
            let copied = unsafe {
                libc::copy_file_range(
                    fin.as_raw_fd(),
                    &mut oin,
                    fout.as_raw_fd(),
                    &mut oout,
                    length as libc::size_t,
                    0,
                )
            };
            if copied < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(copied as u64)
        };
        match run() {
            Ok(_) => OpResult::stat_of("copy_file_range", &dst_path, false),
            Err(e) => OpResult::fail2("copy_file_range", &src_path, &dst_path, e),
        }
    }

    pub fn create_file(&self, rel: &str, content: &[u8]) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<()> {
            let mut f = File::create(&path)?;
            f.write_all(content)
        };
        match run() {
            Ok(()) => OpResult::stat_of("create_file", &path, false),
            Err(e) => OpResult::fail("create_file", &path, e),
        }
    }

    pub fn mkfifo(&self, rel: &str, mode: u32) -> OpResult {
        let path = self.abs(rel);
        let cp = match cpath(&path) {
            Ok(c) => c,
            Err(e) => return OpResult::fail("mkfifo", &path, e),
        };
        if unsafe { libc::mkfifo(cp.as_ptr(), mode as libc::mode_t) } != 0 {
            return OpResult::fail("mkfifo", &path, io::Error::last_os_error());
        }
        OpResult::stat_of("mkfifo", &path, false)
    }

    /// Sorted listing with control files filtered out.
    pub fn listdir(&self, rel: &str) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<Vec<String>> {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if !self.control_files.iter().any(|c| c == &name) {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        };
        match run() {
            Ok(names) => OpResult::Listing(names),
            Err(e) => OpResult::fail("listdir", &path, e),
        }
    }

    pub fn unlink(&self, rel: &str) -> OpResult {
        let path = self.abs(rel);
        match std::fs::remove_file(&path) {
            Ok(()) => OpResult::Unit,
            Err(e) => OpResult::fail("unlink", &path, e),
        }
    }

    pub fn rmdir(&self, rel: &str) -> OpResult {
        let path = self.abs(rel);
        match std::fs::remove_dir(&path) {
            Ok(()) => OpResult::Unit,
            Err(e) => OpResult::fail("rmdir", &path, e),
        }
    }

    pub fn mkdir(&self, rel: &str, mode: u32) -> OpResult {
        let path = self.abs(rel);
        let cp = match cpath(&path) {
            Ok(c) => c,
            Err(e) => return OpResult::fail("mkdir", &path, e),
        };
        if unsafe { libc::mkdir(cp.as_ptr(), mode as libc::mode_t) } != 0 {
            return OpResult::fail("mkdir", &path, io::Error::last_os_error());
        }
        OpResult::stat_of("mkdir", &path, false)
    }

    pub fn rename(&self, src: &str, dst: &str) -> OpResult {
        let src_path = self.abs(src);
        let dst_path = self.abs(dst);
        match std::fs::rename(&src_path, &dst_path) {
            Ok(()) => OpResult::stat_of("rename", &dst_path, false),
            Err(e) => OpResult::fail2("rename", &src_path, &dst_path, e),
        }
    }

    pub fn hardlink(&self, src: &str, link: &str) -> OpResult {
        let src_path = self.abs(src);
        let link_path = self.abs(link);
        match std::fs::hard_link(&src_path, &link_path) {
            Ok(()) => OpResult::stat_of("hardlink", &link_path, false),
            Err(e) => OpResult::fail2("hardlink", &src_path, &link_path, e),
        }
    }

    /// Symlinks are created with a target relative to the link's parent,
    /// so the link text is identical on both roots.
    pub fn symlink(&self, target: &str, link: &str) -> OpResult {
        let link_path = self.abs(link);
        let rel_target = relative_target(target, link);
        match std::os::unix::fs::symlink(&rel_target, &link_path) {
            Ok(()) => OpResult::stat_of("symlink", &link_path, false),
            Err(e) => OpResult::fail("symlink", &link_path, e),
        }
    }

    /// A symlink pointing at its own name.
    pub fn loop_symlink(&self, link: &str) -> OpResult {
        let link_path = self.abs(link);
        let name = link.rsplit('/').next().unwrap_or(link).to_string();
        match std::os::unix::fs::symlink(&name, &link_path) {
            Ok(()) => OpResult::stat_of("loop_symlink", &link_path, false),
            Err(e) => OpResult::fail("loop_symlink", &link_path, e),
        }
    }

    pub fn readlink(&self, rel: &str) -> OpResult {
        let path = self.abs(rel);
        match std::fs::read_link(&path) {
            Ok(target) => OpResult::Text(target.to_string_lossy().into_owned()),
            Err(e) => OpResult::fail("readlink", &path, e),
        }
    }

    pub fn chmod(&self, rel: &str, mode: u32) -> OpResult {
        let path = self.abs(rel);
        match std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)) {
            Ok(()) => OpResult::stat_of("chmod", &path, false),
            Err(e) => OpResult::fail("chmod", &path, e),
        }
    }

    pub fn chown(&self, rel: &str, uid: u32, gid: u32) -> OpResult {
        let path = self.abs(rel);
        match std::os::unix::fs::chown(&path, Some(uid), Some(gid)) {
            Ok(()) => OpResult::stat_of("chown", &path, false),
            Err(e) => OpResult::fail("chown", &path, e),
        }
    }

    pub fn utime(&self, rel: &str, atime: i64, mtime: i64, follow: bool) -> OpResult {
        let path = self.abs(rel);
        let cp = match cpath(&path) {
            Ok(c) => c,
            Err(e) => return OpResult::fail("utime", &path, e),
        };
        let times = [
            libc::timespec {
                tv_sec: atime,
                tv_nsec: 0,
            },
            libc::timespec {
                tv_sec: mtime,
                tv_nsec: 0,
            },
        ];
        let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
        let rc = unsafe { libc::utimensat(libc::AT_FDCWD, cp.as_ptr(), times.as_ptr(), flags) };
        if rc != 0 {
            return OpResult::fail("utime", &path, io::Error::last_os_error());
        }
        OpResult::stat_of("utime", &path, follow)
    }

    /// Set, then read back; success reports the stored value.
    pub fn set_xattr(&self, rel: &str, name: &str, value: &[u8], flag: XattrFlag) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<Vec<u8>> {
            let cp = cpath(&path)?;
            let cn = cstr(name)?;
            let rc = unsafe {
                libc::setxattr(
                    cp.as_ptr(),
                    cn.as_ptr(),
                    value.as_ptr() as *const libc::c_void,
                    value.len(),
                    flag.to_raw(),
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            read_xattr(&cp, &cn)
        };
        match run() {
            Ok(stored) => OpResult::Bytes(stored),
            Err(e) => OpResult::fail("set_xattr", &path, e),
        }
    }

    pub fn get_xattr(&self, rel: &str, name: &str) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<Vec<u8>> {
            let cp = cpath(&path)?;
            let cn = cstr(name)?;
            read_xattr(&cp, &cn)
        };
        match run() {
            Ok(value) => OpResult::Bytes(value),
            Err(e) => OpResult::fail("get_xattr", &path, e),
        }
    }

    /// All (name, value) pairs, sorted by name.
    pub fn list_xattr(&self, rel: &str) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<Vec<(String, Vec<u8>)>> {
            let cp = cpath(&path)?;
            let mut pairs = Vec::new();
            for name in list_xattr_names(&cp)? {
                let cn = cstr(&name)?;
                let value = read_xattr(&cp, &cn)?;
                pairs.push((name, value));
            }
            pairs.sort();
            Ok(pairs)
        };
        match run() {
            Ok(pairs) => OpResult::Pairs(pairs),
            Err(e) => OpResult::fail("list_xattr", &path, e),
        }
    }

    pub fn remove_xattr(&self, rel: &str, name: &str) -> OpResult {
        let path = self.abs(rel);
        let run = || -> io::Result<()> {
            let cp = cpath(&path)?;
            let cn = cstr(name)?;
            if unsafe { libc::removexattr(cp.as_ptr(), cn.as_ptr()) } != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        };
        match run() {
            Ok(()) => OpResult::Unit,
            Err(e) => OpResult::fail("remove_xattr", &path, e),
        }
    }

    pub fn copy_file(&self, src: &str, dst: &str, follow_symlinks: bool) -> OpResult {
        let src_path = self.abs(src);
        let dst_path = self.abs(dst);
        let run = || -> io::Result<()> {
            let src_meta = std::fs::symlink_metadata(&src_path)?;
            if !follow_symlinks && src_meta.file_type().is_symlink() {
                let target = std::fs::read_link(&src_path)?;
                std::os::unix::fs::symlink(&target, &dst_path)?;
            } else {
                std::fs::copy(&src_path, &dst_path)?;
            }
            Ok(())
        };
        match run() {
            Ok(()) => OpResult::stat_of("copy_file", &dst_path, false),
            Err(e) => OpResult::fail2("copy_file", &src_path, &dst_path, e),
        }
    }

    /// Clone via the external `cp` tool; `preserve` carries mode,
    /// ownership and timestamps across.
    pub fn clone_entry(&self, src: &str, dst: &str, preserve: bool) -> OpResult {
        let src_path = self.abs(src);
        let dst_path = self.abs(dst);
        let mut cmd = Command::new("cp");
        cmd.arg("-rL");
        if preserve {
            cmd.arg("--preserve=all");
        }
        cmd.arg(&src_path).arg(&dst_path);
        match cmd.output() {
            Ok(out) if out.status.success() => OpResult::stat_of("clone", &dst_path, false),
            Ok(out) => OpResult::fail2(
                "clone",
                &src_path,
                &dst_path,
                String::from_utf8_lossy(&out.stderr).trim(),
            ),
            Err(e) => OpResult::fail2("clone", &src_path, &dst_path, e),
        }
    }

    /// Every relative path under the root, sorted, control files
    /// filtered at any depth. Used by the post-run sweep.
    pub fn tree(&self) -> OpResult {
        let mut paths = Vec::new();
        let root = self.root.clone();
        match self.walk(&root, &mut paths) {
            Ok(()) => {
                paths.sort();
                OpResult::Listing(paths)
            }
            Err(e) => OpResult::fail("tree", &self.root, e),
        }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.control_files.iter().any(|c| c == &name) {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            out.push(rel);
            if entry.file_type()?.is_dir() {
                self.walk(&path, out)?;
            }
        }
        Ok(())
    }

    /// Multi-zone probe: `.jfszoneN` directories at the root. Empty means
    /// the root is single-zone.
    pub fn zones(&self) -> Vec<String> {
        let mut zones = Vec::new();
        for i in 0..8 {
            let name = format!(".jfszone{i}");
            if self.root.join(&name).exists() {
                zones.push(name);
            }
        }
        zones
    }

    pub fn is_single_zone(&self) -> bool {
        self.zones().is_empty()
    }

    /// Ask the store to split a directory by touching its control file.
    /// Fire and forget, results are never compared across roots.
    pub fn split_dir(&self, dir: &str, vdirs: u32) -> OpResult {
        self.touch_control(dir, &format!(".jfs_split#{vdirs}"))
    }

    pub fn merge_dir(&self, dir: &str) -> OpResult {
        self.touch_control(dir, ".jfs_split#1")
    }

    fn touch_control(&self, dir: &str, name: &str) -> OpResult {
        let path = self.abs(dir).join(name);
        match File::create(&path) {
            Ok(_) => OpResult::Unit,
            Err(e) => OpResult::fail("touch", &path, e),
        }
    }

    /// Move an entry into a zone directory. Zones may differ per root, so
    /// this is also never oracle-compared.
    pub fn rebalance(&self, entry: &str, zone: &str, is_vdir: bool) -> OpResult {
        let mut src_path = self.abs(entry);
        if is_vdir {
            let vdir = src_path.join(".jfs#1");
            if vdir.is_file() {
                src_path = vdir;
            }
        }
        let base = match src_path.file_name() {
            Some(name) => name.to_os_string(),
            None => return OpResult::fail("rebalance", &src_path, "no basename"),
        };
        let dest = self.root.join(zone).join(base);
        match std::fs::rename(&src_path, &dest) {
            Ok(()) => OpResult::Unit,
            Err(e) => OpResult::fail2("rebalance", &src_path, &dest, e),
        }
    }
}

fn read_xattr(cp: &CString, cn: &CString) -> io::Result<Vec<u8>> {
    let size = unsafe { libc::getxattr(cp.as_ptr(), cn.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut buf = vec![0u8; size as usize];
    let got = unsafe {
        libc::getxattr(
            cp.as_ptr(),
            cn.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if got < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(got as usize);
    Ok(buf)
}

fn list_xattr_names(cp: &CString) -> io::Result<Vec<String>> {
    let size = unsafe { libc::listxattr(cp.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut buf = vec![0u8; size as usize];
    let got = unsafe { libc::listxattr(cp.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if got < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(got as usize);
    Ok(buf
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect())
}

/// Relative path from the link's parent directory to the target, both
/// given as clean root-relative paths.
pub fn relative_target(target: &str, link: &str) -> String {
    let link_dir: Vec<&str> = match link.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let target_parts: Vec<&str> = if target.is_empty() {
        Vec::new()
    } else {
        target.split('/').collect()
    };
    let common = link_dir
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..link_dir.len() {
        parts.push("..".to_string());
    }
    for part in &target_parts[common..] {
        parts.push((*part).to_string());
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Runs one logical operation against both roots under the same identity
/// and umask, root_a first, and reports the raw pair. Judging equivalence
/// is the oracle's job.
pub struct DualExecutor {
    pub a: RootFs,
    pub b: RootFs,
}

impl DualExecutor {
    pub fn new(a: RootFs, b: RootFs) -> Self {
        DualExecutor { a, b }
    }

    pub fn run<F>(&self, f: F) -> (OpResult, OpResult)
    where
        F: Fn(&RootFs) -> OpResult,
    {
        (f(&self.a), f(&self.b))
    }

    pub fn run_as<F>(
        &self,
        identity: &Identity,
        umask: Option<u32>,
        f: F,
    ) -> Result<(OpResult, OpResult)>
    where
        F: Fn(&RootFs) -> OpResult,
    {
        let ra = self.run_one(&self.a, identity, umask, &f)?;
        let rb = self.run_one(&self.b, identity, umask, &f)?;
        Ok((ra, rb))
    }

    fn run_one<F>(
        &self,
        root: &RootFs,
        identity: &Identity,
        umask: Option<u32>,
        f: &F,
    ) -> Result<OpResult>
    where
        F: Fn(&RootFs) -> OpResult,
    {
        let _umask = umask.map(UmaskGuard::set);
        let _id = IdentityGuard::switch(identity)?;
        Ok(f(root))
    }
}
