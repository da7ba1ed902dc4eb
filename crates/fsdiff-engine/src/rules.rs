//! The rule registry.
//!
//! Every operation the engine can take is one explicit table entry:
//! a name, a precondition over the session, and a body that draws
//! arguments, dispatches to the dual executor and updates the pools.
//! The driver filters applicable rules and picks one uniformly; state
//! is implicit in pool contents. A body that cannot resolve its
//! arguments returns without executing anything (a skip, not a failure).

use crate::acl::{self, AclSpec};
use crate::admin::DumpOpts;
use crate::error::Result;
use crate::identity::Identity;
use crate::outcome::OpResult;
use crate::pool::{EntityTag, ROOT_SENTINEL};
use crate::session::Session;

pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&Session) -> bool,
    pub run: fn(&mut Session) -> Result<()>,
}

fn both_ok(pair: &(OpResult, OpResult)) -> bool {
    !pair.0.is_failure() && !pair.1.is_failure()
}

pub fn registry() -> Vec<Rule> {
    vec![
        Rule {
            name: "stat",
            applies: |s| s.enabled("stat"),
            run: stat,
        },
        Rule {
            name: "lstat",
            applies: |s| s.enabled("lstat"),
            run: lstat,
        },
        Rule {
            name: "exists",
            applies: |s| s.enabled("exists"),
            run: exists,
        },
        Rule {
            name: "open",
            applies: |s| s.enabled("open") && s.pool.has_files(),
            run: open,
        },
        Rule {
            name: "open2",
            applies: |s| s.enabled("open2") && s.pool.has_files(),
            run: open2,
        },
        Rule {
            name: "read",
            applies: |s| s.enabled("read") && s.pool.has_files(),
            run: read,
        },
        Rule {
            name: "write",
            applies: |s| s.enabled("write") && s.pool.has_files(),
            run: write,
        },
        Rule {
            name: "truncate",
            applies: |s| s.enabled("truncate") && s.pool.has_files(),
            run: truncate,
        },
        Rule {
            name: "fallocate",
            applies: |s| s.enabled("fallocate") && s.pool.has_files(),
            run: fallocate,
        },
        Rule {
            name: "copy_file_range",
            applies: |s| s.enabled("copy_file_range") && s.pool.has_files(),
            run: copy_file_range,
        },
        Rule {
            name: "create_file",
            applies: |s| s.enabled("create_file"),
            run: create_file,
        },
        Rule {
            name: "listdir",
            applies: |s| s.enabled("listdir"),
            run: listdir,
        },
        Rule {
            name: "unlink",
            applies: |s| s.enabled("unlink") && s.pool.has_files(),
            run: unlink,
        },
        Rule {
            name: "rename_file",
            applies: |s| s.enabled("rename_file") && s.pool.has_files(),
            run: rename_file,
        },
        Rule {
            name: "rename_dir",
            applies: |s| s.enabled("rename_dir") && s.pool.has_subfolders(),
            run: rename_dir,
        },
        Rule {
            name: "copy_file",
            applies: |s| s.enabled("copy_file") && s.pool.has_files(),
            run: copy_file,
        },
        Rule {
            name: "clone",
            applies: |s| s.enabled("clone"),
            run: clone_entry,
        },
        Rule {
            name: "mkdir",
            applies: |s| s.enabled("mkdir"),
            run: mkdir,
        },
        Rule {
            name: "rmdir",
            applies: |s| s.enabled("rmdir") && s.pool.has_subfolders(),
            run: rmdir,
        },
        Rule {
            name: "hardlink",
            applies: |s| s.enabled("hardlink") && s.pool.has_files(),
            run: hardlink,
        },
        Rule {
            name: "symlink",
            applies: |s| s.enabled("symlink"),
            run: symlink,
        },
        Rule {
            name: "loop_symlink",
            applies: |s| s.enabled("loop_symlink"),
            run: loop_symlink,
        },
        Rule {
            name: "readlink",
            applies: |s| s.enabled("readlink") && s.pool.has_files(),
            run: readlink,
        },
        Rule {
            name: "mkfifo",
            applies: |s| s.enabled("mkfifo"),
            run: mkfifo,
        },
        Rule {
            name: "set_xattr",
            applies: |s| s.enabled("set_xattr") && s.pool.has_files(),
            run: set_xattr,
        },
        Rule {
            name: "get_xattr",
            applies: |s| s.enabled("get_xattr") && s.pool.has_xattrs(),
            run: get_xattr,
        },
        Rule {
            name: "list_xattr",
            applies: |s| s.enabled("list_xattr"),
            run: list_xattr,
        },
        Rule {
            name: "remove_xattr",
            applies: |s| s.enabled("remove_xattr") && s.pool.has_xattrs(),
            run: remove_xattr,
        },
        Rule {
            name: "chmod",
            applies: |s| s.enabled("chmod"),
            run: chmod,
        },
        Rule {
            name: "chown",
            applies: |s| s.enabled("chown"),
            run: chown,
        },
        Rule {
            name: "utime",
            applies: |s| s.enabled("utime"),
            run: utime,
        },
        Rule {
            name: "change_groups",
            applies: |s| s.enabled("change_groups") && s.cfg.provision_users,
            run: |s| s.run_change_groups(),
        },
        Rule {
            name: "set_acl",
            applies: |s| s.enabled("set_acl") && s.acl_enabled,
            run: set_acl,
        },
        Rule {
            name: "get_acl",
            applies: |s| s.enabled("get_acl") && s.acl_enabled && s.pool.has_acls(),
            run: get_acl,
        },
        Rule {
            name: "remove_acl",
            applies: |s| s.enabled("remove_acl") && s.acl_enabled && s.pool.has_acls(),
            run: remove_acl,
        },
        Rule {
            name: "split_dir",
            applies: |s| s.enabled("split_dir") && s.admin_on(),
            run: split_dir,
        },
        Rule {
            name: "merge_dir",
            applies: |s| s.enabled("merge_dir") && s.admin_on(),
            run: merge_dir,
        },
        Rule {
            name: "rebalance_dir",
            applies: |s| s.enabled("rebalance_dir") && s.multizone() && s.pool.has_subfolders(),
            run: rebalance_dir,
        },
        Rule {
            name: "rebalance_file",
            applies: |s| s.enabled("rebalance_file") && s.multizone() && s.pool.has_files(),
            run: rebalance_file,
        },
        Rule {
            name: "info",
            applies: |s| s.enabled("info") && s.admin_on(),
            run: admin_info,
        },
        Rule {
            name: "rmr",
            applies: |s| s.enabled("rmr") && s.admin_on(),
            run: admin_rmr,
        },
        Rule {
            name: "fsck",
            applies: |s| s.enabled("fsck") && s.admin_on(),
            run: admin_fsck,
        },
        Rule {
            name: "gc",
            applies: |s| s.enabled("gc") && s.admin_on(),
            run: admin_gc,
        },
        Rule {
            name: "compact",
            applies: |s| s.enabled("compact") && s.admin_on(),
            run: admin_compact,
        },
        Rule {
            name: "admin_clone",
            applies: |s| s.enabled("admin_clone") && s.admin_on(),
            run: admin_clone,
        },
        Rule {
            name: "config",
            applies: |s| s.enabled("config") && s.admin_on(),
            run: admin_config,
        },
        Rule {
            name: "quota_set",
            applies: |s| s.enabled("quota_set") && s.admin_on() && s.pool.has_subfolders(),
            run: quota_set,
        },
        Rule {
            name: "quota_get",
            applies: |s| s.enabled("quota_get") && s.admin_on() && s.pool.has_subfolders(),
            run: quota_get,
        },
        Rule {
            name: "quota_list",
            applies: |s| s.enabled("quota_list") && s.admin_on(),
            run: quota_list,
        },
        Rule {
            name: "quota_delete",
            applies: |s| s.enabled("quota_delete") && s.admin_on() && s.pool.has_subfolders(),
            run: quota_delete,
        },
        Rule {
            name: "trash_list",
            applies: |s| s.enabled("trash_list") && s.admin_on(),
            run: trash_list,
        },
        Rule {
            name: "trash_restore",
            applies: |s| s.enabled("trash_restore") && s.admin_on(),
            run: trash_restore,
        },
        Rule {
            name: "dump_load_dump",
            applies: |s| s.enabled("dump_load_dump") && s.admin_on(),
            run: dump_load_dump,
        },
    ]
}

fn stat(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("stat", &path, &id, None, |fs| fs.stat(&path, true))?;
    Ok(())
}

fn lstat(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("lstat", &path, &id, None, |fs| fs.stat(&path, false))?;
    Ok(())
}

fn exists(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("exists", &path, &id, None, |fs| fs.exists(&path))?;
    Ok(())
}

fn open(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let flags = s.draws.open_flags();
    let mode = s.draws.mode();
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} flags={flags:#o} mode={mode:#o}");
    s.dual("open", &args, &id, Some(umask), |fs| fs.open(&path, flags, mode))?;
    Ok(())
}

fn open2(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let mode = s.draws.open_mode();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("open2", &format!("{path} {mode:?}"), &id, None, |fs| {
        fs.open2(&path, mode)
    })?;
    Ok(())
}

fn read(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let offset = s.draws.offset();
    let length = s.draws.length();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} off={offset} len={length}");
    s.dual("read", &args, &id, None, |fs| fs.read(&path, offset, length))?;
    Ok(())
}

fn write(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let offset = s.draws.offset();
    let whence = s.draws.whence();
    let content = s.draws.file_content();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} off={offset} whence={whence:?} len={}", content.len());
    s.dual("write", &args, &id, None, |fs| {
        fs.write(&path, offset, whence, &content)
    })?;
    Ok(())
}

fn truncate(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let size = s.draws.truncate_size();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("truncate", &format!("{path} size={size}"), &id, None, |fs| {
        fs.truncate(&path, size)
    })?;
    Ok(())
}

fn fallocate(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let offset = s.draws.offset();
    let length = s.draws.fallocate_length();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} off={offset} len={length}");
    s.dual("fallocate", &args, &id, None, |fs| {
        fs.fallocate(&path, offset, length, 0)
    })?;
    Ok(())
}

fn copy_file_range(s: &mut Session) -> Result<()> {
    let Some(src) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let Some(dst) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let off_in = s.draws.offset();
    let off_out = s.draws.offset();
    let length = s.draws.length();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{src} -> {dst} in={off_in} out={off_out} len={length}");
    s.dual("copy_file_range", &args, &id, None, |fs| {
        fs.copy_file_range(&src, &dst, off_in, off_out, length)
    })?;
    Ok(())
}

fn create_file(s: &mut Session) -> Result<()> {
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let path = s.child_path(&parent);
    let content = s.draws.file_content();
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} len={}", content.len());
    let pair = s.dual("create_file", &args, &id, Some(umask), |fs| {
        fs.create_file(&path, &content)
    })?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::File, &path);
    }
    Ok(())
}

fn listdir(s: &mut Session) -> Result<()> {
    let Some(dir) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("listdir", &dir, &id, None, |fs| fs.listdir(&dir))?;
    Ok(())
}

fn unlink(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let pair = s.dual("unlink", &path, &id, None, |fs| fs.unlink(&path))?;
    // a handle survives a failed destruction
    if both_ok(&pair) {
        s.pool.consume(EntityTag::File, &path);
    }
    Ok(())
}

fn rename_file(s: &mut Session) -> Result<()> {
    let Some(src) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let dst = s.child_path(&parent);
    if dst == src {
        return Ok(());
    }
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{src} -> {dst}");
    let pair = s.dual("rename_file", &args, &id, Some(umask), |fs| {
        fs.rename(&src, &dst)
    })?;
    if both_ok(&pair) {
        s.pool.consume(EntityTag::File, &src);
        s.pool.produce(EntityTag::File, &dst);
    }
    Ok(())
}

fn rename_dir(s: &mut Session) -> Result<()> {
    let Some(src) = s
        .pool
        .pick_with(EntityTag::Folder, s.draws.rng(), |p| p != ROOT_SENTINEL)
    else {
        return Ok(());
    };
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let dst = s.child_path(&parent);
    if dst == src {
        return Ok(());
    }
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{src} -> {dst}");
    let pair = s.dual("rename_dir", &args, &id, Some(umask), |fs| {
        fs.rename(&src, &dst)
    })?;
    if both_ok(&pair) {
        s.pool.consume(EntityTag::Folder, &src);
        s.pool.produce(EntityTag::Folder, &dst);
    }
    Ok(())
}

fn copy_file(s: &mut Session) -> Result<()> {
    let Some(src) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let dst = s.child_path(&parent);
    if dst == src {
        return Ok(());
    }
    let follow = s.draws.bool();
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{src} -> {dst} follow={follow}");
    let pair = s.dual("copy_file", &args, &id, Some(umask), |fs| {
        fs.copy_file(&src, &dst, follow)
    })?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::File, &dst);
    }
    Ok(())
}

fn clone_entry(s: &mut Session) -> Result<()> {
    let Some((tag, src)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    if src == ROOT_SENTINEL {
        return Ok(());
    }
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let dst = s.child_path(&parent);
    if dst == src {
        return Ok(());
    }
    let preserve = s.draws.bool();
    let umask = s.draws.umask();
    let Some(id) = s.pick_sudo_identity() else {
        return Ok(());
    };
    let args = format!("{src} -> {dst} preserve={preserve}");
    let pair = s.dual("clone", &args, &id, Some(umask), |fs| {
        fs.clone_entry(&src, &dst, preserve)
    })?;
    if both_ok(&pair) {
        s.pool.produce(tag, &dst);
    }
    Ok(())
}

fn mkdir(s: &mut Session) -> Result<()> {
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let path = s.child_path(&parent);
    let mode = s.draws.mode();
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} mode={mode:#o}");
    let pair = s.dual("mkdir", &args, &id, Some(umask), |fs| fs.mkdir(&path, mode))?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::Folder, &path);
    }
    Ok(())
}

fn rmdir(s: &mut Session) -> Result<()> {
    let Some(path) = s
        .pool
        .pick_with(EntityTag::Folder, s.draws.rng(), |p| p != ROOT_SENTINEL)
    else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let pair = s.dual("rmdir", &path, &id, None, |fs| fs.rmdir(&path))?;
    if both_ok(&pair) {
        s.pool.consume(EntityTag::Folder, &path);
    }
    Ok(())
}

fn hardlink(s: &mut Session) -> Result<()> {
    let Some(src) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let link = s.child_path(&parent);
    if link == src {
        return Ok(());
    }
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{src} <- {link}");
    let pair = s.dual("hardlink", &args, &id, Some(umask), |fs| {
        fs.hardlink(&src, &link)
    })?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::File, &link);
    }
    Ok(())
}

fn symlink(s: &mut Session) -> Result<()> {
    let Some((_, target)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let link = s.child_path(&parent);
    if link == target {
        return Ok(());
    }
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{target} <- {link}");
    let pair = s.dual("symlink", &args, &id, Some(umask), |fs| {
        fs.symlink(&target, &link)
    })?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::File, &link);
    }
    Ok(())
}

fn loop_symlink(s: &mut Session) -> Result<()> {
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let link = s.child_path(&parent);
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let pair = s.dual("loop_symlink", &link, &id, Some(umask), |fs| {
        fs.loop_symlink(&link)
    })?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::File, &link);
    }
    Ok(())
}

fn readlink(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("readlink", &path, &id, None, |fs| fs.readlink(&path))?;
    Ok(())
}

fn mkfifo(s: &mut Session) -> Result<()> {
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let path = s.child_path(&parent);
    let mode = s.draws.mode();
    let umask = s.draws.umask();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} mode={mode:#o}");
    let pair = s.dual("mkfifo", &args, &id, Some(umask), |fs| fs.mkfifo(&path, mode))?;
    if both_ok(&pair) {
        s.pool.produce(EntityTag::File, &path);
    }
    Ok(())
}

fn set_xattr(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let name = s.draws.xattr_name();
    let value = s.draws.xattr_value();
    let flag = s.draws.xattr_flag();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} {name} len={} flag={flag:?}", value.len());
    let pair = s.dual("set_xattr", &args, &id, None, |fs| {
        fs.set_xattr(&path, &name, &value, flag)
    })?;
    if both_ok(&pair) {
        s.pool.produce_xattr(&path, &name);
    }
    Ok(())
}

fn get_xattr(s: &mut Session) -> Result<()> {
    let Some(handle) = s.pool.pick_xattr(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{} {}", handle.path, handle.name);
    s.dual("get_xattr", &args, &id, None, |fs| {
        fs.get_xattr(&handle.path, &handle.name)
    })?;
    Ok(())
}

fn list_xattr(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    s.dual("list_xattr", &path, &id, None, |fs| fs.list_xattr(&path))?;
    Ok(())
}

fn remove_xattr(s: &mut Session) -> Result<()> {
    let Some(handle) = s.pool.pick_xattr(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{} {}", handle.path, handle.name);
    let pair = s.dual("remove_xattr", &args, &id, None, |fs| {
        fs.remove_xattr(&handle.path, &handle.name)
    })?;
    if both_ok(&pair) {
        s.pool.consume_xattr(&handle.path, &handle.name);
    }
    Ok(())
}

fn chmod(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let mode = s.draws.mode();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} mode={mode:#o}");
    s.dual("chmod", &args, &id, None, |fs| fs.chmod(&path, mode))?;
    Ok(())
}

fn chown(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(owner_name) = s.pick_user_name() else {
        return Ok(());
    };
    let Ok(owner) = Identity::resolve(&owner_name) else {
        return Ok(());
    };
    let Some(id) = s.pick_sudo_identity() else {
        return Ok(());
    };
    let args = format!("{path} owner={owner_name}");
    s.dual("chown", &args, &id, None, |fs| {
        fs.chown(&path, owner.uid, owner.gid)
    })?;
    Ok(())
}

fn utime(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let atime = s.draws.utime_secs();
    let mtime = s.draws.utime_secs();
    let follow = s.draws.bool();
    let Some(id) = s.pick_identity() else {
        return Ok(());
    };
    let args = format!("{path} atime={atime} mtime={mtime} follow={follow}");
    s.dual("utime", &args, &id, None, |fs| {
        fs.utime(&path, atime, mtime, follow)
    })?;
    Ok(())
}

fn set_acl(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let Some(user) = s.pick_user_name() else {
        return Ok(());
    };
    let Some(group) = s.pick_group_name() else {
        return Ok(());
    };
    let spec = AclSpec {
        user,
        user_perm: s.draws.perm_set(),
        group,
        group_perm: s.draws.perm_set(),
        other_perm: s.draws.perm_set(),
        mask: if s.draws.bool() {
            Some(s.draws.perm_set())
        } else {
            None
        },
        default_acl: s.draws.bool(),
        recursive: s.draws.bool(),
        recalc_mask: s.draws.bool(),
        no_recalc_mask: s.draws.bool(),
        logical: s.draws.bool(),
        physical: s.draws.bool(),
    };
    let Some(id) = s.pick_sudo_identity() else {
        return Ok(());
    };
    let args = format!("{path} {}", spec.entry());
    let pair = s.dual("set_acl", &args, &id, None, |fs| {
        acl::set_acl(&fs.abs(&path), &spec)
    })?;
    if both_ok(&pair) {
        s.pool.produce_acl(&path);
    }
    Ok(())
}

fn get_acl(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick_acl(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_sudo_identity() else {
        return Ok(());
    };
    s.dual("get_acl", &path, &id, None, |fs| acl::get_acl(&fs.abs(&path)))?;
    Ok(())
}

fn remove_acl(s: &mut Session) -> Result<()> {
    let Some(path) = s.pool.pick_acl(s.draws.rng()) else {
        return Ok(());
    };
    let Some(id) = s.pick_sudo_identity() else {
        return Ok(());
    };
    let pair = s.dual("remove_acl", &path, &id, None, |fs| {
        acl::remove_acl(&fs.abs(&path))
    })?;
    if both_ok(&pair) {
        s.pool.consume_acl(&path);
    }
    Ok(())
}

fn split_dir(s: &mut Session) -> Result<()> {
    let Some(dir) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let vdirs = s.draws.vdirs();
    s.dual_unchecked("split_dir", &format!("{dir} vdirs={vdirs}"), |fs| {
        fs.split_dir(&dir, vdirs)
    });
    Ok(())
}

fn merge_dir(s: &mut Session) -> Result<()> {
    let Some(dir) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    s.dual_unchecked("merge_dir", &dir, |fs| fs.merge_dir(&dir));
    Ok(())
}

fn rebalance_dir(s: &mut Session) -> Result<()> {
    let Some(dir) = s
        .pool
        .pick_with(EntityTag::Folder, s.draws.rng(), |p| p != ROOT_SENTINEL)
    else {
        return Ok(());
    };
    let zones_a = s.exec.a.zones();
    let zones_b = s.exec.b.zones();
    let Some(zone_a) = s.draws.pick(&zones_a).cloned() else {
        return Ok(());
    };
    let Some(zone_b) = s.draws.pick(&zones_b).cloned() else {
        return Ok(());
    };
    let is_vdir = s.draws.bool();
    s.dual_zoned("rebalance_dir", &dir, &zone_a, &zone_b, |fs, zone| {
        fs.rebalance(&dir, zone, is_vdir)
    });
    Ok(())
}

fn rebalance_file(s: &mut Session) -> Result<()> {
    let Some(file) = s.pool.pick(EntityTag::File, s.draws.rng()) else {
        return Ok(());
    };
    let zones_a = s.exec.a.zones();
    let zones_b = s.exec.b.zones();
    let Some(zone_a) = s.draws.pick(&zones_a).cloned() else {
        return Ok(());
    };
    let Some(zone_b) = s.draws.pick(&zones_b).cloned() else {
        return Ok(());
    };
    s.dual_zoned("rebalance_file", &file, &zone_a, &zone_b, |fs, zone| {
        fs.rebalance(&file, zone, false)
    });
    Ok(())
}

fn admin_info(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let recursive = s.draws.bool();
    let args = format!("{path} recursive={recursive}");
    s.dual_admin("info", &args, |ops| ops.info(&path, true, recursive, true))?;
    Ok(())
}

fn admin_rmr(s: &mut Session) -> Result<()> {
    let Some((tag, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    if path == ROOT_SENTINEL {
        return Ok(());
    }
    let pair = s.dual_admin("rmr", &path, |ops| ops.rmr(&path))?;
    if both_ok(&pair) {
        s.pool.consume(tag, &path);
    }
    Ok(())
}

fn admin_fsck(s: &mut Session) -> Result<()> {
    let path = if s.draws.bool() {
        s.pool.pick_any(s.draws.rng()).map(|(_, p)| p)
    } else {
        None
    };
    let repair = s.draws.bool();
    let recursive = s.draws.bool();
    let args = format!("path={path:?} repair={repair} recursive={recursive}");
    s.dual_admin("fsck", &args, |ops| {
        ops.fsck(path.as_deref(), repair, recursive)
    })?;
    Ok(())
}

fn admin_gc(s: &mut Session) -> Result<()> {
    let compact = s.draws.bool();
    let delete = s.draws.bool();
    let args = format!("compact={compact} delete={delete}");
    s.dual_admin("gc", &args, |ops| ops.gc(compact, delete))?;
    Ok(())
}

fn admin_compact(s: &mut Session) -> Result<()> {
    let Some((_, path)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    let threads = s.draws.threads();
    s.dual_admin("compact", &path, |ops| ops.compact(&path, threads))?;
    Ok(())
}

fn admin_clone(s: &mut Session) -> Result<()> {
    let Some((tag, src)) = s.pool.pick_any(s.draws.rng()) else {
        return Ok(());
    };
    if src == ROOT_SENTINEL {
        return Ok(());
    }
    let Some(parent) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let dst = s.child_path(&parent);
    if dst == src {
        return Ok(());
    }
    let preserve = s.draws.bool();
    let args = format!("{src} -> {dst} preserve={preserve}");
    let pair = s.dual_admin("admin_clone", &args, |ops| {
        ops.clone_entry(&src, &dst, preserve)
    })?;
    if both_ok(&pair) {
        s.pool.produce(tag, &dst);
    }
    Ok(())
}

fn admin_config(s: &mut Session) -> Result<()> {
    let capacity = s.draws.small_count();
    let inodes = s.draws.small_count();
    let trash_days = s.draws.small_count() as u32;
    let enable_acl = s.draws.bool();
    let encrypt_secret = s.draws.bool();
    let args = format!("capacity={capacity} inodes={inodes} trash_days={trash_days}");
    s.dual_admin("config", &args, |ops| {
        ops.config(capacity, inodes, trash_days, enable_acl, encrypt_secret, true, true)
    })?;
    Ok(())
}

fn quota_set(s: &mut Session) -> Result<()> {
    let Some(path) = s
        .pool
        .pick_with(EntityTag::Folder, s.draws.rng(), |p| p != ROOT_SENTINEL)
    else {
        return Ok(());
    };
    let capacity = s.draws.bool().then(|| s.draws.small_count());
    let inodes = s.draws.bool().then(|| s.draws.small_count());
    let args = format!("{path} capacity={capacity:?} inodes={inodes:?}");
    s.dual_admin("quota_set", &args, |ops| ops.quota_set(&path, capacity, inodes))?;
    Ok(())
}

fn quota_get(s: &mut Session) -> Result<()> {
    let Some(path) = s
        .pool
        .pick_with(EntityTag::Folder, s.draws.rng(), |p| p != ROOT_SENTINEL)
    else {
        return Ok(());
    };
    s.dual_admin("quota_get", &path, |ops| ops.quota_get(&path))?;
    Ok(())
}

fn quota_list(s: &mut Session) -> Result<()> {
    s.dual_admin("quota_list", "", |ops| ops.quota_list())?;
    Ok(())
}

fn quota_delete(s: &mut Session) -> Result<()> {
    let Some(path) = s
        .pool
        .pick_with(EntityTag::Folder, s.draws.rng(), |p| p != ROOT_SENTINEL)
    else {
        return Ok(());
    };
    s.dual_admin("quota_delete", &path, |ops| ops.quota_delete(&path))?;
    Ok(())
}

fn trash_list(s: &mut Session) -> Result<()> {
    s.dual_admin("trash_list", "", |ops| ops.trash_list())?;
    Ok(())
}

fn trash_restore(s: &mut Session) -> Result<()> {
    let entries = match &s.admin {
        Some((a, _)) => a.trash_entries(),
        None => return Ok(()),
    };
    let Some(entry) = s.draws.pick(&entries).cloned() else {
        return Ok(());
    };
    let put_back = s.draws.bool();
    let args = format!("{entry} put_back={put_back}");
    s.dual_admin("trash_restore", &args, |ops| {
        ops.trash_restore(&entry, put_back)
    })?;
    Ok(())
}

fn dump_load_dump(s: &mut Session) -> Result<()> {
    let Some(dir) = s.pool.pick(EntityTag::Folder, s.draws.rng()) else {
        return Ok(());
    };
    let opts = DumpOpts {
        fast: s.draws.bool(),
        skip_trash: s.draws.bool(),
        threads: s.draws.threads(),
    };
    let subdir = if dir.is_empty() { None } else { Some(dir.clone()) };
    s.dual_admin("dump_load_dump", &dir, |ops| {
        ops.dump_load_dump(subdir.as_deref(), opts)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn session_with(seed: u64) -> (tempfile::TempDir, tempfile::TempDir, Session) {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::new(a.path(), b.path());
        cfg.seed = seed;
        let s = Session::new(cfg).unwrap();
        (a, b, s)
    }

    #[test]
    fn registry_names_are_unique() {
        let rules = registry();
        let mut names: Vec<&str> = rules.iter().map(|r| r.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn admin_rules_need_an_admin_surface() {
        let (_a, _b, s) = session_with(1);
        for rule in registry() {
            if ["info", "rmr", "fsck", "gc", "compact", "admin_clone", "config", "dump_load_dump"]
                .contains(&rule.name)
            {
                assert!(!(rule.applies)(&s), "{} should be gated", rule.name);
            }
        }
    }

    #[test]
    fn consuming_rules_need_their_pool() {
        let (_a, _b, s) = session_with(2);
        let rules = registry();
        for name in ["read", "write", "unlink", "rename_file", "rmdir", "get_xattr"] {
            let rule = rules.iter().find(|r| r.name == name).unwrap();
            assert!(!(rule.applies)(&s), "{name} should wait for entities");
        }
        for name in ["stat", "create_file", "mkdir", "listdir", "exists"] {
            let rule = rules.iter().find(|r| r.name == name).unwrap();
            assert!((rule.applies)(&s), "{name} should always apply");
        }
    }

    #[test]
    fn excluded_ops_never_apply() {
        let (_a, _b, s) = session_with(3);
        let rules = registry();
        let utime = rules.iter().find(|r| r.name == "utime").unwrap();
        // excluded by the default profile
        assert!(!(utime.applies)(&s));
    }

    #[test]
    fn create_file_produces_a_live_handle() {
        let (_a, _b, mut s) = session_with(4);
        create_file(&mut s).unwrap();
        assert!(s.pool.has_files());
        assert_eq!(s.stats().get("create_file").success, 2);
    }

    #[test]
    fn unlink_consumes_only_on_success() {
        let (_a, _b, mut s) = session_with(5);
        create_file(&mut s).unwrap();
        assert!(s.pool.has_files());
        unlink(&mut s).unwrap();
        assert!(!s.pool.has_files());
    }

    #[test]
    fn mkdir_then_rmdir_round_trip() {
        let (_a, _b, mut s) = session_with(6);
        mkdir(&mut s).unwrap();
        assert!(s.pool.has_subfolders());
        rmdir(&mut s).unwrap();
        assert!(!s.pool.has_subfolders());
    }

    #[test]
    fn rename_moves_the_handle() {
        let (_a, _b, mut s) = session_with(7);
        create_file(&mut s).unwrap();
        let before = s.pool.pick(EntityTag::File, s.draws.rng()).unwrap();
        rename_file(&mut s).unwrap();
        let after = s.pool.pick(EntityTag::File, s.draws.rng()).unwrap();
        // either the rename was skipped (same path drawn) or the handle moved
        if s.stats().get("rename_file").success == 2 {
            assert_ne!(before, after);
        }
    }

    #[test]
    fn set_xattr_tracks_the_attribute() {
        let (_a, _b, mut s) = session_with(8);
        create_file(&mut s).unwrap();
        set_xattr(&mut s).unwrap();
        // xattrs may be unsupported on the test filesystem
        if s.stats().get("set_xattr").success == 2 {
            assert!(s.pool.has_xattrs());
            get_xattr(&mut s).unwrap();
            remove_xattr(&mut s).unwrap();
            assert!(!s.pool.has_xattrs());
        }
    }

    #[test]
    fn symlink_and_readlink_agree() {
        let (_a, _b, mut s) = session_with(9);
        create_file(&mut s).unwrap();
        symlink(&mut s).unwrap();
        readlink(&mut s).unwrap();
    }

    #[test]
    fn mixed_sequence_never_diverges_on_identical_roots() {
        let (_a, _b, mut s) = session_with(10);
        for _ in 0..8 {
            create_file(&mut s).unwrap();
            mkdir(&mut s).unwrap();
        }
        for _ in 0..40 {
            write(&mut s).unwrap();
            read(&mut s).unwrap();
            truncate(&mut s).unwrap();
            stat(&mut s).unwrap();
            lstat(&mut s).unwrap();
            listdir(&mut s).unwrap();
            copy_file(&mut s).unwrap();
            hardlink(&mut s).unwrap();
            chmod(&mut s).unwrap();
        }
    }
}
