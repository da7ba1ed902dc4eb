//! Session lifecycle and the driver loop.
//!
//! `Session::new` sets both roots up, `run` drives the rule registry for
//! the step budget, `report` serializes the statistics. All engine state
//! lives here and is passed by reference to the rules; there are no
//! process-wide singletons.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::acl;
use crate::admin::AdminOps;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::exec::{DualExecutor, RootFs};
use crate::identity::{self, Identity};
use crate::oplog::{OpLog, Side};
use crate::oracle::Oracle;
use crate::outcome::OpResult;
use crate::pool::EntityPool;
use crate::rules;
use crate::stats::Statistics;
use crate::strategy::Draws;

pub struct Session {
    pub(crate) cfg: EngineConfig,
    pub(crate) draws: Draws,
    pub(crate) pool: EntityPool,
    pub(crate) exec: DualExecutor,
    pub(crate) oracle: Oracle,
    pub(crate) stats: Statistics,
    pub(crate) oplog: OpLog,
    pub(crate) admin: Option<(AdminOps, AdminOps)>,
    pub(crate) acl_enabled: bool,
    step: usize,
}

/// Remove the children of `root` rather than the directory itself, so a
/// root that is a mount point survives cleaning.
fn clean_dir(root: &Path) -> io::Result<()> {
    std::fs::create_dir_all(root)?;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

impl Session {
    pub fn new(mut cfg: EngineConfig) -> Result<Session> {
        cfg.validate()?;
        if identity::effective_uid() != 0 {
            // Without privilege every op runs as the invoking user.
            let me = identity::current_user_name().unwrap_or_else(|| "root".to_string());
            tracing::info!(user = %me, "running unprivileged, collapsing simulated users");
            cfg.users = vec![me.clone()];
            cfg.sudo_users = vec![me];
            cfg.provision_users = false;
        }
        if cfg.clean_roots {
            clean_dir(&cfg.root_a)?;
            clean_dir(&cfg.root_b)?;
        }
        if cfg.provision_users {
            identity::provision(&cfg.users, &cfg.groups);
        }
        let oplog = match &cfg.log_dir {
            Some(dir) => OpLog::open(dir)?,
            None => OpLog::disabled(),
        };
        let exec = DualExecutor::new(
            RootFs::new("a", cfg.root_a.clone(), cfg.control_files.clone()),
            RootFs::new("b", cfg.root_b.clone(), cfg.control_files.clone()),
        );
        let oracle = Oracle::new(&cfg.root_a, &cfg.root_b, cfg.generate_baseline);
        let admin = match (&cfg.admin_a, &cfg.admin_b) {
            (Some(a), Some(b)) => Some((
                AdminOps::new(a, cfg.root_a.clone()),
                AdminOps::new(b, cfg.root_b.clone()),
            )),
            _ => None,
        };
        let acl_enabled = acl::detect_acl_tools().is_some();
        if !acl_enabled {
            tracing::info!("setfacl/getfacl not found, ACL rules disabled");
        }
        Ok(Session {
            draws: Draws::new(cfg.seed),
            pool: EntityPool::new(),
            exec,
            oracle,
            stats: Statistics::new(),
            oplog,
            admin,
            acl_enabled,
            step: 0,
            cfg,
        })
    }

    /// Drive the registry until the step or wall-clock budget runs out.
    /// The first divergence aborts the run with the error.
    pub fn run(&mut self) -> Result<()> {
        let registry = rules::registry();
        let started = Instant::now();
        let limit = self.cfg.max_runtime_secs.map(Duration::from_secs);
        let outcome = (|| -> Result<()> {
            while self.step < self.cfg.steps {
                if let Some(limit) = limit {
                    if started.elapsed() >= limit {
                        tracing::warn!(step = self.step, "wall-clock budget exhausted, stopping");
                        break;
                    }
                }
                self.step_once(&registry)?;
                self.step += 1;
            }
            self.final_sweep()?;
            Ok(())
        })();
        self.oplog.flush();
        outcome
    }

    /// Post-run check that both trees hold the same entries. Skipped when
    /// a store can legitimately move entries around on its own (an admin
    /// surface or multiple zones).
    fn final_sweep(&mut self) -> Result<()> {
        if self.admin.is_some() || self.multizone() {
            return Ok(());
        }
        let (ra, rb) = self.exec.run(|fs| fs.tree());
        self.oracle.check("final_sweep", &ra, &rb)
    }

    fn step_once(&mut self, registry: &[rules::Rule]) -> Result<()> {
        let applicable: Vec<&rules::Rule> =
            registry.iter().filter(|r| (r.applies)(self)).collect();
        let Some(rule) = self.draws.pick(&applicable).copied() else {
            return Ok(());
        };
        tracing::debug!(step = self.step, rule = rule.name);
        (rule.run)(self)
    }

    pub fn report(&self) -> String {
        self.stats.to_json()
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn pool(&self) -> &EntityPool {
        &self.pool
    }

    pub fn steps_run(&self) -> usize {
        self.step
    }

    pub(crate) fn enabled(&self, name: &str) -> bool {
        self.cfg.op_enabled(name)
    }

    pub(crate) fn admin_on(&self) -> bool {
        self.admin.is_some()
    }

    pub(crate) fn multizone(&self) -> bool {
        !self.exec.a.is_single_zone() && !self.exec.b.is_single_zone()
    }

    /// Draw an identity; an unresolvable user skips the step.
    pub(crate) fn pick_identity(&mut self) -> Option<Identity> {
        let name = self.draws.pick(&self.cfg.users)?.clone();
        self.resolve(&name)
    }

    pub(crate) fn pick_sudo_identity(&mut self) -> Option<Identity> {
        let name = self.draws.pick(&self.cfg.sudo_users)?.clone();
        self.resolve(&name)
    }

    pub(crate) fn pick_user_name(&mut self) -> Option<String> {
        self.draws.pick(&self.cfg.users).cloned()
    }

    pub(crate) fn pick_group_name(&mut self) -> Option<String> {
        self.draws.pick(&self.cfg.groups).cloned()
    }

    fn resolve(&self, name: &str) -> Option<Identity> {
        match Identity::resolve(name) {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::debug!(user = name, %err, "cannot resolve user, skipping step");
                None
            }
        }
    }

    /// New child path under `parent` with a freshly drawn name.
    pub(crate) fn child_path(&mut self, parent: &str) -> String {
        let name = self.draws.entry_name();
        if parent.is_empty() {
            name
        } else {
            format!("{parent}/{name}")
        }
    }

    fn account(&mut self, op: &str, args: &str, ra: &OpResult, rb: &OpResult) {
        for (side, r) in [(Side::A, ra), (Side::B, rb)] {
            if r.is_failure() {
                self.stats.failure(op);
            } else {
                self.stats.success(op);
            }
            self.oplog.record(side, self.step, op, args, r);
        }
    }

    /// Execute one op on both roots under one identity, log and count it,
    /// then oracle-check the pair. The pair comes back for pool updates.
    pub(crate) fn dual<F>(
        &mut self,
        op: &str,
        args: &str,
        identity: &Identity,
        umask: Option<u32>,
        f: F,
    ) -> Result<(OpResult, OpResult)>
    where
        F: Fn(&RootFs) -> OpResult,
    {
        let (ra, rb) = self.exec.run_as(identity, umask, f)?;
        self.account(op, args, &ra, &rb);
        self.oracle.check(op, &ra, &rb)?;
        Ok((ra, rb))
    }

    /// Like `dual` but never compared: used where the two roots are
    /// legitimately asked to do different things (zones) or where the
    /// store treats the request as advisory.
    pub(crate) fn dual_unchecked<F>(&mut self, op: &str, args: &str, f: F)
    where
        F: Fn(&RootFs) -> OpResult,
    {
        let (ra, rb) = self.exec.run(f);
        self.account(op, args, &ra, &rb);
    }

    /// Rebalance-style ops hand each root its own zone; results are
    /// logged and counted but never compared.
    pub(crate) fn dual_zoned<F>(&mut self, op: &str, args: &str, zone_a: &str, zone_b: &str, f: F)
    where
        F: Fn(&RootFs, &str) -> OpResult,
    {
        let ra = f(&self.exec.a, zone_a);
        let rb = f(&self.exec.b, zone_b);
        self.account(op, args, &ra, &rb);
    }

    pub(crate) fn dual_admin<F>(&mut self, op: &str, args: &str, f: F) -> Result<(OpResult, OpResult)>
    where
        F: Fn(&AdminOps) -> OpResult,
    {
        let (ra, rb) = match &self.admin {
            Some((a, b)) => (f(a), f(b)),
            None => return Ok((OpResult::Unit, OpResult::Unit)),
        };
        self.account(op, args, &ra, &rb);
        self.oracle.check(op, &ra, &rb)?;
        Ok((ra, rb))
    }

    /// Reassign a simulated user's supplementary groups. Mutates global
    /// OS state once, not per root, so it is never oracle-compared.
    pub(crate) fn run_change_groups(&mut self) -> Result<()> {
        let Some(user) = self.pick_user_name() else {
            return Ok(());
        };
        if user == "root" {
            return Ok(());
        }
        let mut groups = Vec::new();
        for group in self.cfg.groups.clone() {
            if self.draws.bool() {
                groups.push(group);
            }
        }
        if groups.is_empty() {
            groups.push(user.clone());
        }
        match identity::change_groups(&user, &groups) {
            Ok(()) => self.stats.success("change_groups"),
            Err(err) => {
                tracing::debug!(%err, "change_groups failed");
                self.stats.failure("change_groups");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::EntityTag;

    fn session() -> (tempfile::TempDir, tempfile::TempDir, Session) {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::new(a.path(), b.path());
        let s = Session::new(cfg).unwrap();
        (a, b, s)
    }

    #[test]
    fn new_session_has_clean_roots_and_root_folder() {
        let (_a, _b, s) = session();
        assert!(s.pool().contains(EntityTag::Folder, ""));
        assert_eq!(s.steps_run(), 0);
    }

    #[test]
    fn clean_dir_keeps_the_root_itself() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        clean_dir(dir.path()).unwrap();
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dual_counts_per_root() {
        let (_a, _b, mut s) = session();
        let id = s.pick_identity().unwrap();
        s.dual("mkdir", "d", &id, None, |fs| fs.mkdir("d", 0o755))
            .unwrap();
        assert_eq!(s.stats().get("mkdir").success, 2);
    }

    #[test]
    fn dual_surfaces_divergence() {
        let (_a, _b, mut s) = session();
        // make the roots differ behind the executor's back
        std::fs::write(s.exec.a.root().join("only_a"), b"x").unwrap();
        let id = s.pick_identity().unwrap();
        let err = s
            .dual("stat", "only_a", &id, None, |fs| fs.stat("only_a", true))
            .unwrap_err();
        assert!(err.is_divergence());
    }

    #[test]
    fn identical_ops_never_diverge() {
        let (_a, _b, mut s) = session();
        let id = s.pick_identity().unwrap();
        s.dual("create_file", "f", &id, Some(0o022), |fs| {
            fs.create_file("f", b"same bytes")
        })
        .unwrap();
        s.dual("read", "f", &id, None, |fs| fs.read("f", 3, 100))
            .unwrap();
        s.dual("unlink", "f", &id, None, |fs| fs.unlink("f")).unwrap();
    }

    #[test]
    fn child_path_joins_under_parent() {
        let (_a, _b, mut s) = session();
        let top = s.child_path("");
        assert!(!top.contains('/'));
        let nested = s.child_path("d");
        assert!(nested.starts_with("d/"));
    }

    #[test]
    fn runs_full_budget_without_divergence() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::new(a.path(), b.path());
        cfg.seed = 99;
        cfg.steps = 120;
        let mut s = Session::new(cfg).unwrap();
        s.run().unwrap();
        assert_eq!(s.steps_run(), 120);
    }
}
