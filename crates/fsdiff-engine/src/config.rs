//! Run configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Administrative surface of one root: the external binary plus the meta
/// address it operates on. Admin rules only run when both roots carry one.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminEndpoint {
    pub binary: PathBuf,
    pub meta_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    /// Seed for every random draw; the same seed replays the same sequence.
    pub seed: u64,
    /// Step budget per run.
    pub steps: usize,
    /// Optional wall-clock budget in seconds.
    pub max_runtime_secs: Option<u64>,
    /// Operations never selected. `include_ops` non-empty restricts
    /// selection to exactly those names instead.
    pub exclude_ops: Vec<String>,
    pub include_ops: Vec<String>,
    /// Simulated users ops run as. Unknown names are skipped at draw time.
    pub users: Vec<String>,
    /// Users allowed to drive the external ACL tool.
    pub sudo_users: Vec<String>,
    pub groups: Vec<String>,
    /// Names hidden from directory listings.
    pub control_files: Vec<String>,
    /// Corpus-seeding mode: the oracle is bypassed and always reports equal.
    pub generate_baseline: bool,
    /// Remove and recreate both roots at session setup.
    pub clean_roots: bool,
    /// Create the simulated OS users and groups at setup (root only).
    pub provision_users: bool,
    pub admin_a: Option<AdminEndpoint>,
    pub admin_b: Option<AdminEndpoint>,
    /// Where the per-root operation logs go; `None` disables them.
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let users = vec![
            "root".to_string(),
            "user1".to_string(),
            "user2".to_string(),
            "user3".to_string(),
        ];
        let mut groups = users.clone();
        for i in 1..=4 {
            groups.push(format!("group{i}"));
        }
        EngineConfig {
            root_a: PathBuf::new(),
            root_b: PathBuf::new(),
            seed: 0,
            steps: 50,
            max_runtime_secs: None,
            exclude_ops: vec!["utime".to_string()],
            include_ops: Vec::new(),
            users,
            sudo_users: vec!["root".to_string()],
            groups,
            control_files: vec![
                ".accesslog".to_string(),
                ".config".to_string(),
                ".stats".to_string(),
            ],
            generate_baseline: false,
            clean_roots: true,
            provision_users: false,
            admin_a: None,
            admin_b: None,
            log_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn new(root_a: impl Into<PathBuf>, root_b: impl Into<PathBuf>) -> Self {
        EngineConfig {
            root_a: root_a.into(),
            root_b: root_b.into(),
            ..EngineConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_a.as_os_str().is_empty() || self.root_b.as_os_str().is_empty() {
            return Err(EngineError::Config("both roots must be set".into()));
        }
        if self.root_a == self.root_b {
            return Err(EngineError::Config(
                "root_a and root_b must be distinct directories".into(),
            ));
        }
        if self.steps == 0 {
            return Err(EngineError::Config("step budget must be positive".into()));
        }
        if self.users.is_empty() {
            return Err(EngineError::Config("at least one user is required".into()));
        }
        if self.admin_a.is_some() != self.admin_b.is_some() {
            return Err(EngineError::Config(
                "admin surface must be configured on both roots or neither".into(),
            ));
        }
        Ok(())
    }

    pub fn op_enabled(&self, name: &str) -> bool {
        if !self.include_ops.is_empty() {
            return self.include_ops.iter().any(|n| n == name);
        }
        !self.exclude_ops.iter().any(|n| n == name)
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin_a.is_some() && self.admin_b.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_profile() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.steps, 50);
        assert_eq!(cfg.users.len(), 4);
        assert_eq!(cfg.groups.len(), 8);
        assert_eq!(cfg.control_files.len(), 3);
        assert!(!cfg.op_enabled("utime"));
        assert!(cfg.op_enabled("stat"));
    }

    #[test]
    fn include_list_overrides_excludes() {
        let mut cfg = EngineConfig::new("/a", "/b");
        cfg.include_ops = vec!["stat".into(), "utime".into()];
        assert!(cfg.op_enabled("utime"));
        assert!(!cfg.op_enabled("unlink"));
    }

    #[test]
    fn validate_rejects_identical_roots() {
        let cfg = EngineConfig::new("/same", "/same");
        assert!(cfg.validate().is_err());
        assert!(EngineConfig::new("/a", "/b").validate().is_ok());
    }

    #[test]
    fn validate_rejects_one_sided_admin() {
        let mut cfg = EngineConfig::new("/a", "/b");
        cfg.admin_a = Some(AdminEndpoint {
            binary: "/usr/bin/true".into(),
            meta_url: "sqlite3://x.db".into(),
        });
        assert!(cfg.validate().is_err());
    }
}
