//! Administrative command surface of one root.
//!
//! Commands are external process invocations with textual stdout. Output
//! is redacted before comparison so run-specific identifiers (UUIDs,
//! timestamps, generated counters) never cause false divergence. A
//! non-zero exit or an embedded `<ERROR>:` marker becomes a `Failure` in
//! the same shape as any other operation error.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::AdminEndpoint;
use crate::outcome::{InfoFields, OpResult};

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .unwrap()
    })
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?").unwrap()
    })
}

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // generated ids and usage counters inside JSON dumps
    RE.get_or_init(|| {
        Regex::new(
            r#""(usedSpace|usedInodes|nextInodes|nextChunk|nextSession|nextTrash|nextCleanupSlices|inode|id|atime|mtime|ctime|atimensec|mtimensec|ctimensec)"\s*:\s*\d+"#,
        )
        .unwrap()
    })
}

/// Strip run-specific identifiers from command output.
pub fn redact(text: &str) -> String {
    let text = uuid_re().replace_all(text, "<uuid>");
    let text = time_re().replace_all(&text, "<time>");
    let text = counter_re().replace_all(&text, r#""$1":0"#);
    text.trim().to_string()
}

/// Extract raw bytes from a human size like `4.00 KiB (4096 Bytes)` or
/// plain `3 Bytes`.
pub fn raw_size(size: &str) -> Option<u64> {
    let token = match size.split_once('(') {
        Some((_, rest)) => rest.split_whitespace().next()?,
        None => size.split_whitespace().next()?,
    };
    token.parse().ok()
}

/// Parse the summary block of `info` output:
/// name, inode, files, dirs, length, size, then path(s).
pub fn parse_info(stdout: &str) -> Option<InfoFields> {
    let lines: Vec<&str> = stdout.lines().collect();
    let mut fields = InfoFields::default();
    let mut path_section = false;
    for line in &lines {
        let line = line.trim();
        if path_section {
            if line.starts_with('/') {
                fields.paths.push(line.to_string());
                continue;
            }
            break;
        }
        if let Some(v) = line.strip_prefix("files:") {
            fields.files = v.trim().parse().ok()?;
        } else if let Some(v) = line.strip_prefix("dirs:") {
            fields.dirs = v.trim().parse().ok()?;
        } else if let Some(v) = line.strip_prefix("length:") {
            fields.length = raw_size(v.trim())?;
        } else if let Some(v) = line.strip_prefix("size:") {
            fields.size = raw_size(v.trim())?;
        } else if let Some(v) = line.strip_prefix("path:") {
            fields.paths.push(v.trim().to_string());
        } else if line.starts_with("paths:") {
            path_section = true;
        }
    }
    if fields.size == 0 && fields.length == 0 && fields.files == 0 && fields.dirs == 0 {
        return None;
    }
    Some(fields)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOpts {
    pub fast: bool,
    pub skip_trash: bool,
    pub threads: u32,
}

/// Encoded trash entries carry the original path as `name|comp|comp`.
pub fn trash_components(entry: &str) -> Vec<String> {
    entry.split('|').skip(1).map(str::to_string).collect()
}

pub struct AdminOps {
    binary: PathBuf,
    meta_url: String,
    root: PathBuf,
}

impl AdminOps {
    pub fn new(endpoint: &AdminEndpoint, root: impl Into<PathBuf>) -> Self {
        AdminOps {
            binary: endpoint.binary.clone(),
            meta_url: endpoint.meta_url.clone(),
            root: root.into(),
        }
    }

    fn abs(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Run the binary; exit status and the `<ERROR>:` stdout marker both
    /// map to `Failure`.
    fn run(&self, op: &str, args: &[String]) -> std::result::Result<String, OpResult> {
        let out = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| OpResult::fail(op, &self.binary, e))?;
        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(OpResult::Failure(format!(
                "{op}: {}",
                if stderr.trim().is_empty() {
                    stdout.trim()
                } else {
                    stderr.trim()
                }
            )));
        }
        if stdout.contains("<ERROR>:") {
            return Err(OpResult::Failure(format!("{op}: {}", stdout.trim())));
        }
        Ok(stdout)
    }

    pub fn info(&self, rel: &str, raw: bool, recursive: bool, strict: bool) -> OpResult {
        let mut args = vec!["info".to_string(), self.abs(rel).to_string_lossy().into_owned()];
        if raw {
            args.push("--raw".to_string());
        }
        if recursive {
            args.push("--recursive".to_string());
        }
        if strict {
            args.push("--strict".to_string());
        }
        match self.run("info", &args) {
            Ok(stdout) => match parse_info(&stdout) {
                Some(fields) => OpResult::Info(fields),
                None => OpResult::Text(redact(&stdout)),
            },
            Err(failure) => failure,
        }
    }

    pub fn rmr(&self, rel: &str) -> OpResult {
        let args = vec!["rmr".to_string(), self.abs(rel).to_string_lossy().into_owned()];
        match self.run("rmr", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    pub fn fsck(&self, rel: Option<&str>, repair: bool, recursive: bool) -> OpResult {
        let mut args = vec!["fsck".to_string(), self.meta_url.clone()];
        if let Some(rel) = rel {
            args.push("--path".to_string());
            args.push(self.abs(rel).to_string_lossy().into_owned());
        }
        if repair {
            args.push("--repair".to_string());
        }
        if recursive {
            args.push("--recursive".to_string());
        }
        match self.run("fsck", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    pub fn gc(&self, compact: bool, delete: bool) -> OpResult {
        let mut args = vec!["gc".to_string(), self.meta_url.clone()];
        if compact {
            args.push("--compact".to_string());
        }
        if delete {
            args.push("--delete".to_string());
        }
        match self.run("gc", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    pub fn compact(&self, rel: &str, threads: u32) -> OpResult {
        let args = vec![
            "compact".to_string(),
            self.abs(rel).to_string_lossy().into_owned(),
            "--threads".to_string(),
            threads.to_string(),
        ];
        match self.run("compact", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    pub fn clone_entry(&self, src: &str, dst: &str, preserve: bool) -> OpResult {
        let mut args = vec![
            "clone".to_string(),
            self.abs(src).to_string_lossy().into_owned(),
            self.abs(dst).to_string_lossy().into_owned(),
        ];
        if preserve {
            args.push("--preserve".to_string());
        }
        match self.run("clone", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn config(
        &self,
        capacity: u64,
        inodes: u64,
        trash_days: u32,
        enable_acl: bool,
        encrypt_secret: bool,
        force: bool,
        yes: bool,
    ) -> OpResult {
        let mut args = vec![
            "config".to_string(),
            self.meta_url.clone(),
            "--capacity".to_string(),
            capacity.to_string(),
            "--inodes".to_string(),
            inodes.to_string(),
            "--trash-days".to_string(),
            trash_days.to_string(),
            "--enable-acl".to_string(),
            enable_acl.to_string(),
            "--encrypt-secret".to_string(),
            encrypt_secret.to_string(),
        ];
        if force {
            args.push("--force".to_string());
        }
        if yes {
            args.push("--yes".to_string());
        }
        match self.run("config", &args) {
            Ok(stdout) => OpResult::Text(redact(&stdout)),
            Err(failure) => failure,
        }
    }

    pub fn quota_set(&self, rel: &str, capacity: Option<u64>, inodes: Option<u64>) -> OpResult {
        let mut args = vec![
            "quota".to_string(),
            "set".to_string(),
            self.meta_url.clone(),
            "--path".to_string(),
            format!("/{rel}"),
        ];
        if let Some(capacity) = capacity {
            args.push("--capacity".to_string());
            args.push(capacity.to_string());
        }
        if let Some(inodes) = inodes {
            args.push("--inodes".to_string());
            args.push(inodes.to_string());
        }
        match self.run("quota set", &args) {
            Ok(_) => self.quota_get(rel),
            Err(failure) => failure,
        }
    }

    pub fn quota_get(&self, rel: &str) -> OpResult {
        let args = vec![
            "quota".to_string(),
            "get".to_string(),
            self.meta_url.clone(),
            "--path".to_string(),
            format!("/{rel}"),
        ];
        match self.run("quota get", &args) {
            Ok(stdout) => OpResult::Text(redact(&stdout)),
            Err(failure) => failure,
        }
    }

    pub fn quota_list(&self) -> OpResult {
        let args = vec!["quota".to_string(), "list".to_string(), self.meta_url.clone()];
        match self.run("quota list", &args) {
            Ok(stdout) => OpResult::Text(redact(&stdout)),
            Err(failure) => failure,
        }
    }

    pub fn quota_delete(&self, rel: &str) -> OpResult {
        let args = vec![
            "quota".to_string(),
            "delete".to_string(),
            self.meta_url.clone(),
            "--path".to_string(),
            format!("/{rel}"),
        ];
        match self.run("quota delete", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    /// Sorted names under the trash directory.
    pub fn trash_list(&self) -> OpResult {
        let trash = self.root.join(".trash");
        let mut names = Vec::new();
        match std::fs::read_dir(&trash) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            Err(e) => return OpResult::fail("trash_list", &trash, e),
        }
        names.sort();
        OpResult::Listing(names)
    }

    pub fn trash_entries(&self) -> Vec<String> {
        match self.trash_list() {
            OpResult::Listing(names) => names,
            _ => Vec::new(),
        }
    }

    pub fn trash_restore(&self, entry: &str, put_back: bool) -> OpResult {
        let mut args = vec![
            "restore".to_string(),
            self.root
                .join(".trash")
                .join(entry)
                .to_string_lossy()
                .into_owned(),
        ];
        if put_back {
            args.push("--put-back".to_string());
        }
        match self.run("restore", &args) {
            Ok(_) => {
                let restored = self.abs(&trash_components(entry).join("/"));
                OpResult::stat_of("restore", &restored, false)
            }
            Err(failure) => failure,
        }
    }

    fn dump_args(&self, meta_url: &str, subdir: Option<&str>, opts: DumpOpts) -> Vec<String> {
        let mut args = vec!["dump".to_string(), meta_url.to_string()];
        if let Some(subdir) = subdir {
            args.push("--subdir".to_string());
            args.push(format!("/{subdir}"));
        }
        if opts.fast {
            args.push("--fast".to_string());
        }
        if opts.skip_trash {
            args.push("--skip-trash".to_string());
        }
        args.push("--threads".to_string());
        args.push(opts.threads.max(1).to_string());
        args
    }

    pub fn dump(&self, subdir: Option<&str>, opts: DumpOpts) -> OpResult {
        match self.run("dump", &self.dump_args(&self.meta_url, subdir, opts)) {
            Ok(stdout) => OpResult::Text(redact(&stdout)),
            Err(failure) => failure,
        }
    }

    pub fn load(&self, meta_url: &str, dumpfile: &Path) -> OpResult {
        let args = vec![
            "load".to_string(),
            meta_url.to_string(),
            dumpfile.to_string_lossy().into_owned(),
        ];
        match self.run("load", &args) {
            Ok(_) => OpResult::Bool(true),
            Err(failure) => failure,
        }
    }

    fn workdir(&self) -> PathBuf {
        let key: String = self
            .meta_url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        std::env::temp_dir().join(format!("fsdiff-{key}"))
    }

    /// Dump, load into a fresh store, dump again; reports the second dump
    /// so a round trip through load is directly comparable.
    pub fn dump_load_dump(&self, subdir: Option<&str>, opts: DumpOpts) -> OpResult {
        let first = match self.run("dump", &self.dump_args(&self.meta_url, subdir, opts)) {
            Ok(stdout) => stdout,
            Err(failure) => return failure,
        };
        let workdir = self.workdir();
        if let Err(e) = std::fs::create_dir_all(&workdir) {
            return OpResult::fail("dump", &workdir, e);
        }
        let dumpfile = workdir.join("dump.json");
        if let Err(e) = std::fs::write(&dumpfile, &first) {
            return OpResult::fail("dump", &dumpfile, e);
        }
        let load_db = workdir.join("load.db");
        let _ = std::fs::remove_file(&load_db);
        let load_url = format!("sqlite3://{}", load_db.display());
        if let OpResult::Failure(msg) = self.load(&load_url, &dumpfile) {
            return OpResult::Failure(msg);
        }
        match self.run("dump", &self.dump_args(&load_url, None, opts)) {
            Ok(second) => OpResult::Text(redact(&second)),
            Err(failure) => failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_size_handles_both_forms() {
        assert_eq!(raw_size("4.00 KiB (4096 Bytes)"), Some(4096));
        assert_eq!(raw_size("3 Bytes"), Some(3));
        assert_eq!(raw_size(""), None);
    }

    #[test]
    fn parse_info_reads_summary_block() {
        let out = "\
aaaa:
  inode: 1234
  files: 2
  dirs: 1
  length: 4.00 KiB (4096 Bytes)
  size: 8.00 KiB (8192 Bytes)
  path: /d/aaaa
";
        let fields = parse_info(out).unwrap();
        assert_eq!(fields.files, 2);
        assert_eq!(fields.dirs, 1);
        assert_eq!(fields.length, 4096);
        assert_eq!(fields.size, 8192);
        assert_eq!(fields.paths, vec!["/d/aaaa"]);
    }

    #[test]
    fn parse_info_reads_multiple_paths() {
        let out = "\
f:
  inode: 9
  files: 1
  dirs: 0
  length: 3 Bytes
  size: 4096 Bytes
  paths:
    /a/f
    /b/f
";
        let fields = parse_info(out).unwrap();
        assert_eq!(fields.paths, vec!["/a/f", "/b/f"]);
    }

    #[test]
    fn redact_hides_uuids_and_timestamps() {
        let raw = r#"{"uuid":"0c12ab34-9f00-4e4e-8d88-1234567890ab","created":"2024-05-01T10:20:30Z"}"#;
        let clean = redact(raw);
        assert!(clean.contains("<uuid>"));
        assert!(clean.contains("<time>"));
        assert!(!clean.contains("0c12ab34"));
    }

    #[test]
    fn redact_zeroes_generated_counters() {
        let raw = r#"{"usedSpace": 12288,"usedInodes":3,"inode":42,"name":"x"}"#;
        let clean = redact(raw);
        assert!(clean.contains(r#""usedSpace":0"#));
        assert!(clean.contains(r#""usedInodes":0"#));
        assert!(clean.contains(r#""inode":0"#));
        assert!(clean.contains(r#""name":"x""#));
    }

    #[test]
    fn redact_is_idempotent() {
        let raw = r#"{"id": 7,"when":"2023-01-02 03:04:05"}"#;
        let once = redact(raw);
        assert_eq!(redact(&once), once);
    }

    #[test]
    fn trash_entries_decode_path_components() {
        assert_eq!(trash_components("1-2-3|d|f"), vec!["d", "f"]);
        assert!(trash_components("bare").is_empty());
    }
}
