//! Per-root operation logs.
//!
//! One JSON-lines file per root, recording every attempted operation,
//! its arguments and its outcome, for post-mortem diagnosis. Disabled
//! when no log directory is configured.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::outcome::OpResult;

#[derive(Serialize)]
struct Record<'a> {
    step: usize,
    op: &'a str,
    args: &'a str,
    outcome: &'a OpResult,
}

pub struct OpLog {
    a: Option<BufWriter<File>>,
    b: Option<BufWriter<File>>,
}

impl OpLog {
    pub fn disabled() -> Self {
        OpLog { a: None, b: None }
    }

    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let a = BufWriter::new(File::create(dir.join("root_a.jsonl"))?);
        let b = BufWriter::new(File::create(dir.join("root_b.jsonl"))?);
        Ok(OpLog {
            a: Some(a),
            b: Some(b),
        })
    }

    pub fn record(&mut self, side: Side, step: usize, op: &str, args: &str, outcome: &OpResult) {
        let writer = match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        };
        if let Some(w) = writer {
            let rec = Record {
                step,
                op,
                args,
                outcome,
            };
            if let Ok(line) = serde_json::to_string(&rec) {
                let _ = writeln!(w, "{line}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = &mut self.a {
            let _ = w.flush();
        }
        if let Some(w) = &mut self.b {
            let _ = w.flush();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_swallows_records() {
        let mut log = OpLog::disabled();
        log.record(Side::A, 0, "stat", "f", &OpResult::Unit);
        log.flush();
    }

    #[test]
    fn records_land_in_the_right_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = OpLog::open(dir.path()).unwrap();
        log.record(Side::A, 1, "mkdir", "d", &OpResult::Unit);
        log.record(Side::B, 1, "mkdir", "d", &OpResult::Failure("denied".into()));
        log.flush();
        let a = std::fs::read_to_string(dir.path().join("root_a.jsonl")).unwrap();
        let b = std::fs::read_to_string(dir.path().join("root_b.jsonl")).unwrap();
        assert!(a.contains("\"op\":\"mkdir\""));
        assert!(a.contains("Unit"));
        assert!(b.contains("denied"));
        let parsed: serde_json::Value = serde_json::from_str(a.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["step"], 1);
    }
}
