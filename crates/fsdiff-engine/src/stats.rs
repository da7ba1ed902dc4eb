//! Per-operation success/failure counters.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct OpCount {
    pub success: u64,
    pub failure: u64,
}

/// Counters keyed by operation name. BTreeMap keeps the JSON report
/// sorted without a separate pass.
#[derive(Debug, Default, Serialize)]
pub struct Statistics {
    ops: BTreeMap<String, OpCount>,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    pub fn success(&mut self, op: &str) {
        self.ops.entry(op.to_string()).or_default().success += 1;
    }

    pub fn failure(&mut self, op: &str) {
        self.ops.entry(op.to_string()).or_default().failure += 1;
    }

    pub fn get(&self, op: &str) -> OpCount {
        self.ops.get(op).copied().unwrap_or_default()
    }

    pub fn total_steps(&self) -> u64 {
        self.ops.values().map(|c| c.success + c.failure).sum()
    }

    pub fn to_json(&self) -> String {
        // BTreeMap of plain counters cannot fail to serialize.
        serde_json::to_string_pretty(&self.ops).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut stats = Statistics::new();
        stats.success("stat");
        stats.success("stat");
        stats.failure("stat");
        stats.failure("unlink");
        assert_eq!(stats.get("stat").success, 2);
        assert_eq!(stats.get("stat").failure, 1);
        assert_eq!(stats.get("unlink").failure, 1);
        assert_eq!(stats.get("mkdir").success, 0);
        assert_eq!(stats.total_steps(), 4);
    }

    #[test]
    fn report_is_sorted_json() {
        let mut stats = Statistics::new();
        stats.success("zzz");
        stats.success("aaa");
        let json = stats.to_json();
        let a = json.find("aaa").unwrap();
        let z = json.find("zzz").unwrap();
        assert!(a < z);
    }
}
