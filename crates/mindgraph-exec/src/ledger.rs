//! Visit ledger — per-run dispatch attempt counts.
//!
//! Counts only ever grow within a run. With a detection window configured
//! the ledger also remembers the most recent attempts and reports a cycle
//! when the same sequence of two or more nodes repeats back to back.

use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub struct VisitLedger {
    counts: DashMap<String, u32>,
    window: Option<Mutex<VecDeque<String>>>,
    window_size: usize,
}

impl VisitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable window-based cycle detection over the last `size` attempts.
    pub fn with_window(size: Option<usize>) -> Self {
        match size {
            Some(size) if size >= 4 => Self {
                counts: DashMap::new(),
                window: Some(Mutex::new(VecDeque::with_capacity(size))),
                window_size: size,
            },
            _ => Self::new(),
        }
    }

    /// Bump the count and return the new value.
    pub fn increment(&self, id: &str) -> u32 {
        let mut entry = self.counts.entry(id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn get(&self, id: &str) -> u32 {
        self.counts.get(id).map(|c| *c).unwrap_or(0)
    }

    /// Start a node at a known count (resume). Never lowers an existing count.
    pub fn seed(&self, id: &str, count: u32) {
        let mut entry = self.counts.entry(id.to_string()).or_insert(0);
        *entry = (*entry).max(count);
    }

    pub fn counts(&self) -> BTreeMap<String, u32> {
        self.counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Push an attempt into the window. Returns the distinct node ids of a
    /// repeated pattern if the tail now reads `p p` for some pattern `p`
    /// of length ≥ 2 that names at least two nodes. The window is cleared
    /// after a detection.
    pub fn record_attempt(&self, id: &str) -> Option<Vec<String>> {
        let window = self.window.as_ref()?;
        let mut window = window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(id.to_string());

        let attempts: Vec<&String> = window.iter().collect();
        let len = attempts.len();
        for k in 2..=len / 2 {
            let tail = &attempts[len - k..];
            let prev = &attempts[len - 2 * k..len - k];
            if tail != prev {
                continue;
            }
            let mut distinct: Vec<String> = Vec::new();
            for a in tail {
                if !distinct.iter().any(|d| d == *a) {
                    distinct.push((*a).clone());
                }
            }
            if distinct.len() >= 2 {
                window.clear();
                return Some(distinct);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_monotone() {
        let ledger = VisitLedger::new();
        assert_eq!(ledger.increment("n1"), 1);
        assert_eq!(ledger.increment("n1"), 2);
        ledger.seed("n1", 1);
        assert_eq!(ledger.get("n1"), 2);
        ledger.seed("n2", 3);
        assert_eq!(ledger.get("n2"), 3);
        assert_eq!(ledger.get("missing"), 0);
    }

    #[test]
    fn window_disabled_never_reports() {
        let ledger = VisitLedger::with_window(None);
        for id in ["a", "b", "a", "b", "a", "b"] {
            assert!(ledger.record_attempt(id).is_none());
        }
    }

    #[test]
    fn window_detects_abab() {
        let ledger = VisitLedger::with_window(Some(6));
        assert!(ledger.record_attempt("a").is_none());
        assert!(ledger.record_attempt("b").is_none());
        assert!(ledger.record_attempt("a").is_none());
        assert_eq!(ledger.record_attempt("b"), Some(vec!["a".into(), "b".into()]));
        // cleared after detection
        assert!(ledger.record_attempt("a").is_none());
    }

    #[test]
    fn window_ignores_single_node_repeats() {
        let ledger = VisitLedger::with_window(Some(8));
        for _ in 0..6 {
            assert!(ledger.record_attempt("a").is_none());
        }
    }

    #[test]
    fn window_detects_longer_pattern() {
        let ledger = VisitLedger::with_window(Some(8));
        let mut found = None;
        for id in ["x", "a", "b", "c", "a", "b", "c"] {
            found = ledger.record_attempt(id);
        }
        assert_eq!(found, Some(vec!["a".into(), "b".into(), "c".into()]));
    }
}
