//! Trade marks per (asset, chain) scope.
//!
//! Marks are append-only: a mark id already present in its scope is never
//! overwritten. An optional per-scope cap evicts the oldest marks.

use chartfeed_core::{Mark, MarksScope};
use chartfeed_telemetry::Metrics;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

pub struct MarksCache {
    scopes: DashMap<MarksScope, HashMap<String, Mark>>,
    max_per_scope: Option<usize>,
}

impl MarksCache {
    pub fn new(max_per_scope: Option<usize>) -> Self {
        Self {
            scopes: DashMap::new(),
            max_per_scope,
        }
    }

    /// Insert marks whose id is not yet cached and return the scope's full
    /// set, ordered by time.
    pub fn merge<I: IntoIterator<Item = Mark>>(&self, scope: &MarksScope, marks: I) -> Vec<Mark> {
        let mut entry = self.scopes.entry(scope.clone()).or_default();
        let before = entry.len();
        let mut inserted = 0usize;
        for mark in marks {
            if !entry.contains_key(&mark.id) {
                entry.insert(mark.id.clone(), mark);
                inserted += 1;
            }
        }

        if let Some(cap) = self.max_per_scope {
            evict_oldest(&mut entry, cap);
        }

        let all = sorted(&entry);
        drop(entry);

        debug!(scope = %scope, inserted, total = all.len(), "Marks merged");
        Metrics::marks_cached(all.len() as i64 - before as i64);
        all
    }

    /// Cached marks of `scope`, ordered by time.
    pub fn current(&self, scope: &MarksScope) -> Vec<Mark> {
        self.scopes
            .get(scope)
            .map(|entry| sorted(&entry))
            .unwrap_or_default()
    }

    pub fn len(&self, scope: &MarksScope) -> usize {
        self.scopes.get(scope).map(|entry| entry.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, scope: &MarksScope) -> bool {
        self.len(scope) == 0
    }

    /// Drop every mark of `scope`, forcing a refetch.
    pub fn invalidate_scope(&self, scope: &MarksScope) -> bool {
        match self.scopes.remove(scope) {
            Some((_, marks)) => {
                Metrics::marks_cached(-(marks.len() as i64));
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut removed = 0usize;
        self.scopes.retain(|_, marks| {
            removed += marks.len();
            false
        });
        Metrics::marks_cached(-(removed as i64));
    }
}

fn sorted(marks: &HashMap<String, Mark>) -> Vec<Mark> {
    let mut all: Vec<Mark> = marks.values().cloned().collect();
    all.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    all
}

fn evict_oldest(marks: &mut HashMap<String, Mark>, cap: usize) {
    if marks.len() <= cap {
        return;
    }
    let mut by_age: Vec<(i64, String)> = marks.values().map(|m| (m.time, m.id.clone())).collect();
    by_age.sort();
    let excess = marks.len() - cap;
    for (_, id) in by_age.into_iter().take(excess) {
        marks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartfeed_core::MarkColor;

    fn mark(id: &str, time: i64, text: &str) -> Mark {
        Mark {
            id: id.to_string(),
            time,
            color: MarkColor::Green,
            label: "B".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_duplicate_id_is_noop() {
        let cache = MarksCache::new(None);
        let scope = MarksScope::new("0xabc", "base");

        cache.merge(&scope, vec![mark("h1", 10, "first")]);
        let all = cache.merge(&scope, vec![mark("h1", 99, "second"), mark("h2", 20, "x")]);

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "first");
        assert_eq!(all[0].time, 10);
    }

    #[test]
    fn test_merge_returns_sorted_full_set() {
        let cache = MarksCache::new(None);
        let scope = MarksScope::new("a", "c");
        cache.merge(&scope, vec![mark("z", 30, ""), mark("y", 10, "")]);
        let all = cache.merge(&scope, vec![mark("x", 20, "")]);
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "x", "z"]);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let cache = MarksCache::new(None);
        let a = MarksScope::new("a", "base");
        let b = MarksScope::new("a", "solana");
        cache.merge(&a, vec![mark("h1", 1, "")]);
        assert!(cache.is_empty(&b));
        assert_eq!(cache.len(&MarksScope::new("A", "BASE")), 1);
    }

    #[test]
    fn test_invalidate_scope() {
        let cache = MarksCache::new(None);
        let scope = MarksScope::new("a", "base");
        cache.merge(&scope, vec![mark("h1", 1, "")]);
        assert!(cache.invalidate_scope(&scope));
        assert!(!cache.invalidate_scope(&scope));
        assert!(cache.current(&scope).is_empty());
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let cache = MarksCache::new(Some(2));
        let scope = MarksScope::new("a", "base");
        let all = cache.merge(
            &scope,
            vec![mark("old", 1, ""), mark("mid", 2, ""), mark("new", 3, "")],
        );
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "new"]);
    }
}
