//! The subscription state machine, §4.4.1: a per-watch in-memory map of
//! `namespace/name -> last-observed-object`, field-change filtering against
//! the executor's requested selection set, and the Added/Deleted/Modified/
//! Bookmark event table.

use std::collections::BTreeMap;

use async_graphql::dynamic::ResolverContext;
use serde_json::Value;

/// Key is the per-watch map key: `namespace/name`, or just `name` for
/// cluster-scoped resources.
pub fn key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

/// RequestedPaths walks the current field's GraphQL selection set and
/// returns every leaf field as a dotted path, e.g. `metadata.labels`. Used
/// to scope the Modified-event structural comparison to only what the
/// caller actually asked for.
pub fn requested_paths(ctx: &ResolverContext<'_>) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = Vec::new();
    for field in ctx.ctx.field().selection_set() {
        stack.push((field, Vec::new()));
    }
    while let Some((field, mut path)) = stack.pop() {
        path.push(field.name().to_string());
        let children: Vec<_> = field.selection_set().collect();
        if children.is_empty() {
            out.push(path);
        } else {
            for child in children {
                stack.push((child, path.clone()));
            }
        }
    }
    out
}

/// Differs reports whether `prior` and `new` disagree on any of the
/// `paths`, or whether exactly one of them is absent. `subscribe_to_all`
/// short-circuits to `true` without inspecting either value.
pub fn differs(prior: Option<&Value>, new: Option<&Value>, paths: &[Vec<String>], subscribe_to_all: bool) -> bool {
    if subscribe_to_all {
        return true;
    }
    match (prior, new) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(p), Some(n)) => paths.iter().any(|path| lookup(p, path) != lookup(n, path)),
    }
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// ActiveSubscriptionGuard increments the active-subscription gauge on
/// construction and decrements it on drop, so the count tracks a watch
/// stream's lifetime regardless of how it ends (exhausted, cancelled, or
/// the executor dropping it on client disconnect).
pub struct ActiveSubscriptionGuard;

impl ActiveSubscriptionGuard {
    pub fn new() -> Self {
        metrics::gauge!("gateway_active_subscriptions").increment(1.0);
        Self
    }
}

impl Drop for ActiveSubscriptionGuard {
    fn drop(&mut self) {
        metrics::gauge!("gateway_active_subscriptions").decrement(1.0);
    }
}

/// WatchState is the per-subscription in-memory map from §4.4.1,
/// threaded through the lifetime of one open watch stream.
#[derive(Default)]
pub struct WatchState {
    observed: BTreeMap<String, Value>,
}

impl WatchState {
    pub fn record(&mut self, key: String, value: Value) {
        self.observed.insert(key, value);
    }

    pub fn forget(&mut self, key: &str) -> Option<Value> {
        self.observed.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.observed.get(key)
    }

    pub fn values(&self) -> Vec<Value> {
        self.observed.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_includes_namespace_when_present() {
        assert_eq!(key(Some("default"), "widget"), "default/widget");
        assert_eq!(key(None, "widget"), "widget");
    }

    #[test]
    fn subscribe_to_all_always_differs() {
        assert!(differs(None, None, &[], true));
    }

    #[test]
    fn presence_mismatch_always_differs() {
        let v = json!({"a": 1});
        assert!(differs(Some(&v), None, &[vec!["a".to_string()]], false));
        assert!(differs(None, Some(&v), &[vec!["a".to_string()]], false));
    }

    #[test]
    fn unchanged_requested_fields_do_not_differ() {
        let prior = json!({"spec": {"replicas": 3}, "status": {"ready": false}});
        let new = json!({"spec": {"replicas": 3}, "status": {"ready": true}});
        let paths = vec![vec!["spec".to_string(), "replicas".to_string()]];
        assert!(!differs(Some(&prior), Some(&new), &paths, false));
    }

    #[test]
    fn changed_requested_field_differs() {
        let prior = json!({"status": {"ready": false}});
        let new = json!({"status": {"ready": true}});
        let paths = vec![vec!["status".to_string(), "ready".to_string()]];
        assert!(differs(Some(&prior), Some(&new), &paths, false));
    }

    #[test]
    fn watch_state_round_trip() {
        let mut state = WatchState::default();
        state.record("default/widget".to_string(), json!({"a": 1}));
        assert_eq!(state.get("default/widget"), Some(&json!({"a": 1})));
        assert_eq!(state.forget("default/widget"), Some(json!({"a": 1})));
        assert_eq!(state.get("default/widget"), None);
    }
}
