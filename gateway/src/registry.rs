//! Cluster Registry (C7): the `RwLock`-guarded map from cluster name to
//! [`TargetCluster`] that the Router and File Watcher share, per §4.7.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use tracing::{info, instrument, warn};

use crate::target::{SharedTarget, TargetCluster};
use crate::Result;

/// Registry owns every currently-loaded target cluster, keyed by
/// [`descriptor::cluster_name`].
#[derive(Default)]
pub struct Registry {
    targets: std::sync::RwLock<BTreeMap<String, SharedTarget>>,
}

impl Registry {
    /// New builds an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load parses, connects, and compiles the descriptor at `path`,
    /// inserting (or replacing) it under its cluster name.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load<P: AsRef<Path>>(&self, path: P, opts: &kube_connect::Options) -> Result<()> {
        let started = std::time::Instant::now();
        let target = TargetCluster::load(path, opts).await?;
        let name = target.name().to_string();
        let size = {
            let mut targets = self.targets.write().expect("registry lock poisoned");
            targets.insert(name.clone(), Arc::new(target));
            targets.len()
        };
        metrics::gauge!("gateway_registry_size").set(size as f64);
        metrics::histogram!("gateway_reconcile_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(cluster = %name, "registered target cluster");
        Ok(())
    }

    /// Update re-runs the full construction sequence for the descriptor at
    /// `path` and replaces whatever was registered under its cluster name.
    /// Per §4.7, a failed reload leaves the cluster unregistered rather
    /// than serving stale state — "fail open" here means the gateway keeps
    /// running, not that the broken target lingers.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn update<P: AsRef<Path>>(&self, path: P, opts: &kube_connect::Options) -> Result<()> {
        let path = path.as_ref();
        let name = descriptor::cluster_name(path);
        self.targets.write().expect("registry lock poisoned").remove(&name);
        match self.load(path, opts).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(cluster = %name, error = %e, "reload failed; cluster is now unregistered");
                Err(e)
            }
        }
    }

    /// Remove drops the target registered under `name`. Removing an
    /// unknown name is a no-op; a warning is logged rather than returning
    /// an error, since the watcher can race a remove against a load it
    /// hasn't observed yet.
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str) {
        let (removed, size) = {
            let mut targets = self.targets.write().expect("registry lock poisoned");
            let removed = targets.remove(name);
            (removed, targets.len())
        };
        match removed {
            Some(target) => {
                metrics::gauge!("gateway_registry_size").set(size as f64);
                crate::target::close(&target);
                info!(cluster = %name, "removed target cluster");
            }
            None => warn!(cluster = %name, "remove requested for an unregistered cluster"),
        }
    }

    /// Get returns the current target for `name`, if registered.
    pub fn get(&self, name: &str) -> Option<SharedTarget> {
        self.targets.read().expect("registry lock poisoned").get(name).cloned()
    }

    /// Names lists every currently-registered cluster name, for
    /// introspection endpoints and tests.
    pub fn names(&self) -> Vec<String> {
        self.targets.read().expect("registry lock poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_unknown_name_is_a_no_op() {
        let registry = Registry::new();
        registry.remove("does-not-exist");
        assert!(registry.names().is_empty());
    }
}
