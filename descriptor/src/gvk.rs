//! Gvk holds the `x-kubernetes-group-version-kind` / `x-kubernetes-categories`
//! OpenAPI extensions the compiler reads off each definition.

use serde::{Deserialize, Serialize};

/// Gvk is a Kubernetes Group/Version/Kind triple.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    /// Group is the API group; the empty string denotes the core group.
    #[serde(default)]
    pub group: String,
    /// Version is the API version, e.g. "v1".
    pub version: String,
    /// Kind is the resource kind, e.g. "Pod".
    pub kind: String,
}

/// GvkExtension is the full `x-kubernetes-group-version-kind` /
/// `x-kubernetes-categories` / `x-kubernetes-scope` bundle read off a
/// definition schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GvkExtension {
    /// Gvks is the non-empty ordered sequence from
    /// `x-kubernetes-group-version-kind`; the first element is authoritative.
    #[serde(rename = "x-kubernetes-group-version-kind", default)]
    pub gvks: Vec<Gvk>,
    /// Categories is the optional `x-kubernetes-categories` sequence.
    #[serde(rename = "x-kubernetes-categories", default)]
    pub categories: Vec<String>,
    /// Scope is the optional `x-kubernetes-scope`; absent means
    /// cluster-scoped for resolver argument shaping.
    #[serde(rename = "x-kubernetes-scope", default)]
    pub scope: Option<Scope>,
}

impl GvkExtension {
    /// Primary returns the authoritative GVK for this definition, if any.
    pub fn primary(&self) -> Option<&Gvk> {
        self.gvks.first().filter(|g| !g.kind.is_empty())
    }

    /// Namespaced reports whether the resource requires a namespace
    /// argument. Absent scope defaults to cluster-scoped per spec.
    pub fn namespaced(&self) -> bool {
        matches!(self.scope, Some(Scope::Namespaced))
    }
}

/// Scope is the Kubernetes resource scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Namespaced resources require a namespace argument.
    Namespaced,
    /// Cluster resources are cluster-wide.
    Cluster,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scope_is_cluster_scoped() {
        let ext = GvkExtension::default();
        assert!(!ext.namespaced());
    }

    #[test]
    fn primary_requires_non_empty_kind() {
        let ext = GvkExtension {
            gvks: vec![Gvk {
                group: "apps".into(),
                version: "v1".into(),
                kind: String::new(),
            }],
            ..Default::default()
        };
        assert!(ext.primary().is_none());
    }
}
