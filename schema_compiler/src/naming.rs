//! Sanitisation and the two name registries from §3: the group-name
//! registry (sanitised group -> original) and the kind-name registry (Kind
//! -> group/version of the first claimant, with conflict-driven renaming).

use std::collections::BTreeMap;

/// Sanitise transforms a string into the identifier grammar
/// `[A-Za-z_][A-Za-z0-9_]*`: every character outside `[A-Za-z0-9_]` becomes
/// `_`, and a leading character that isn't a letter or underscore gets a `_`
/// prepended.
pub fn sanitise(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if !out.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
        out.insert(0, '_');
    }
    out
}

/// Sanitise_group is [`sanitise`] plus the core-group substitution: an empty
/// group becomes the literal `core`.
pub fn sanitise_group(group: &str) -> String {
    if group.is_empty() {
        "core".to_string()
    } else {
        sanitise(group)
    }
}

/// GroupRegistry maps sanitised group name back to the original group
/// string. Sanitisation is idempotent through the registry: the first
/// writer for a sanitised name wins, and all later reads of that sanitised
/// name return the first writer's original group — collisions are
/// impossible because a second write for the same sanitised key is a no-op.
#[derive(Default, Debug)]
pub struct GroupRegistry {
    sanitised_to_original: BTreeMap<String, String>,
}

impl GroupRegistry {
    /// Register records `group`'s sanitised form (inserting only on first
    /// sight) and returns the sanitised name.
    pub fn register(&mut self, group: &str) -> String {
        let sanitised = sanitise_group(group);
        self.sanitised_to_original
            .entry(sanitised.clone())
            .or_insert_with(|| group.to_string());
        sanitised
    }

    /// Original reverses a sanitised group name back to what was registered
    /// for it.
    pub fn original(&self, sanitised: &str) -> Option<&str> {
        self.sanitised_to_original.get(sanitised).map(String::as_str)
    }

    /// Into_map hands back the full sanitised->original table, for callers
    /// outside the compiler (the resolver's relation-fetch path) that need
    /// to reverse a sanitised group name read off a live object.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.sanitised_to_original
    }
}

/// KindRegistry maps `Kind` to the group/version of the first definition
/// that claimed it. A second claim with a different group/version does not
/// displace the first; the *conflicting* type is the one renamed.
#[derive(Default, Debug)]
pub struct KindRegistry {
    claims: BTreeMap<String, (String, String)>,
}

impl KindRegistry {
    /// Claim registers `kind` for the given `(group, version)` and returns
    /// the GraphQL type name to use: `kind` itself if this is the first
    /// claim (or a repeat claim by the same group/version), otherwise
    /// `Kind_<sanitised-group>_<version>`.
    pub fn claim(&mut self, kind: &str, group: &str, version: &str) -> String {
        match self.claims.get(kind) {
            None => {
                self.claims
                    .insert(kind.to_string(), (group.to_string(), version.to_string()));
                kind.to_string()
            }
            Some((g, v)) if g == group && v == version => kind.to_string(),
            Some(_) => format!("{kind}_{}_{}", sanitise_group(group), sanitise(version)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitise_replaces_illegal_characters() {
        assert_eq!(sanitise("apps.k8s.io"), "apps_k8s_io");
        assert_eq!(sanitise("9lives"), "_9lives");
        assert_eq!(sanitise("valid_name"), "valid_name");
    }

    #[test]
    fn sanitise_group_substitutes_core() {
        assert_eq!(sanitise_group(""), "core");
        assert_eq!(sanitise_group("apps"), "apps");
    }

    #[test]
    fn group_registry_round_trip_for_all_groups() {
        let groups = ["", "apps", "apps.k8s.io", "9weird", "rbac.authorization.k8s.io"];
        let mut reg = GroupRegistry::default();
        for g in groups {
            let s = reg.register(g);
            assert_eq!(reg.original(&s), Some(g));
        }
    }

    #[test]
    fn group_registry_first_writer_wins_on_collision() {
        let mut reg = GroupRegistry::default();
        let a = reg.register("a.b");
        let b = reg.register("a-b");
        assert_eq!(a, b, "both sanitise to the same name");
        assert_eq!(reg.original(&a), Some("a.b"), "first writer wins");
    }

    #[test]
    fn kind_registry_first_claim_keeps_name() {
        let mut reg = KindRegistry::default();
        assert_eq!(reg.claim("Pod", "", "v1"), "Pod");
        assert_eq!(reg.claim("Pod", "", "v1"), "Pod", "repeat claim, same gvk");
    }

    #[test]
    fn kind_registry_renames_on_conflict() {
        let mut reg = KindRegistry::default();
        assert_eq!(reg.claim("Widget", "example.com", "v1"), "Widget");
        assert_eq!(
            reg.claim("Widget", "example.org", "v2"),
            "Widget_example_org_v2"
        );
        // The original claimant is untouched by the later conflict.
        assert_eq!(reg.claim("Widget", "example.com", "v1"), "Widget");
    }
}
