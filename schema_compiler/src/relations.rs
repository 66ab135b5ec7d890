//! Relation enhancement, §4.5.3: every `*Ref` property gets a sibling field
//! resolved by scanning all definitions for the one whose primary GVK kind
//! matches the `*Ref`'s base name.

use descriptor::{DefinitionSet, Gvk, GvkExtension};
use serde_json::Value;

/// ResourceIndex maps a Title-cased Kind to the GVK and emitted type name
/// of the definition that first claimed it, built by a single pass over all
/// definitions before relation enhancement runs.
#[derive(Default, Debug)]
pub struct ResourceIndex {
    by_kind: std::collections::BTreeMap<String, (Gvk, String)>,
}

impl ResourceIndex {
    /// Build scans `definitions`, recording the first definition whose
    /// `x-kubernetes-group-version-kind[0].kind` equals each Kind seen, paired
    /// with the GraphQL type name the caller assigns it (`emitted_name`).
    pub fn build<'a>(
        definitions: &'a DefinitionSet,
        emitted_name: impl Fn(&'a str, &'a Value) -> Option<String>,
    ) -> Self {
        let mut by_kind = std::collections::BTreeMap::new();
        for (key, def) in definitions {
            let Some(ext) = extension_of(def) else { continue };
            let Some(gvk) = ext.primary().cloned() else { continue };
            let Some(name) = emitted_name(key, def) else { continue };
            by_kind.entry(gvk.kind.clone()).or_insert((gvk, name));
        }
        Self { by_kind }
    }

    /// Resolve looks up the emitted type and GVK for a Title-cased base
    /// name (the `*Ref` property name with the `Ref` suffix stripped).
    pub fn resolve(&self, title_cased_base: &str) -> Option<&(Gvk, String)> {
        self.by_kind.get(title_cased_base)
    }
}

fn extension_of(def: &Value) -> Option<GvkExtension> {
    serde_json::from_value(def.clone()).ok()
}

/// Base_name_for_ref_property strips a trailing `Ref` from a property name
/// and title-cases the result, e.g. `secretRef` -> `Secret`.
pub fn base_name_for_ref_property(property_name: &str) -> Option<String> {
    let base = property_name.strip_suffix("Ref")?;
    if base.is_empty() {
        return None;
    }
    let mut chars = base.chars();
    let first = chars.next()?.to_ascii_uppercase();
    Some(std::iter::once(first).chain(chars).collect())
}

/// RelationTarget is what a `*Ref` sibling field resolves to: the emitted
/// GraphQL type name to attach and the GVK the resolver should fetch under
/// (unless the `*Ref` object overrides it at read time).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationTarget {
    pub field_name: String,
    pub type_name: String,
    pub gvk: Gvk,
}

/// Find_relation resolves one `*Ref` property against the index, returning
/// the sibling field to attach or `None` if no definition claims that Kind.
pub fn find_relation(property_name: &str, index: &ResourceIndex) -> Option<RelationTarget> {
    let base = base_name_for_ref_property(property_name)?;
    let (gvk, type_name) = index.resolve(&base)?;
    Some(RelationTarget {
        field_name: base,
        type_name: type_name.clone(),
        gvk: gvk.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_ref_and_title_cases() {
        assert_eq!(base_name_for_ref_property("secretRef").as_deref(), Some("Secret"));
        assert_eq!(base_name_for_ref_property("configMapRef").as_deref(), Some("ConfigMap"));
        assert_eq!(base_name_for_ref_property("Ref"), None);
        assert_eq!(base_name_for_ref_property("name"), None);
    }

    #[test]
    fn resolves_against_matching_definition() {
        let mut defs = DefinitionSet::new();
        defs.insert(
            "io.k8s.api.core.v1.Secret".to_string(),
            json!({
                "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Secret"}]
            }),
        );

        let index = ResourceIndex::build(&defs, |key, _| Some(key.rsplit('.').next().unwrap().to_string()));
        let target = find_relation("secretRef", &index).expect("should resolve");
        assert_eq!(target.type_name, "Secret");
        assert_eq!(target.gvk.kind, "Secret");
    }

    #[test]
    fn unmatched_ref_property_yields_no_relation() {
        let defs = DefinitionSet::new();
        let index = ResourceIndex::build(&defs, |key, _| Some(key.to_string()));
        assert!(find_relation("widgetRef", &index).is_none());
    }

    #[test]
    fn first_claim_wins_on_duplicate_kind() {
        let mut defs = DefinitionSet::new();
        defs.insert(
            "v1.Secret".to_string(),
            json!({"x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Secret"}]}),
        );
        defs.insert(
            "v2.Secret".to_string(),
            json!({"x-kubernetes-group-version-kind": [{"group": "other", "version": "v2", "kind": "Secret"}]}),
        );

        let index = ResourceIndex::build(&defs, |key, _| Some(key.to_string()));
        let target = find_relation("secretRef", &index).unwrap();
        assert_eq!(target.type_name, "v1.Secret", "BTreeMap iteration is key-ordered; v1 < v2");
    }
}
