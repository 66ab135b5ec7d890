//! The label-array special case, §4.5.2: a handful of `map[string]string`
//! fields whose keys may contain dots (illegal in GraphQL identifiers) are
//! represented as `[{key, value}]` instead of a plain map scalar.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Is_label_array_field decides, from the field's dotted path and the
/// enclosing type-name prefix, whether `field_path`/`prefix` names one of
/// the four special-cased fields.
pub fn is_label_array_field(field_path: &[String], prefix: &str) -> bool {
    let parent = field_path.len().checked_sub(2).and_then(|i| field_path.get(i));
    let leaf = field_path.last().map(String::as_str);

    match (parent.map(String::as_str), leaf) {
        (Some("metadata"), Some("labels")) | (Some("metadata"), Some("annotations")) => true,
        (Some("spec"), Some("nodeSelector")) => true,
        (Some("selector"), Some("matchLabels")) => true,
        _ => {
            // A type whose own name descends from ObjectMeta/meta_v1 also
            // counts as "parent is metadata" even when the path itself
            // doesn't literally contain the segment.
            (prefix.contains("ObjectMeta") || prefix.contains("meta_v1"))
                && matches!(leaf, Some("labels") | Some("annotations"))
        }
    }
}

/// Map_to_array converts a `map[string]string`-shaped JSON object into the
/// `[{key, value}]` array form used on the GraphQL output side. Non-string
/// values are skipped; callers only ever feed this label/annotation maps.
pub fn map_to_array(map: &Map<String, Value>) -> Vec<Value> {
    map.iter()
        .filter_map(|(k, v)| {
            let s = v.as_str()?;
            Some(serde_json::json!({ "key": k, "value": s }))
        })
        .collect()
}

/// Array_to_map reverses [`map_to_array`] for the write path: a GraphQL
/// `[{key, value}]` input becomes the `map[string]string` the Kubernetes API
/// expects. Entries missing `key` or `value` are skipped.
pub fn array_to_map(array: &[Value]) -> BTreeMap<String, String> {
    array
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let key = obj.get("key")?.as_str()?.to_string();
            let value = obj.get("value")?.as_str()?.to_string();
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segs: &[&str]) -> Vec<String> {
        segs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_metadata_labels_and_annotations() {
        assert!(is_label_array_field(&path(&["metadata", "labels"]), "Pod"));
        assert!(is_label_array_field(&path(&["metadata", "annotations"]), "Pod"));
        assert!(!is_label_array_field(&path(&["metadata", "name"]), "Pod"));
    }

    #[test]
    fn detects_spec_node_selector() {
        assert!(is_label_array_field(&path(&["spec", "nodeSelector"]), "PodSpec"));
        assert!(!is_label_array_field(&path(&["spec", "nodeName"]), "PodSpec"));
    }

    #[test]
    fn detects_selector_match_labels() {
        assert!(is_label_array_field(
            &path(&["spec", "selector", "matchLabels"]),
            "LabelSelector"
        ));
    }

    #[test]
    fn detects_via_type_name_prefix() {
        assert!(is_label_array_field(&path(&["labels"]), "io_k8s_apimachinery_pkg_apis_meta_v1_ObjectMeta"));
    }

    #[test]
    fn plain_string_maps_are_not_label_arrays() {
        assert!(!is_label_array_field(&path(&["data"]), "ConfigMap"));
    }

    #[test]
    fn map_array_round_trip() {
        let mut map = Map::new();
        map.insert("app.kubernetes.io/name".to_string(), Value::String("demo".to_string()));
        map.insert("tier".to_string(), Value::String("backend".to_string()));

        let array = map_to_array(&map);
        assert_eq!(array.len(), 2);

        let back = array_to_map(&array);
        assert_eq!(back.get("app.kubernetes.io/name").map(String::as_str), Some("demo"));
        assert_eq!(back.get("tier").map(String::as_str), Some("backend"));
    }
}
