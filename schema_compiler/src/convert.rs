//! `convertType`, §4.5.1: recursive OpenAPI-schema-node -> paired
//! output/input GraphQL type IR, with `$ref` cycle safety and object-type
//! caching keyed by the generated type name.

use std::collections::{BTreeMap, HashSet};

use descriptor::DefinitionSet;
use serde_json::{Map, Value};

use crate::labels::is_label_array_field;
use crate::naming::sanitise;

/// ScalarKind enumerates the leaf GraphQL scalars `convertType` can emit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Boolean,
    /// A JSON-encoded string, emitted for OpenAPI `object` schemas with no
    /// declared shape.
    JsonString,
    /// A plain `map[string]string` that isn't one of the label-array
    /// special cases (§4.5.2).
    StringMap,
}

/// TypeRefIR is a reference to a GraphQL type: either a scalar, a list of
/// another type, or a named object/input-object registered in the
/// compiler's type cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRefIR {
    Scalar(ScalarKind),
    List(Box<TypeRefIR>),
    /// Named object type; look the fields up in the output or input cache
    /// (whichever side this reference was produced for) by this name.
    Object(String),
    /// The `[{key, value}]` shape from §4.5.2.
    LabelArray,
}

/// FieldIR is one field of a generated object or input-object type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldIR {
    pub name: String,
    pub ty: TypeRefIR,
}

/// ObjectTypeIR is a generated object (or input-object) type: a name and
/// its fields, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectTypeIR {
    pub name: String,
    pub fields: Vec<FieldIR>,
}

/// TypeCache holds the generated object types for one side (output or
/// input), keyed by generated type name. An absent key that is present in
/// `in_progress` means the placeholder has been reserved but the type isn't
/// built yet — callers referencing it mid-recursion get `Object(name)` and
/// resolve the fields once the cache is populated at the end of that
/// `convert_type` call.
#[derive(Default, Debug)]
pub struct TypeCache {
    pub types: BTreeMap<String, ObjectTypeIR>,
    in_progress: HashSet<String>,
}

impl TypeCache {
    fn reserve(&mut self, name: &str) -> bool {
        self.in_progress.insert(name.to_string())
    }

    fn complete(&mut self, ty: ObjectTypeIR) {
        self.in_progress.remove(&ty.name);
        self.types.insert(ty.name.clone(), ty);
    }
}

/// Convert_type implements the §4.5.1 table. `processing` tracks `$ref`
/// definition keys currently being resolved, for `$ref`-cycle safety;
/// `output_cache`/`input_cache` hold the generated object types, keyed by
/// name, for cycle-safe reuse of inline object types reached more than once
/// on the same path.
#[allow(clippy::too_many_arguments)]
pub fn convert_type(
    node: &Value,
    definitions: &DefinitionSet,
    prefix: &str,
    field_path: &[String],
    processing: &mut HashSet<String>,
    output_cache: &mut TypeCache,
    input_cache: &mut TypeCache,
) -> (TypeRefIR, TypeRefIR) {
    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        return convert_ref(reference, definitions, processing, output_cache, input_cache);
    }

    match node.get("type").and_then(Value::as_str) {
        Some("string") => scalar_pair(ScalarKind::String),
        Some("integer") => scalar_pair(ScalarKind::Int),
        Some("number") => scalar_pair(ScalarKind::Float),
        Some("boolean") => scalar_pair(ScalarKind::Boolean),
        Some("array") => {
            let items = node.get("items").cloned().unwrap_or(Value::Null);
            let (out, inp) = convert_type(
                &items,
                definitions,
                prefix,
                field_path,
                processing,
                output_cache,
                input_cache,
            );
            (TypeRefIR::List(Box::new(out)), TypeRefIR::List(Box::new(inp)))
        }
        Some("object") | None if node.get("properties").is_some() => convert_object(
            node.get("properties").and_then(Value::as_object),
            definitions,
            prefix,
            field_path,
            processing,
            output_cache,
            input_cache,
        ),
        Some("object") if additional_properties_is_string(node) => {
            if is_label_array_field(field_path, prefix) {
                (TypeRefIR::LabelArray, TypeRefIR::LabelArray)
            } else {
                scalar_pair(ScalarKind::StringMap)
            }
        }
        Some("object") | None if node.get("properties").is_none() && node.get("additionalProperties").is_none() => {
            scalar_pair(ScalarKind::JsonString)
        }
        _ => scalar_pair(ScalarKind::String),
    }
}

fn additional_properties_is_string(node: &Value) -> bool {
    node.get("additionalProperties")
        .and_then(|ap| ap.get("type"))
        .and_then(Value::as_str)
        == Some("string")
}

fn scalar_pair(kind: ScalarKind) -> (TypeRefIR, TypeRefIR) {
    (TypeRefIR::Scalar(kind.clone()), TypeRefIR::Scalar(kind))
}

fn type_name(prefix: &str, field_path: &[String]) -> String {
    sanitise(&format!("{prefix}{}", field_path.join("")))
}

#[allow(clippy::too_many_arguments)]
fn convert_object(
    properties: Option<&Map<String, Value>>,
    definitions: &DefinitionSet,
    prefix: &str,
    field_path: &[String],
    processing: &mut HashSet<String>,
    output_cache: &mut TypeCache,
    input_cache: &mut TypeCache,
) -> (TypeRefIR, TypeRefIR) {
    let name = type_name(prefix, field_path);

    let Some(properties) = properties else {
        return scalar_pair(ScalarKind::JsonString);
    };

    if !output_cache.reserve(&name) {
        // Already in progress (or already built) on this path; reuse the
        // name reference rather than recursing again.
        return (TypeRefIR::Object(name.clone()), TypeRefIR::Object(name));
    }
    input_cache.reserve(&name);

    let mut out_fields = Vec::with_capacity(properties.len());
    let mut in_fields = Vec::with_capacity(properties.len());

    for (field_name, field_schema) in properties {
        let mut child_path = field_path.to_vec();
        child_path.push(field_name.clone());

        let (out_ty, in_ty) = convert_type(
            field_schema,
            definitions,
            prefix,
            &child_path,
            processing,
            output_cache,
            input_cache,
        );
        out_fields.push(FieldIR {
            name: field_name.clone(),
            ty: out_ty,
        });
        in_fields.push(FieldIR {
            name: field_name.clone(),
            ty: in_ty,
        });
    }

    output_cache.complete(ObjectTypeIR {
        name: name.clone(),
        fields: out_fields,
    });
    input_cache.complete(ObjectTypeIR {
        name: name.clone(),
        fields: in_fields,
    });

    (TypeRefIR::Object(name.clone()), TypeRefIR::Object(name))
}

fn convert_ref(
    reference: &str,
    definitions: &DefinitionSet,
    processing: &mut HashSet<String>,
    output_cache: &mut TypeCache,
    input_cache: &mut TypeCache,
) -> (TypeRefIR, TypeRefIR) {
    let key = reference.rsplit('/').next().unwrap_or(reference).to_string();

    if processing.contains(&key) {
        return match output_cache.types.get(&key) {
            Some(_) => (TypeRefIR::Object(key.clone()), TypeRefIR::Object(key)),
            None => scalar_pair(ScalarKind::String),
        };
    }

    let Some(target) = definitions.get(&key) else {
        return scalar_pair(ScalarKind::String);
    };

    processing.insert(key.clone());
    let result = convert_type(
        target,
        definitions,
        &sanitise(&key),
        &[],
        processing,
        output_cache,
        input_cache,
    );
    processing.remove(&key);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_defs() -> DefinitionSet {
        DefinitionSet::new()
    }

    #[test]
    fn scalars_round_trip() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let (o, i) = convert_type(&json!({"type": "string"}), &defs, "X", &[], &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::Scalar(ScalarKind::String));
        assert_eq!(i, TypeRefIR::Scalar(ScalarKind::String));
    }

    #[test]
    fn array_wraps_item_type() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"type": "array", "items": {"type": "integer"}});
        let (o, _) = convert_type(&node, &defs, "X", &[], &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::List(Box::new(TypeRefIR::Scalar(ScalarKind::Int))));
    }

    #[test]
    fn object_with_properties_is_named_and_cached() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"type": "object", "properties": {"foo": {"type": "string"}}});
        let path = vec!["spec".to_string()];
        let (o, _) = convert_type(&node, &defs, "Widget", &path, &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::Object("Widgetspec".to_string()));
        assert!(out.types.contains_key("Widgetspec"));
        assert_eq!(out.types["Widgetspec"].fields[0].name, "foo");
    }

    #[test]
    fn empty_object_is_json_string() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"type": "object"});
        let (o, _) = convert_type(&node, &defs, "X", &[], &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::Scalar(ScalarKind::JsonString));
    }

    #[test]
    fn string_map_additional_properties() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"type": "object", "additionalProperties": {"type": "string"}});
        let (o, _) = convert_type(&node, &defs, "ConfigMap", &["data".to_string()], &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::Scalar(ScalarKind::StringMap));
    }

    #[test]
    fn label_fields_become_label_array() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"type": "object", "additionalProperties": {"type": "string"}});
        let path = vec!["metadata".to_string(), "labels".to_string()];
        let (o, i) = convert_type(&node, &defs, "Pod", &path, &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::LabelArray);
        assert_eq!(i, TypeRefIR::LabelArray);
    }

    #[test]
    fn unresolvable_ref_is_string_sentinel() {
        let defs = empty_defs();
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"$ref": "#/definitions/does.not.Exist"});
        let (o, _) = convert_type(&node, &defs, "X", &[], &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::Scalar(ScalarKind::String));
    }

    #[test]
    fn self_referential_ref_breaks_cycle() {
        let mut defs = empty_defs();
        defs.insert(
            "self.Node".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "child": {"$ref": "#/definitions/self.Node"}
                }
            }),
        );
        let mut out = TypeCache::default();
        let mut inp = TypeCache::default();
        let mut proc = HashSet::new();

        let node = json!({"$ref": "#/definitions/self.Node"});
        let (o, _) = convert_type(&node, &defs, "X", &[], &mut proc, &mut out, &mut inp);
        assert_eq!(o, TypeRefIR::Object("self_Node".to_string()));
        assert!(out.types.contains_key("self_Node"));
    }
}
