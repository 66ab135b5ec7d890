//! Compiles a Kubernetes OpenAPI `definitions` map into a GraphQL schema:
//! one `Query`/`Mutation`/`Subscription` root per cluster, grouped by API
//! group, with operation fields wired to resolvers the caller supplies.
//!
//! `schema_compiler` never talks to a cluster itself — it only decides the
//! schema's shape. The actual Kubernetes calls are built by whatever
//! implements [`ResolverFactory`], which keeps this crate's only dependency
//! pointed at [`descriptor`] rather than back at the gateway binary that
//! uses it.

mod convert;
mod labels;
mod lower;
mod naming;
mod relations;

use std::collections::BTreeMap;

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputValue, Object, Schema, SubscriptionField, TypeRef};
use descriptor::{DefinitionSet, Gvk, GvkExtension, Scope};
use inflector::Inflector;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use convert::{convert_type, TypeCache};
use naming::{GroupRegistry, KindRegistry};
use relations::{base_name_for_ref_property, find_relation, ResourceIndex, RelationTarget};

pub use convert::{FieldIR, ObjectTypeIR, ScalarKind, TypeRefIR};
pub use relations::RelationTarget as Relation;

/// Error covers schema-assembly failures; per-definition problems are
/// logged and the definition is skipped (§4.5 never aborts the whole
/// compile over one malformed resource).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("assembling dynamic schema: {0}")]
    Build(#[from] async_graphql::dynamic::SchemaError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// CategoryEntry is one `[{group, version, kind, scope}]` member of the
/// `typeByCategory` map the `TypeByCategory` query root field serves.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CategoryEntry {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Scope is `"Namespaced"` or `"Cluster"`, mirroring the descriptor's
    /// `x-kubernetes-scope` extension verbatim rather than collapsing it to
    /// a bool.
    pub scope: String,
}

fn scope_name(scope: Option<Scope>) -> String {
    match scope {
        Some(Scope::Namespaced) => "Namespaced".to_string(),
        Some(Scope::Cluster) | None => "Cluster".to_string(),
    }
}

/// Name of the GraphQL object type `typeByCategory` resolves to.
const CATEGORY_ENTRY_TYPE: &str = "CategoryEntry";

/// CompiledSchema bundles the finished schema with the category map the
/// `TypeByCategory` resolver reads.
pub struct CompiledSchema {
    pub schema: Schema,
    pub type_by_category: BTreeMap<String, Vec<CategoryEntry>>,
    /// Group_names maps sanitised GraphQL group name back to the real
    /// Kubernetes API group, for resolvers that need to reverse a group
    /// recorded on a live object (§4.5.3's `*Ref` reversal).
    pub group_names: BTreeMap<String, String>,
}

/// ResolverFactory is implemented by the crate that owns a live
/// `kube::Client`. Each method returns a fully configured field — argument
/// shapes included — for one resource's operation; `schema_compiler` only
/// decides where that field is attached.
pub trait ResolverFactory: Send + Sync {
    fn list(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> Field;
    fn get(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> Field;
    fn get_yaml(&self, field_name: &str, gvk: &Gvk, namespaced: bool) -> Field;
    fn create(&self, field_name: &str, gvk: &Gvk, namespaced: bool, input_type: &str, output_type: &str) -> Field;
    fn update(&self, field_name: &str, gvk: &Gvk, namespaced: bool, input_type: &str, output_type: &str) -> Field;
    fn delete(&self, field_name: &str, gvk: &Gvk, namespaced: bool) -> Field;
    fn subscribe_single(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> SubscriptionField;
    fn subscribe_collection(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> SubscriptionField;
    /// Relation builds the sibling field a `*Ref` property gets augmented
    /// with (§4.5.3): a Get-style fetch against `target`'s GVK, degrading
    /// `NotFound` to `nil`. The field is named `target.field_name`.
    fn relation(&self, target: &RelationTarget) -> Field;
}

/// Compiler owns the two name registries and the two type caches for one
/// compilation. A fresh `Compiler` is built per call to [`compile`]; nothing
/// about it is reused across clusters.
#[derive(Default)]
struct Compiler {
    groups: GroupRegistry,
    kinds: KindRegistry,
    output_cache: TypeCache,
    input_cache: TypeCache,
    type_by_category: BTreeMap<String, Vec<CategoryEntry>>,
}

struct Resource {
    gvk: Gvk,
    group: String,
    singular: String,
    plural: String,
    namespaced: bool,
}

/// Compile implements §4.5: group resources by sanitised GVK group, convert
/// each resource's schema, and wire the standard operation fields via
/// `factory`.
#[instrument(skip_all, fields(definitions = definitions.len()))]
pub fn compile(definitions: &DefinitionSet, factory: &dyn ResolverFactory) -> Result<CompiledSchema> {
    let mut compiler = Compiler::default();
    let mut resources = Vec::new();

    for (key, node) in definitions {
        let Some(ext) = gvk_extension(node) else { continue };
        let Some(gvk) = ext.primary().cloned() else { continue };
        if gvk.kind.ends_with("List") {
            continue;
        }

        let group = compiler.groups.register(&gvk.group);
        let singular = compiler.kinds.claim(&gvk.kind, &gvk.group, &gvk.version);
        let plural = singular.to_plural();
        let namespaced = ext.namespaced();

        for category in &ext.categories {
            compiler.type_by_category.entry(category.clone()).or_default().push(CategoryEntry {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
                scope: scope_name(ext.scope),
            });
        }

        let mut processing = std::collections::HashSet::new();
        convert_type(
            node,
            definitions,
            &singular,
            &[],
            &mut processing,
            &mut compiler.output_cache,
            &mut compiler.input_cache,
        );

        debug!(kind = %gvk.kind, %group, %singular, %plural, "registered resource");

        resources.push((
            key.clone(),
            Resource {
                gvk,
                group,
                singular,
                plural,
                namespaced,
            },
        ));
    }

    attach_metadata_field(&mut compiler);

    let index = ResourceIndex::build(definitions, |_key, node| {
        gvk_extension(node).and_then(|ext| ext.primary().map(|g| g.kind.clone()))
    });
    let relation_fields = augment_relations(&mut compiler, factory, &index);

    let mut group_query: BTreeMap<String, Object> = BTreeMap::new();
    let mut group_mutation: BTreeMap<String, Object> = BTreeMap::new();
    let mut subscription = lower::empty_subscription();

    for (_, res) in &resources {
        let q = group_query.remove(&res.group).unwrap_or_else(|| Object::new(carrier_name(&res.group, "Query")));
        let m = group_mutation.remove(&res.group).unwrap_or_else(|| Object::new(carrier_name(&res.group, "Mutation")));

        let q = q
            .field(factory.list(&res.plural, &res.gvk, res.namespaced, &res.singular))
            .field(factory.get(&res.singular, &res.gvk, res.namespaced, &res.singular))
            .field(factory.get_yaml(&format!("{}Yaml", res.singular), &res.gvk, res.namespaced));

        let m = m
            .field(factory.create(
                &format!("create{}", title_case(&res.singular)),
                &res.gvk,
                res.namespaced,
                &res.singular,
                &res.singular,
            ))
            .field(factory.update(
                &format!("update{}", title_case(&res.singular)),
                &res.gvk,
                res.namespaced,
                &res.singular,
                &res.singular,
            ))
            .field(factory.delete(&format!("delete{}", title_case(&res.singular)), &res.gvk, res.namespaced));

        group_query.insert(res.group.clone(), q);
        group_mutation.insert(res.group.clone(), m);

        subscription = subscription
            .field(factory.subscribe_single(
                &format!("{}_{}", res.group, res.singular),
                &res.gvk,
                res.namespaced,
                &res.singular,
            ))
            .field(factory.subscribe_collection(
                &format!("{}_{}", res.group, res.plural),
                &res.gvk,
                res.namespaced,
                &res.singular,
            ));
    }

    let mut root_query = Object::new("Query").field(type_by_category_field(&compiler.type_by_category));
    let mut root_mutation = Object::new("Mutation");

    let mut builder = Schema::build("Query", Some("Mutation"), Some("Subscription"));
    builder = lower::register_scalars(builder);
    builder = register_category_entry_type(builder);
    builder = lower::register_object_types(builder, &compiler.output_cache, relation_fields);
    builder = lower::register_input_types(builder, &compiler.input_cache);

    for (group, obj) in group_query {
        let type_name = carrier_name(&group, "Query");
        root_query = root_query.field(Field::new(group.clone(), TypeRef::named_nn(type_name), |_ctx| {
            FieldFuture::new(async move { Ok(Some(FieldValue::NULL)) })
        }));
        builder = builder.register(obj);
    }
    for (group, obj) in group_mutation {
        let type_name = carrier_name(&group, "Mutation");
        root_mutation = root_mutation.field(Field::new(group.clone(), TypeRef::named_nn(type_name), |_ctx| {
            FieldFuture::new(async move { Ok(Some(FieldValue::NULL)) })
        }));
        builder = builder.register(obj);
    }

    builder = builder.register(root_query).register(root_mutation).register(subscription);

    let schema = builder.finish()?;
    Ok(CompiledSchema {
        schema,
        type_by_category: compiler.type_by_category,
        group_names: compiler.groups.into_map(),
    })
}

fn gvk_extension(node: &Value) -> Option<GvkExtension> {
    serde_json::from_value(node.clone()).ok()
}

fn carrier_name(group: &str, suffix: &str) -> String {
    format!("{}{}", title_case(group), suffix)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn attach_metadata_field(compiler: &mut Compiler) {
    let metadata = ObjectTypeIR {
        name: "Metadata".to_string(),
        fields: vec![
            FieldIR { name: "name".to_string(), ty: TypeRefIR::Scalar(ScalarKind::String) },
            FieldIR { name: "namespace".to_string(), ty: TypeRefIR::Scalar(ScalarKind::String) },
            FieldIR { name: "labels".to_string(), ty: TypeRefIR::LabelArray },
            FieldIR { name: "annotations".to_string(), ty: TypeRefIR::LabelArray },
        ],
    };
    compiler.output_cache.types.insert(metadata.name.clone(), metadata.clone());
    compiler.input_cache.types.insert(metadata.name.clone(), metadata);
}

fn augment_relations(compiler: &mut Compiler, factory: &dyn ResolverFactory, index: &ResourceIndex) -> lower::FieldOverrides {
    let mut overrides = lower::FieldOverrides::new();
    let names: Vec<String> = compiler.output_cache.types.keys().cloned().collect();
    for name in names {
        let ref_fields: Vec<String> = compiler.output_cache.types[&name]
            .fields
            .iter()
            .filter_map(|f| {
                if f.name.ends_with("Ref") && base_name_for_ref_property(&f.name).is_some() {
                    Some(f.name.clone())
                } else {
                    None
                }
            })
            .collect();

        for ref_field in ref_fields {
            let Some(target) = find_relation(&ref_field, index) else {
                continue;
            };
            let ty = compiler.output_cache.types.get_mut(&name).expect("just read this key");
            if !ty.fields.iter().any(|f| f.name == target.field_name) {
                ty.fields.push(FieldIR {
                    name: target.field_name.clone(),
                    ty: TypeRefIR::Object(target.type_name.clone()),
                });
            }
            overrides.insert((name.clone(), target.field_name.clone()), factory.relation(&target));
        }
    }
    overrides
}

/// Register_category_entry_type adds the `CategoryEntry` object `typeByCategory`
/// resolves to: a plain JSON passthrough, same pattern as the generated
/// resource types in `lower::register_object_types`.
fn register_category_entry_type(builder: async_graphql::dynamic::SchemaBuilder) -> async_graphql::dynamic::SchemaBuilder {
    let mut obj = Object::new(CATEGORY_ENTRY_TYPE);
    for field in ["group", "version", "kind", "scope"] {
        obj = obj.field(Field::new(field, TypeRef::named_nn(TypeRef::STRING), move |ctx| {
            FieldFuture::new(async move { resolve_category_field(&ctx, field) })
        }));
    }
    builder.register(obj)
}

fn resolve_category_field(
    ctx: &async_graphql::dynamic::ResolverContext<'_>,
    field: &str,
) -> async_graphql::Result<Option<FieldValue<'static>>> {
    let parent = ctx.parent_value.try_downcast_ref::<Value>()?;
    Ok(parent
        .get(field)
        .and_then(Value::as_str)
        .map(|s| FieldValue::value(async_graphql::Value::String(s.to_string()))))
}

fn type_by_category_field(map: &BTreeMap<String, Vec<CategoryEntry>>) -> Field {
    let map = map.clone();
    Field::new(
        "typeByCategory",
        TypeRef::named_list(CATEGORY_ENTRY_TYPE),
        move |ctx| {
            let map = map.clone();
            FieldFuture::new(async move {
                let name: String = ctx.args.try_get("name")?.string()?.to_string();
                let entries = map.get(&name).cloned().unwrap_or_default();
                if entries.is_empty() {
                    warn!(category = %name, "no resources registered under this category");
                }
                let values = entries
                    .iter()
                    .map(|e| FieldValue::owned_any(serde_json::to_value(e).unwrap_or_default()))
                    .collect::<Vec<_>>();
                Ok(Some(FieldValue::list(values)))
            })
        },
    )
    .argument(InputValue::new("name", TypeRef::named_nn(TypeRef::STRING)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::dynamic::FieldFuture as TestFieldFuture;
    use async_graphql::Value as GqlValue;

    struct NullFactory;

    impl ResolverFactory for NullFactory {
        fn list(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool, output_type: &str) -> Field {
            Field::new(field_name.to_string(), TypeRef::named_list(output_type.to_string()), |_| {
                TestFieldFuture::new(async move { Ok(Some(FieldValue::list(Vec::<GqlValue>::new()))) })
            })
        }
        fn get(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool, output_type: &str) -> Field {
            Field::new(field_name.to_string(), TypeRef::named(output_type.to_string()), |_| {
                TestFieldFuture::new(async move { Ok(None) })
            })
        }
        fn get_yaml(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool) -> Field {
            Field::new(field_name.to_string(), TypeRef::named(TypeRef::STRING), |_| {
                TestFieldFuture::new(async move { Ok(None) })
            })
        }
        fn create(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool, _input_type: &str, output_type: &str) -> Field {
            Field::new(field_name.to_string(), TypeRef::named(output_type.to_string()), |_| {
                TestFieldFuture::new(async move { Ok(None) })
            })
        }
        fn update(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool, _input_type: &str, output_type: &str) -> Field {
            Field::new(field_name.to_string(), TypeRef::named(output_type.to_string()), |_| {
                TestFieldFuture::new(async move { Ok(None) })
            })
        }
        fn delete(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool) -> Field {
            Field::new(field_name.to_string(), TypeRef::named(TypeRef::BOOLEAN), |_| {
                TestFieldFuture::new(async move { Ok(None) })
            })
        }
        fn subscribe_single(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool, output_type: &str) -> SubscriptionField {
            SubscriptionField::new(field_name.to_string(), TypeRef::named(output_type.to_string()), |_| {
                TestFieldFuture::new(async move {
                    Ok(FieldValue::owned_any(futures::stream::empty::<async_graphql::Result<FieldValue<'static>>>()))
                })
            })
        }
        fn subscribe_collection(&self, field_name: &str, _gvk: &Gvk, _namespaced: bool, output_type: &str) -> SubscriptionField {
            SubscriptionField::new(field_name.to_string(), TypeRef::named_list(output_type.to_string()), |_| {
                TestFieldFuture::new(async move {
                    Ok(FieldValue::owned_any(futures::stream::empty::<async_graphql::Result<FieldValue<'static>>>()))
                })
            })
        }
        fn relation(&self, target: &RelationTarget) -> Field {
            let type_name = target.type_name.clone();
            Field::new(target.field_name.clone(), TypeRef::named(type_name.clone()), move |_| {
                let type_name = type_name.clone();
                TestFieldFuture::new(async move {
                    let _ = &type_name;
                    Ok(None)
                })
            })
        }
    }

    fn pod_definition() -> DefinitionSet {
        let mut defs = DefinitionSet::new();
        defs.insert(
            "io.k8s.api.core.v1.Pod".to_string(),
            serde_json::json!({
                "type": "object",
                "properties": {
                    "spec": {
                        "type": "object",
                        "properties": {
                            "nodeName": {"type": "string"}
                        }
                    }
                },
                "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Pod"}],
                "x-kubernetes-scope": "Namespaced"
            }),
        );
        defs
    }

    #[test]
    fn compile_registers_core_group_and_pluralises() {
        let defs = pod_definition();
        let compiled = compile(&defs, &NullFactory).expect("compiles");
        assert!(compiled.type_by_category.is_empty());
    }

    #[test]
    fn list_definitions_are_skipped() {
        let mut defs = pod_definition();
        defs.insert(
            "io.k8s.api.core.v1.PodList".to_string(),
            serde_json::json!({
                "type": "object",
                "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "PodList"}]
            }),
        );
        let compiled = compile(&defs, &NullFactory).expect("compiles");
        assert!(compiled.type_by_category.is_empty());
    }

    #[test]
    fn categories_are_recorded() {
        let mut defs = DefinitionSet::new();
        defs.insert(
            "io.k8s.api.core.v1.Pod".to_string(),
            serde_json::json!({
                "type": "object",
                "properties": {},
                "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Pod"}],
                "x-kubernetes-categories": ["all"]
            }),
        );
        let compiled = compile(&defs, &NullFactory).expect("compiles");
        let entries = compiled.type_by_category.get("all").expect("category recorded");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].scope, "Cluster", "absent x-kubernetes-scope defaults to cluster-scoped");
    }

    #[test]
    fn category_entries_carry_namespaced_scope() {
        let mut defs = pod_definition();
        defs.get_mut("io.k8s.api.core.v1.Pod")
            .unwrap()
            .as_object_mut()
            .unwrap()
            .insert("x-kubernetes-categories".to_string(), serde_json::json!(["all"]));
        let compiled = compile(&defs, &NullFactory).expect("compiles");
        let entries = compiled.type_by_category.get("all").expect("category recorded");
        assert_eq!(entries[0].scope, "Namespaced");
        assert_eq!(entries[0].kind, "Pod");
    }
}
