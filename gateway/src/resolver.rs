//! The Resolver (C4): CRUD, list, yaml-export, and subscription field
//! factories wired onto a single cluster's `kube::Client`, operating on
//! unstructured objects per §4.4.

use std::{collections::BTreeMap, sync::Arc};

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputValue, ResolverContext, SubscriptionField, TypeRef};
use async_graphql::{Error as GqlError, Value as GqlValue};
use descriptor::Gvk;
use futures::StreamExt;
use inflector::Inflector;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::watcher::{self, Event},
    ResourceExt,
};
use schema_compiler::{RelationTarget, ResolverFactory};
use serde_json::Value as JsonValue;

use crate::subscribe::{differs, key, requested_paths, ActiveSubscriptionGuard, WatchState};

/// KubeResolvers implements [`ResolverFactory`] over one cluster's
/// `kube::Client`. One instance is shared by every field the compiler
/// wires to it, so it must be cheap to clone.
#[derive(Clone)]
pub struct KubeResolvers {
    client: kube::Client,
    group_names: Arc<BTreeMap<String, String>>,
}

impl KubeResolvers {
    /// New builds a resolver factory over `client`. `group_names` is the
    /// sanitised->original group map the compiler produced for this
    /// cluster's schema, used to reverse a group recorded on a live
    /// `*Ref` object.
    pub fn new(client: kube::Client, group_names: BTreeMap<String, String>) -> Self {
        Self {
            client,
            group_names: Arc::new(group_names),
        }
    }

    fn api(&self, gvk: &Gvk, namespaced: bool, namespace: Option<&str>) -> Api<DynamicObject> {
        let core_gvk = GroupVersionKind {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        };
        let plural = gvk.kind.to_plural().to_lowercase();
        let ar = ApiResource::from_gvk_with_plural(&core_gvk, &plural);
        match (namespaced, namespace) {
            (true, Some(ns)) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn reverse_group(&self, group: &str) -> String {
        self.group_names.get(group).cloned().unwrap_or_else(|| group.to_string())
    }
}

fn str_arg(ctx: &ResolverContext<'_>, name: &str) -> Option<String> {
    ctx.args.get(name).and_then(|v| v.string().ok()).map(str::to_string)
}

fn required_str_arg(ctx: &ResolverContext<'_>, name: &str) -> async_graphql::Result<String> {
    str_arg(ctx, name).ok_or_else(|| GqlError::new(format!("missing required argument `{name}`")))
}

fn object_arg(ctx: &ResolverContext<'_>, name: &str) -> async_graphql::Result<JsonValue> {
    let accessor = ctx
        .args
        .get(name)
        .ok_or_else(|| GqlError::new(format!("missing required argument `{name}`")))?;
    accessor
        .deserialize::<JsonValue>()
        .map_err(|e| GqlError::new(format!("invalid `{name}` payload: {e}")))
}

fn label_selector_arg(ctx: &ResolverContext<'_>) -> async_graphql::Result<Option<String>> {
    match str_arg(ctx, "labelSelector") {
        Some(selector) if selector.trim().is_empty() => Err(GqlError::new("labelSelector must not be blank")),
        other => Ok(other),
    }
}

fn json_field_value(v: JsonValue) -> FieldValue<'static> {
    FieldValue::owned_any(v)
}

impl ResolverFactory for KubeResolvers {
    fn list(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> Field {
        let resolver = self.clone();
        let gvk = gvk.clone();
        Field::new(field_name.to_string(), TypeRef::named_nn_list_nn(output_type.to_string()), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let namespace = str_arg(&ctx, "namespace");
                let selector = label_selector_arg(&ctx)?;
                let mut lp = ListParams::default();
                if let Some(selector) = &selector {
                    lp = lp.labels(selector);
                }
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                let list = api.list(&lp).await.map_err(|e| GqlError::new(e.to_string()))?;
                let items: Vec<FieldValue<'static>> = list
                    .items
                    .into_iter()
                    .map(|o| json_field_value(serde_json::to_value(o).unwrap_or(JsonValue::Null)))
                    .collect();
                Ok(Some(FieldValue::list(items)))
            })
        })
        .argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("labelSelector", TypeRef::named(TypeRef::STRING)))
    }

    fn get(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> Field {
        let resolver = self.clone();
        let gvk = gvk.clone();
        let field = Field::new(field_name.to_string(), TypeRef::named(output_type.to_string()), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let name = required_str_arg(&ctx, "name")?;
                let namespace = require_namespace_if_scoped(&ctx, namespaced)?;
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                match api.get_opt(&name).await.map_err(|e| GqlError::new(e.to_string()))? {
                    Some(obj) => Ok(Some(json_field_value(serde_json::to_value(obj).unwrap_or(JsonValue::Null)))),
                    None => Ok(None),
                }
            })
        });
        with_get_args(field)
    }

    fn get_yaml(&self, field_name: &str, gvk: &Gvk, namespaced: bool) -> Field {
        let resolver = self.clone();
        let gvk = gvk.clone();
        let field = Field::new(field_name.to_string(), TypeRef::named(TypeRef::STRING), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let name = required_str_arg(&ctx, "name")?;
                let namespace = require_namespace_if_scoped(&ctx, namespaced)?;
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                match api.get_opt(&name).await.map_err(|e| GqlError::new(e.to_string()))? {
                    Some(obj) => {
                        let yaml = serde_yaml::to_string(&obj).map_err(|e| GqlError::new(e.to_string()))?;
                        Ok(Some(FieldValue::value(GqlValue::String(yaml))))
                    }
                    None => Ok(None),
                }
            })
        });
        with_get_args(field)
    }

    fn create(&self, field_name: &str, gvk: &Gvk, namespaced: bool, input_type: &str, output_type: &str) -> Field {
        let resolver = self.clone();
        let gvk = gvk.clone();
        Field::new(field_name.to_string(), TypeRef::named_nn(output_type.to_string()), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let namespace = str_arg(&ctx, "namespace");
                let payload = object_arg(&ctx, "object")?;
                validate_create_name(&payload)?;

                let obj: DynamicObject = serde_json::from_value(payload).map_err(|e| GqlError::new(e.to_string()))?;
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                let created = api.create(&PostParams::default(), &obj).await.map_err(|e| GqlError::new(e.to_string()))?;
                Ok(Some(json_field_value(serde_json::to_value(created).unwrap_or(JsonValue::Null))))
            })
        })
        .argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("object", TypeRef::named_nn(input_type.to_string())))
    }

    fn update(&self, field_name: &str, gvk: &Gvk, namespaced: bool, input_type: &str, output_type: &str) -> Field {
        let resolver = self.clone();
        let gvk = gvk.clone();
        Field::new(field_name.to_string(), TypeRef::named_nn(output_type.to_string()), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let name = required_str_arg(&ctx, "name")?;
                let namespace = require_namespace_if_scoped(&ctx, namespaced)?;
                let payload = object_arg(&ctx, "object")?;
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                let patched = api
                    .patch(&name, &PatchParams::default(), &Patch::Merge(payload))
                    .await
                    .map_err(|e| GqlError::new(e.to_string()))?;
                Ok(Some(json_field_value(serde_json::to_value(patched).unwrap_or(JsonValue::Null))))
            })
        })
        .argument(InputValue::new("name", TypeRef::named_nn(TypeRef::STRING)))
        .argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("object", TypeRef::named_nn(input_type.to_string())))
    }

    fn delete(&self, field_name: &str, gvk: &Gvk, namespaced: bool) -> Field {
        let resolver = self.clone();
        let gvk = gvk.clone();
        let field = Field::new(field_name.to_string(), TypeRef::named_nn(TypeRef::BOOLEAN), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let name = required_str_arg(&ctx, "name")?;
                let namespace = require_namespace_if_scoped(&ctx, namespaced)?;
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                api.delete(&name, &DeleteParams::default()).await.map_err(|e| GqlError::new(e.to_string()))?;
                Ok(Some(FieldValue::value(GqlValue::Boolean(true))))
            })
        });
        with_get_args(field)
    }

    fn subscribe_single(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> SubscriptionField {
        let resolver = self.clone();
        let gvk = gvk.clone();
        let output_type = output_type.to_string();
        let field = SubscriptionField::new(field_name.to_string(), TypeRef::named(output_type), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let name = required_str_arg(&ctx, "name")?;
                let namespace = require_namespace_if_scoped(&ctx, namespaced)?;
                let subscribe_to_all = ctx.args.get("subscribeToAll").and_then(|v| v.boolean().ok()).unwrap_or(false);
                let paths = requested_paths(&ctx);
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                let watch_config = watcher::Config::default().fields(&format!("metadata.name={name}"));

                let stream = async_stream::try_stream! {
                    let _guard = ActiveSubscriptionGuard::new();
                    let mut state = WatchState::default();
                    let watch_key = key(namespace.as_deref(), &name);
                    let mut events = Box::pin(watcher::watcher(api, watch_config));
                    while let Some(event) = events.next().await {
                        let event = event.map_err(|e| GqlError::new(e.to_string()))?;
                        match event {
                            Event::Init | Event::InitApply(_) | Event::InitDone => {}
                            Event::Apply(obj) => {
                                let value = serde_json::to_value(obj).unwrap_or(JsonValue::Null);
                                let prior = state.get(&watch_key).cloned();
                                if differs(prior.as_ref(), Some(&value), &paths, subscribe_to_all) {
                                    state.record(watch_key.clone(), value.clone());
                                    yield json_field_value(value);
                                }
                            }
                            Event::Delete(_) => {
                                state.forget(&watch_key);
                                yield json_field_value(JsonValue::Null);
                            }
                        }
                    }
                };
                Ok(FieldValue::owned_any(stream))
            })
        });
        with_subscribe_args(field)
    }

    fn subscribe_collection(&self, field_name: &str, gvk: &Gvk, namespaced: bool, output_type: &str) -> SubscriptionField {
        let resolver = self.clone();
        let gvk = gvk.clone();
        let output_type = output_type.to_string();
        let field = SubscriptionField::new(field_name.to_string(), TypeRef::named_list(output_type), move |ctx| {
            let resolver = resolver.clone();
            let gvk = gvk.clone();
            FieldFuture::new(async move {
                let namespace = str_arg(&ctx, "namespace");
                let subscribe_to_all = ctx.args.get("subscribeToAll").and_then(|v| v.boolean().ok()).unwrap_or(false);
                let paths = requested_paths(&ctx);
                let selector = label_selector_arg(&ctx)?;
                let api = resolver.api(&gvk, namespaced, namespace.as_deref());
                let mut watch_config = watcher::Config::default();
                if let Some(selector) = &selector {
                    watch_config = watch_config.labels(selector);
                }

                let stream = async_stream::try_stream! {
                    let _guard = ActiveSubscriptionGuard::new();
                    let mut state = WatchState::default();
                    let mut events = Box::pin(watcher::watcher(api, watch_config));
                    while let Some(event) = events.next().await {
                        let event = event.map_err(|e| GqlError::new(e.to_string()))?;
                        match event {
                            Event::Init | Event::InitApply(_) | Event::InitDone => {}
                            Event::Apply(obj) => {
                                let value = serde_json::to_value(&obj).unwrap_or(JsonValue::Null);
                                let k = key(obj.namespace().as_deref(), &obj.name_any());
                                let prior = state.get(&k).cloned();
                                if differs(prior.as_ref(), Some(&value), &paths, subscribe_to_all) {
                                    state.record(k, value);
                                    yield FieldValue::list(state.values().into_iter().map(json_field_value));
                                }
                            }
                            Event::Delete(obj) => {
                                let k = key(obj.namespace().as_deref(), &obj.name_any());
                                state.forget(&k);
                                yield FieldValue::list(state.values().into_iter().map(json_field_value));
                            }
                        }
                    }
                };
                Ok(FieldValue::owned_any(stream))
            })
        });
        field
            .argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)))
            .argument(InputValue::new("labelSelector", TypeRef::named(TypeRef::STRING)))
            .argument(InputValue::new("subscribeToAll", TypeRef::named(TypeRef::BOOLEAN)))
    }

    fn relation(&self, target: &RelationTarget) -> Field {
        let resolver = self.clone();
        let target = target.clone();
        Field::new(target.field_name.clone(), TypeRef::named(target.type_name.clone()), move |ctx| {
            let resolver = resolver.clone();
            let target = target.clone();
            FieldFuture::new(async move {
                let parent = ctx.parent_value.try_downcast_ref::<JsonValue>()?;
                let Some(reference) = parent.get(format!("{}Ref", target.field_name)) else {
                    return Ok(None);
                };
                let name = reference.get("name").and_then(JsonValue::as_str).map(str::to_string);
                let Some(name) = name else { return Ok(None) };
                let namespace = reference.get("namespace").and_then(JsonValue::as_str).map(str::to_string);

                let mut gvk = target.gvk.clone();
                if let Some(kind) = reference.get("kind").and_then(JsonValue::as_str) {
                    gvk.kind = kind.to_string();
                }
                if let Some(group) = reference.get("apiGroup").and_then(JsonValue::as_str) {
                    gvk.group = resolver.reverse_group(group);
                }

                let api = resolver.api(&gvk, namespace.is_some(), namespace.as_deref());
                match api.get_opt(&name).await {
                    Ok(Some(obj)) => Ok(Some(json_field_value(serde_json::to_value(obj).unwrap_or(JsonValue::Null)))),
                    Ok(None) => Ok(None),
                    Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
                    Err(e) => Err(GqlError::new(e.to_string())),
                }
            })
        })
    }
}

fn with_get_args(field: Field) -> Field {
    field
        .argument(InputValue::new("name", TypeRef::named_nn(TypeRef::STRING)))
        .argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)))
}

fn with_subscribe_args(field: SubscriptionField) -> SubscriptionField {
    field
        .argument(InputValue::new("name", TypeRef::named_nn(TypeRef::STRING)))
        .argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)))
        .argument(InputValue::new("subscribeToAll", TypeRef::named(TypeRef::BOOLEAN)))
}

fn require_namespace_if_scoped(ctx: &ResolverContext<'_>, namespaced: bool) -> async_graphql::Result<Option<String>> {
    let namespace = str_arg(ctx, "namespace");
    if namespaced && namespace.as_deref().is_none_or(str::is_empty) {
        return Err(GqlError::new("namespace is required for a namespace-scoped resource"));
    }
    Ok(namespace)
}

fn validate_create_name(payload: &JsonValue) -> async_graphql::Result<()> {
    let metadata = payload.get("metadata");
    let has_name = metadata.and_then(|m| m.get("name")).and_then(JsonValue::as_str).is_some_and(|s| !s.is_empty());
    let has_generate_name = metadata
        .and_then(|m| m.get("generateName"))
        .and_then(JsonValue::as_str)
        .is_some_and(|s| !s.is_empty());
    if has_name || has_generate_name {
        Ok(())
    } else {
        Err(GqlError::new("metadata.name or metadata.generateName is required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_create_name_accepts_name() {
        assert!(validate_create_name(&json!({"metadata": {"name": "widget"}})).is_ok());
    }

    #[test]
    fn validate_create_name_accepts_generate_name() {
        assert!(validate_create_name(&json!({"metadata": {"generateName": "widget-"}})).is_ok());
    }

    #[test]
    fn validate_create_name_rejects_neither() {
        assert!(validate_create_name(&json!({"metadata": {}})).is_err());
        assert!(validate_create_name(&json!({})).is_err());
    }
}
