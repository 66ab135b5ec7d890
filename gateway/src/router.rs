//! Router (C9): the single HTTP entrypoint. One handler implements §4.9's
//! numbered steps end to end — CORS, path parsing, cluster lookup, auth
//! enforcement, and dispatch to either a plain POST response or an SSE
//! subscription stream.

use std::sync::Arc;

use async_graphql::Request as GraphQlRequest;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event as SseEvent, Sse},
        Html, IntoResponse, Response,
    },
    routing::{any, get},
    Json, Router,
};
use futures::StreamExt;
use kube_connect::RequestIdentity;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::registry::Registry;
use crate::target::SharedTarget;

/// CorsConfig mirrors `Gateway.Cors.{Enabled,AllowedOrigins,AllowedHeaders}`.
#[derive(Clone, Debug, Default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
}

/// Config is the router's slice of the gateway's command-line options.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub local_development: bool,
    pub enable_kcp: bool,
    pub introspection_authentication: bool,
    pub cors: CorsConfig,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    config: Config,
}

/// Build assembles the axum `Router` implementing the gateway's GraphQL
/// surface. `healthz`/metrics live on a separate bind address (see
/// `main.rs`), so they aren't part of this router.
pub fn build(registry: Arc<Registry>, config: Config) -> Router {
    let state = AppState { registry, config };
    Router::new().route("/{*path}", any(handle)).layer(TraceLayer::new_for_http()).with_state(state)
}

#[instrument(skip_all, fields(path = %path, method = %method))]
async fn handle(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cors_headers = cors_response_headers(&state.config.cors, &headers);

    if method == Method::OPTIONS {
        let mut resp = StatusCode::OK.into_response();
        apply_headers(resp.headers_mut(), &cors_headers);
        return resp;
    }

    let Some(route) = parse_route(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(target) = state.registry.get(&route.cluster_key) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut resp = match method {
        Method::GET => playground_response(),
        Method::POST => handle_post(&state, &target, &route, &headers, &body).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    apply_headers(resp.headers_mut(), &cors_headers);
    resp
}

struct Route {
    cluster_key: String,
    logical_cluster: Option<String>,
}

/// Parse_route implements step 2: `/<cluster>/graphql`, or the kcp
/// extension `/<cluster>/<vw>/<kcp-ws>/graphql`.
fn parse_route(path: &str) -> Option<Route> {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segs.as_slice() {
        [cluster, "graphql"] => Some(Route {
            cluster_key: cluster.to_string(),
            logical_cluster: None,
        }),
        [cluster, vw, kcp_ws, "graphql"] => Some(Route {
            cluster_key: format!("{cluster}/{vw}"),
            logical_cluster: Some(kcp_ws.to_string()),
        }),
        _ => None,
    }
}

async fn handle_post(state: &AppState, target: &SharedTarget, route: &Route, headers: &HeaderMap, body: &Bytes) -> Response {
    let token = bearer_token(headers);

    if !state.config.local_development && token.is_none() {
        warn!(cluster = %route.cluster_key, "missing bearer token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let request: GraphQlRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid GraphQL request body: {e}")).into_response(),
    };

    if state.config.introspection_authentication && !state.config.local_development && is_introspection(&request) {
        match token.as_deref() {
            Some(t) => {
                if !validate_against_version_endpoint(&target.client(), t).await {
                    return StatusCode::UNAUTHORIZED.into_response();
                }
            }
            None => return StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    let identity = RequestIdentity {
        token,
        logical_cluster: if state.config.enable_kcp { route.logical_cluster.clone() } else { None },
    };

    let is_subscription = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("text/event-stream"));

    let schema = target.schema();
    if is_subscription {
        identity.scope(subscription_response(schema, request)).await
    } else {
        identity.scope(async move { Json(schema.execute(request).await).into_response() }).await
    }
}

async fn subscription_response(schema: async_graphql::dynamic::Schema, request: GraphQlRequest) -> Response {
    let stream = schema.execute_stream(request).map(|resp| {
        let data = serde_json::to_string(&resp).unwrap_or_default();
        Ok::<_, std::convert::Infallible>(SseEvent::default().event("next").data(data))
    });
    let complete = futures::stream::once(async { Ok(SseEvent::default().event("complete")) });
    Sse::new(stream.chain(complete)).into_response()
}

fn is_introspection(request: &GraphQlRequest) -> bool {
    request.query.contains("__schema") || request.query.contains("__type")
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

/// Validate_against_version_endpoint implements the introspection-auth
/// check: a `200` from `/version` with the caller's token means it's
/// valid, a `401` means it isn't, anything else is treated as a failure to
/// validate (fail closed).
async fn validate_against_version_endpoint(client: &kube::Client, token: &str) -> bool {
    let req = match http::Request::builder()
        .method(http::Method::GET)
        .uri("/version")
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .body(kube::client::Body::empty())
    {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "could not build introspection-auth validation request");
            return false;
        }
    };
    match client.send(req).await {
        Ok(resp) => resp.status() == http::StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "introspection-auth validation call failed");
            false
        }
    }
}

fn playground_response() -> Response {
    Html(async_graphql::http::playground_source(async_graphql::http::GraphQLPlaygroundConfig::new("."))).into_response()
}

fn cors_response_headers(cfg: &CorsConfig, request_headers: &HeaderMap) -> Vec<(axum::http::HeaderName, HeaderValue)> {
    let mut out = Vec::new();
    if !cfg.enabled {
        return out;
    }
    let origin = request_headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|o| cfg.allowed_origins.iter().any(|a| a == "*" || a == o));
    if let Some(origin) = origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            out.push((axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN, value));
        }
    }
    if !cfg.allowed_headers.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&cfg.allowed_headers.join(", ")) {
            out.push((axum::http::header::ACCESS_CONTROL_ALLOW_HEADERS, value));
        }
    }
    out
}

fn apply_headers(headers: &mut HeaderMap, extra: &[(axum::http::HeaderName, HeaderValue)]) {
    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }
}

/// Health builds the small router served on the introspection bind
/// address: `/healthz` plus whatever Prometheus installs separately.
pub fn health() -> Router {
    Router::new().route("/healthz", get(|| async { StatusCode::OK }))
}
