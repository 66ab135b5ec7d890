//! AuthRoundTripper implements §4.3: per-request bearer-token propagation,
//! optional impersonation, and unauthenticated passthrough of API-discovery
//! probes, layered as a `tower::Service` in front of the cluster's base
//! transport.

use std::{
    future::Future,
    pin::Pin,
    task::{Context as TaskContext, Poll},
};

use http::{Method, Request, Response, StatusCode};
use kube::client::Body;
use tower::Service;
use tracing::{debug, trace, warn};

use crate::Options;

tokio::task_local! {
    /// Identity is the ambient per-request identity: the caller's bearer
    /// token and (optionally) the kcp logical-cluster workspace. The Router
    /// (C9) installs this for the lifetime of handling one GraphQL
    /// operation; every outbound Kubernetes call made by a resolver while
    /// that scope is active observes it.
    static IDENTITY: RequestIdentity;
}

/// RequestIdentity is the per-request context the Router carries into
/// resolver execution: the caller's bearer token and cancellation are first
/// class per §5; the logical-cluster marker supports the kcp extension.
#[derive(Clone, Debug, Default)]
pub struct RequestIdentity {
    /// Token is the caller's bearer token, if any.
    pub token: Option<String>,
    /// LogicalCluster is the kcp workspace, if kcp mode is enabled.
    pub logical_cluster: Option<String>,
}

impl RequestIdentity {
    /// Scope runs `fut` with this identity installed as the ambient
    /// per-request context, readable by [`AuthRoundTripper`] during any
    /// Kubernetes call made while `fut` is running.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        IDENTITY.scope(self, fut).await
    }

    fn current() -> Option<RequestIdentity> {
        IDENTITY.try_with(Clone::clone).ok()
    }
}

/// AuthRoundTripper dispatches each outbound request to one of three
/// transports: `admin` (full credentials), `token_only` (cluster CA, no
/// admin credentials, used to anchor caller-token requests), or
/// `unauthorized` (synthetic 401). The admin transport must never be
/// reachable under a caller token, and `token_only` must never be reachable
/// for a discovery probe.
#[derive(Clone)]
pub struct AuthRoundTripper<S> {
    admin: S,
    token_only: S,
    opts: Options,
}

impl<S> AuthRoundTripper<S> {
    /// New builds a round-tripper over the given admin and token-only
    /// transports.
    pub fn new(admin: S, token_only: S, opts: Options) -> Self {
        Self {
            admin,
            token_only,
            opts,
        }
    }
}

impl<S> Service<Request<Body>> for AuthRoundTripper<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut admin = self.admin.clone();
        let mut token_only = self.token_only.clone();
        let opts = self.opts.clone();

        Box::pin(async move {
            if opts.local_development {
                trace!("local-development mode; delegating to admin transport");
                return admin.call(req).await.map_err(box_err);
            }

            if is_discovery_probe(&req) {
                trace!(path = req.uri().path(), "discovery probe; delegating to admin transport");
                return admin.call(req).await.map_err(box_err);
            }

            let identity = RequestIdentity::current().unwrap_or_default();
            let token = match identity.token.filter(|t| !t.is_empty()) {
                Some(t) => t,
                None => {
                    debug!("no caller token in request context");
                    return Ok(unauthorized());
                }
            };

            if !opts.should_impersonate {
                let mut req = req;
                set_bearer(&mut req, &token);
                return token_only.call(req).await.map_err(box_err);
            }

            let claim = crate::decode_claim(&token, &opts.username_claim);
            match claim.filter(|c| !c.is_empty()) {
                None => {
                    warn!(claim = opts.username_claim, "impersonation claim missing or empty");
                    Ok(unauthorized())
                }
                Some(username) => {
                    let mut req = req;
                    req.headers_mut().insert(
                        "Impersonate-User",
                        username.parse().map_err(|_| {
                            BoxError::from("impersonation claim is not a valid header value")
                        })?,
                    );
                    set_bearer(&mut req, &token);
                    token_only.call(req).await.map_err(box_err)
                }
            }
        })
    }
}

/// BoxError is the erased error type `AuthRoundTripper` reports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn box_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> BoxError {
    Box::new(e)
}

fn set_bearer(req: &mut Request<Body>, token: &str) {
    if let Ok(value) = format!("Bearer {token}").parse() {
        req.headers_mut().insert(http::header::AUTHORIZATION, value);
    }
}

fn unauthorized() -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(Body::empty())
        .expect("static response is well-formed")
}

/// Is_discovery_probe implements §4.3 step 2: `GET` whose path (after
/// stripping any `/clusters/<ws>` prefix) matches `/api`, `/apis`,
/// `/api/<version>`, `/apis/<group>`, or `/apis/<group>/<version>`.
fn is_discovery_probe(req: &Request<Body>) -> bool {
    if req.method() != Method::GET {
        return false;
    }
    let path = strip_clusters_prefix(req.uri().path());
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    matches!(
        segs.as_slice(),
        ["api"] | ["apis"] | ["api", _] | ["apis", _] | ["apis", _, _]
    )
}

fn strip_clusters_prefix(path: &str) -> &str {
    let trimmed = path.trim_start_matches('/');
    if let Some(rest) = trimmed.strip_prefix("clusters/") {
        match rest.find('/') {
            Some(idx) => &rest[idx..],
            None => "",
        }
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn discovery_probe_decision_table() {
        assert!(is_discovery_probe(&get("/api")));
        assert!(is_discovery_probe(&get("/apis")));
        assert!(is_discovery_probe(&get("/api/v1")));
        assert!(is_discovery_probe(&get("/apis/apps")));
        assert!(is_discovery_probe(&get("/apis/apps/v1")));
        assert!(!is_discovery_probe(&get("/apis/apps/v1/namespaces/default/deployments")));
        assert!(!is_discovery_probe(&get("/healthz")));
    }

    #[test]
    fn discovery_probe_strips_clusters_prefix() {
        assert!(is_discovery_probe(&get("/clusters/my-ws/api")));
        assert!(is_discovery_probe(&get("/clusters/my-ws/apis/apps/v1")));
    }

    #[test]
    fn post_is_never_a_discovery_probe() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api")
            .body(Body::empty())
            .unwrap();
        assert!(!is_discovery_probe(&req));
    }
}
