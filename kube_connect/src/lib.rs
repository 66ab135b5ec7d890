#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Kube_connect turns a [`descriptor::ClusterMetadata`] into a connected
//! [`kube::Client`], and layers the per-request auth round-tripper (token
//! propagation, impersonation, discovery passthrough) over the transport.

use descriptor::ClusterMetadata;
use kube::config::{AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster};
use tracing::{debug, instrument, trace};

mod jwt;
mod roundtripper;

pub use jwt::decode_claim;
pub use roundtripper::{AuthRoundTripper, RequestIdentity};

/// Error enumerates the failure modes of building a connection.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// BadMetadata indicates the descriptor's auth/CA material couldn't be
    /// decoded or parsed.
    #[error("bad cluster metadata: {0}")]
    BadMetadata(String),
    /// UnsupportedAuth indicates an `AuthSpec` variant this builder doesn't
    /// (yet) understand reached it. Kept for forward-compatibility; every
    /// variant of `descriptor::AuthSpec` is handled today.
    #[error("unsupported auth type: {0}")]
    UnsupportedAuth(String),
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the ambient kubeconfig/in-cluster config could
    /// not be loaded.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    /// Url indicates `host` failed to parse as a URL.
    #[error("invalid host URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result is the typedef used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Connection bundles the built client with the three layered transports
/// the Auth Round-Tripper dispatches between, plus the CA material (if any)
/// so equality/debug output can confirm whether insecure mode is active.
pub struct Connection {
    /// Client is the gateway-facing client: every resolver call goes
    /// through this, which routes through [`AuthRoundTripper`].
    pub client: kube::Client,
    /// Insecure reports whether TLS verification was disabled (no CA
    /// material was supplied by the descriptor or an embedded kubeconfig).
    pub insecure: bool,
}

/// Options configures the behavior of [`connect`] beyond what's carried in
/// the descriptor itself (the Router-level gateway config, not per-cluster
/// state).
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// LocalDevelopment makes the Auth Round-Tripper delegate every request
    /// to the admin transport, skipping caller-token checks entirely.
    pub local_development: bool,
    /// ShouldImpersonate enables the impersonation flow (step 5 of the
    /// round-tripper decision table).
    pub should_impersonate: bool,
    /// UsernameClaim is the JWT claim read for impersonation.
    pub username_claim: String,
}

/// Connect builds a [`Connection`] for the given cluster metadata. `None`
/// metadata (or an empty `host`) connects to the process's ambient
/// Kubernetes configuration ("current cluster" mode).
#[instrument(skip_all)]
pub async fn connect(meta: Option<&ClusterMetadata>, opts: &Options) -> Result<Connection> {
    let (config, insecure) = match meta.filter(|m| !m.is_current_cluster()) {
        None => {
            debug!("no remote metadata; using ambient kubeconfig");
            let config = kube::Config::infer().await?;
            let insecure = config.accept_invalid_certs;
            (config, insecure)
        }
        Some(meta) => build_config(meta)?,
    };

    let mut token_config = config.clone();
    token_config.auth_info = AuthInfo::default();

    let admin = kube::Client::try_from(config)?;
    let token_only = kube::Client::try_from(token_config)?;
    let rt = AuthRoundTripper::new(admin, token_only, opts.clone());
    let client = kube::Client::new(rt, "default");

    Ok(Connection { client, insecure })
}

/// Build_config implements the host/TLS/auth resolution of §4.2: host
/// normalisation (scheme+authority only), TLS defaults to
/// insecure-skip-verify unless a CA is supplied, and auth resolution by
/// `AuthSpec` variant.
fn build_config(meta: &ClusterMetadata) -> Result<(kube::Config, bool)> {
    use descriptor::AuthSpec;

    let url = url::Url::parse(&meta.host)?;
    let mut authority = String::new();
    authority.push_str(url.scheme());
    authority.push_str("://");
    if let Some(host) = url.host_str() {
        authority.push_str(host);
    }
    if let Some(port) = url.port() {
        authority.push(':');
        authority.push_str(&port.to_string());
    }
    trace!(host = %authority, "normalised host");

    let mut config = kube::Config::new(authority.parse().map_err(|e: http::uri::InvalidUri| {
        Error::BadMetadata(format!("bad normalised host: {e}"))
    })?);
    config.accept_invalid_certs = true;

    let mut insecure = true;
    if let Some(ca) = &meta.ca {
        let pem = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &ca.data)
            .map_err(|e| Error::BadMetadata(format!("bad ca.data: {e}")))?;
        config.root_cert = Some(vec![pem]);
        config.accept_invalid_certs = false;
        insecure = false;
    }

    match &meta.auth {
        None => {}
        Some(AuthSpec::Token { token }) => {
            let tok = decode_b64(token)?;
            config.auth_info.token = Some(
                String::from_utf8(tok)
                    .map_err(|e| Error::BadMetadata(format!("token not utf8: {e}")))?
                    .into(),
            );
        }
        Some(AuthSpec::ClientCert { cert_data, key_data }) => {
            config.auth_info.client_certificate_data =
                Some(String::from_utf8(decode_b64(cert_data)?).map_err(to_bad_metadata)?.into());
            config.auth_info.client_key_data =
                Some(String::from_utf8(decode_b64(key_data)?).map_err(to_bad_metadata)?.into());
        }
        Some(AuthSpec::Kubeconfig { kubeconfig }) => {
            let raw = decode_b64(kubeconfig)?;
            let kc: Kubeconfig = serde_yaml::from_slice(&raw)
                .map_err(|e| Error::BadMetadata(format!("bad embedded kubeconfig: {e}")))?;
            let auth_info = current_auth_info(&kc)
                .ok_or_else(|| Error::BadMetadata("kubeconfig has no current context".into()))?;
            config.auth_info = auth_info;
            // A metadata-level CA overrides any kubeconfig CA; only adopt
            // the kubeconfig's CA if the descriptor didn't supply one.
            if insecure {
                if let Some(cluster_ca) = current_cluster_ca(&kc) {
                    config.root_cert = Some(vec![cluster_ca]);
                    config.accept_invalid_certs = false;
                    insecure = false;
                }
            }
        }
    }

    if let Some(path) = &meta.path {
        trace!(path, "cluster metadata carries a path prefix");
    }

    Ok((config, insecure))
}

fn decode_b64(s: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
        .map_err(|e| Error::BadMetadata(format!("bad base64: {e}")))
}

fn to_bad_metadata(e: std::string::FromUtf8Error) -> Error {
    Error::BadMetadata(format!("not utf8: {e}"))
}

/// Current_auth_info extracts the `AuthInfo` for the kubeconfig's current
/// context: client cert/key, bearer token, token file, exec/auth-provider.
fn current_auth_info(kc: &Kubeconfig) -> Option<AuthInfo> {
    let ctx_name = kc.current_context.as_ref()?;
    let ctx = find_context(kc, ctx_name)?;
    find_auth_info(kc, ctx.user.as_deref()?).cloned()
}

fn current_cluster_ca(kc: &Kubeconfig) -> Option<Vec<u8>> {
    let ctx_name = kc.current_context.as_ref()?;
    let ctx = find_context(kc, ctx_name)?;
    let cluster = find_cluster(kc, &ctx.cluster)?;
    cluster
        .certificate_authority_data
        .as_ref()
        .and_then(|d| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, d).ok())
}

fn find_context<'a>(kc: &'a Kubeconfig, name: &str) -> Option<&'a Context> {
    kc.contexts
        .iter()
        .find(|c| c.name == name)
        .and_then(|c| c.context.as_ref())
}

fn find_auth_info<'a>(kc: &'a Kubeconfig, name: &str) -> Option<&'a AuthInfo> {
    kc.auth_infos
        .iter()
        .find(|a| a.name == name)
        .and_then(|a: &NamedAuthInfo| a.auth_info.as_ref())
}

fn find_cluster<'a>(kc: &'a Kubeconfig, name: &str) -> Option<&'a Cluster> {
    kc.clusters
        .iter()
        .find(|c| c.name == name)
        .and_then(|c: &NamedCluster| c.cluster.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use descriptor::CaBundle;

    #[test]
    fn host_normalisation_drops_path_and_query() {
        let meta = ClusterMetadata {
            host: "https://api.example.com:6443/foo/bar?x=1#frag".into(),
            ..Default::default()
        };
        let (cfg, insecure) = build_config(&meta).unwrap();
        assert_eq!(cfg.cluster_url.as_str(), "https://api.example.com:6443/");
        assert!(insecure, "no CA supplied => insecure mode");
    }

    #[test]
    fn ca_data_disables_insecure_mode() {
        let meta = ClusterMetadata {
            host: "https://api.example.com".into(),
            ca: Some(CaBundle {
                data: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    b"-----BEGIN CERTIFICATE-----\n",
                ),
            }),
            ..Default::default()
        };
        let (cfg, insecure) = build_config(&meta).unwrap();
        assert!(!insecure);
        assert!(!cfg.accept_invalid_certs);
    }
}
