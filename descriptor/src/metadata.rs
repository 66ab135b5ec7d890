//! ClusterMetadata and AuthSpec: the `x-cluster-metadata` branch of a schema
//! descriptor.

use serde::{Deserialize, Serialize};

/// ClusterMetadata describes how to reach and authenticate to the target
/// cluster. Absent (or an empty `host`) means "current cluster" mode: the
/// gateway process's own ambient kubeconfig/in-cluster config is used.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    /// Host is the API server base URL. Only scheme and authority are kept;
    /// path/query/fragment are discarded by the connection builder.
    #[serde(default)]
    pub host: String,
    /// Path is an optional prefix, e.g. for virtual-workspace routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Auth describes how the gateway should authenticate as itself when
    /// talking to the cluster's discovery endpoints (the admin transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    /// Ca is an optional PEM trust root, base64-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaBundle>,
}

impl ClusterMetadata {
    /// Is_current_cluster reports whether this metadata selects "current
    /// cluster" (ambient) mode: no host configured.
    pub fn is_current_cluster(&self) -> bool {
        self.host.trim().is_empty()
    }
}

/// CaBundle wraps a base64-encoded PEM trust root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaBundle {
    /// Data is the base64-encoded PEM certificate bundle.
    pub data: String,
}

/// AuthSpec describes how the gateway authenticates to the cluster as
/// itself, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthSpec {
    /// Token carries a base64-encoded bearer token.
    Token {
        /// Token is the base64-encoded bearer token.
        token: String,
    },
    /// ClientCert carries a base64-encoded mTLS certificate/key pair.
    ClientCert {
        /// CertData is the base64-encoded client certificate.
        cert_data: String,
        /// KeyData is the base64-encoded client private key.
        key_data: String,
    },
    /// Kubeconfig carries a full base64-encoded kubeconfig document.
    Kubeconfig {
        /// Kubeconfig is the base64-encoded kubeconfig YAML.
        kubeconfig: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_is_current_cluster() {
        let m = ClusterMetadata::default();
        assert!(m.is_current_cluster());
    }

    #[test]
    fn auth_spec_tagged_roundtrip() {
        let json = r#"{"type":"token","token":"dG9rZW4="}"#;
        let spec: AuthSpec = serde_json::from_str(json).unwrap();
        assert!(matches!(spec, AuthSpec::Token { token } if token == "dG9rZW4="));
    }
}
