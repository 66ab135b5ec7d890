#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Descriptor implements the on-disk schema descriptor format watched by the
//! gateway's file watcher: decoding a descriptor file into an OpenAPI v2
//! `definitions` map plus optional per-cluster connection metadata.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, trace};

mod gvk;
mod metadata;

pub use gvk::{Gvk, GvkExtension, Scope};
pub use metadata::{AuthSpec, CaBundle, ClusterMetadata};

/// Error enumerates the failure modes of decoding a descriptor file.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// BadDescriptor indicates the file is missing, unreadable, or not JSON.
    #[error("bad descriptor {path}: {source}")]
    BadDescriptor {
        /// Path is the descriptor file that failed to load.
        path: String,
        /// Source is the underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// BadJson indicates the file decoded as bytes but not as JSON.
    #[error("bad descriptor {path}: not valid JSON: {source}")]
    BadJson {
        /// Path is the descriptor file that failed to decode.
        path: String,
        /// Source is the underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// BadMetadata indicates `x-cluster-metadata` is present but doesn't
    /// coerce into the expected shape.
    #[error("bad cluster metadata in {path}: {source}")]
    BadMetadata {
        /// Path is the descriptor file holding the bad metadata.
        path: String,
        /// Source is the underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result is the typedef used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// DefinitionSet is the raw `definitions` map from a schema descriptor:
/// fully-qualified type key to an OpenAPI v2 schema node.
pub type DefinitionSet = BTreeMap<String, Value>;

/// SchemaDescriptor is the decoded form of a schema descriptor file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Definitions holds the raw OpenAPI v2 definitions, keyed by their
    /// fully-qualified name.
    #[serde(default)]
    pub definitions: DefinitionSet,
    /// Metadata describes the cluster this descriptor targets. Absent means
    /// "current cluster" (ambient kubeconfig/in-cluster config) mode.
    #[serde(rename = "x-cluster-metadata", default)]
    pub metadata: Option<Value>,
}

/// Descriptor is the typed result of parsing a schema descriptor file: the
/// raw definitions plus (if present and well-formed) cluster metadata.
#[derive(Clone, Debug, Default)]
pub struct Descriptor {
    /// Definitions is the raw `definitions` map.
    pub definitions: DefinitionSet,
    /// Metadata is the parsed `x-cluster-metadata` branch, if present.
    pub metadata: Option<ClusterMetadata>,
}

/// Parse_file reads and decodes a schema descriptor file from disk.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Descriptor> {
    let path = path.as_ref();
    let buf = std::fs::read(path).map_err(|source| Error::BadDescriptor {
        path: path.display().to_string(),
        source,
    })?;
    parse_bytes(&buf, &path.display().to_string())
}

/// Parse_bytes decodes an in-memory descriptor document. Split out from
/// [`parse_file`] so unit tests can exercise the format without touching the
/// filesystem.
pub fn parse_bytes(buf: &[u8], path_for_errors: &str) -> Result<Descriptor> {
    let doc: SchemaDescriptor =
        serde_json::from_slice(buf).map_err(|source| Error::BadJson {
            path: path_for_errors.to_string(),
            source,
        })?;

    let metadata = match doc.metadata {
        None => {
            trace!("no x-cluster-metadata; current-cluster mode");
            None
        }
        Some(v) => {
            let m: ClusterMetadata =
                serde_json::from_value(v).map_err(|source| Error::BadMetadata {
                    path: path_for_errors.to_string(),
                    source,
                })?;
            Some(m)
        }
    };

    Ok(Descriptor {
        definitions: doc.definitions,
        metadata,
    })
}

/// Cluster_name derives the registry key for a descriptor file: the
/// basename with its last dot-extension removed.
pub fn cluster_name<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.rfind('.') {
        Some(0) | None => stem,
        Some(idx) => stem[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_name_strips_extension() {
        assert_eq!(cluster_name("/etc/gateway/myWs.json"), "myWs");
        assert_eq!(cluster_name("myWs.json"), "myWs");
        assert_eq!(cluster_name("myWs"), "myWs");
        assert_eq!(cluster_name(".hidden"), ".hidden");
    }

    #[test]
    fn parse_bytes_without_metadata_is_current_cluster_mode() {
        let doc = br#"{"definitions":{}}"#;
        let d = parse_bytes(doc, "test").expect("parses");
        assert!(d.metadata.is_none());
    }

    #[test]
    fn parse_bytes_rejects_non_json() {
        let err = parse_bytes(b"not json", "test").unwrap_err();
        assert!(matches!(err, Error::BadJson { .. }));
    }

    #[test]
    fn parse_bytes_rejects_bad_metadata_shape() {
        let doc = br#"{"definitions":{},"x-cluster-metadata":{"host":123}}"#;
        let err = parse_bytes(doc, "test").unwrap_err();
        assert!(matches!(err, Error::BadMetadata { .. }));
    }
}
