#![warn(rustdoc::missing_crate_level_docs)]

//! Gateway wires the Descriptor Parser, Connection Builder, Schema Compiler
//! and Resolver layer into a per-cluster target, and the Registry, File
//! Watcher and Router that keep a fleet of targets current on disk changes.

pub mod registry;
pub mod resolver;
pub mod router;
mod subscribe;
pub mod target;
pub mod watcher;

/// Error is the gateway's top-level error type; most operations that can
/// fail do so for one of the reasons named here.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Descriptor indicates the schema descriptor file failed to parse.
    #[error("descriptor error: {0}")]
    Descriptor(#[from] descriptor::Error),
    /// Connection indicates the Kubernetes connection could not be built.
    #[error("connection error: {0}")]
    Connection(#[from] kube_connect::Error),
    /// Compile indicates the OpenAPI definitions failed to compile to a
    /// GraphQL schema.
    #[error("schema compile error: {0}")]
    Compile(#[from] schema_compiler::Error),
    /// Io covers filesystem errors reading a descriptor or watching a
    /// directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Kube is a generic error from a live Kubernetes call.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// Watch indicates the filesystem watcher failed to start or process an
    /// event.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    /// Config indicates a command-line argument failed to parse.
    #[error("bad configuration: {0}")]
    Config(String),
}

/// Result typedef for gateway operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
