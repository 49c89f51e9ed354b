//! kube-mcp ops: the resource access engine over a pluggable backend.
//!
//! `KubeOps` resolves identifiers, routes namespaces and validates input; a
//! `ResourceBackend` performs the calls. `KubeBackend` talks to a cluster through the kube
//! dynamic API, `MemoryBackend` keeps objects in process for tests and dry runs.

#![forbid(unsafe_code)]

pub mod backend;
pub mod engine;
pub mod kube_backend;
pub mod memory;

pub use backend::{status_error, AccessDecision, AccessReview, LogOptions, ResourceBackend};
pub use engine::{GetRequest, KubeOps, OpsSettings, DEFAULT_FIELD_MANAGER};
pub use kube_backend::{classify, KubeBackend};
pub use memory::{Call, Failure, MemoryBackend};
