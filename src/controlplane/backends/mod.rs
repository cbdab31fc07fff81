//! Remote Adapters
//!
//! HTTP implementations of the remote-facing ports:
//! - OpenSearch: generic REST access to the local cluster
//! - Probe: pre-flight connectivity check against the peer
//! - DBaaS: users password restore

pub mod dbaas;
pub mod opensearch;
pub mod probe;

pub use dbaas::*;
pub use opensearch::*;
pub use probe::*;
