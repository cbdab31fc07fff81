//! Platform Adapters
//!
//! Kubernetes-backed implementations of the cluster-facing ports.

pub mod kubernetes;

pub use kubernetes::*;
