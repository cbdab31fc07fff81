//! Custom Resource Definitions
//!
//! - OpenSearchService: the disaster-recovery slice of the OpenSearch resource

pub mod opensearch_service;

pub use opensearch_service::*;
