//! API Module
//!
//! DR health endpoint consumed by the cross-site health aggregator.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
