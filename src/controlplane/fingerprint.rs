//! Config fingerprint
//!
//! Content hash of the DR ConfigMap data, used only to detect changes between
//! reconciles.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex SHA-256 of the JSON encoding of `data` (keys are ordered)
pub fn config_fingerprint(data: &BTreeMap<String, String>) -> Result<String> {
    let encoded = serde_json::to_vec(data)?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}
