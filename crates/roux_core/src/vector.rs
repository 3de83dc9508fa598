//! Vector primitives for the embedded brute-force index.
//!
//! Vectors persist as little-endian f32 BLOBs inside the cache; every
//! distance is computed at f32 precision so a stored vector queried against
//! itself comes back at distance 0 modulo f32 rounding.

use once_cell::sync::OnceCell;
use roux_common::{Result, RouxError};

static MIXED_MODELS_WARNED: OnceCell<()> = OnceCell::new();

/// Pack a vector as contiguous little-endian f32 bytes.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        blob.extend_from_slice(&component.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 BLOB back into a vector.
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(RouxError::Provider(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Reject empty vectors and non-finite components before they reach storage
/// or a scan.
pub fn validate_vector(vector: &[f32], what: &str) -> Result<()> {
    if vector.is_empty() {
        return Err(RouxError::InvalidInput(format!("{} vector is empty", what)));
    }
    if let Some(pos) = vector.iter().position(|c| !c.is_finite()) {
        return Err(RouxError::InvalidInput(format!(
            "{} vector has non-finite component at index {}",
            what, pos
        )));
    }
    Ok(())
}

/// Cosine distance `1 − (a·b)/(‖a‖‖b‖)` at f32 precision.
///
/// A zero-magnitude vector on either side defines the distance as exactly 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Log the mixed-model warning at most once per process.
pub fn warn_mixed_models_once(warnings: &roux_common::warnings::WarningBuffer) {
    if MIXED_MODELS_WARNED.set(()).is_ok() {
        warnings.push("embedding index contains vectors from multiple models");
    }
}
