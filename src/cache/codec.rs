//! Encoding of keys and values for the byte-oriented tiers and snapshots.
//!
//! Values are encoded as JSON. The encoded length doubles as the entry size
//! estimate used by byte-bounded tiers.

use std::hash::Hash;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

/// Bounds required of cache keys.
pub trait CacheKey: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Bounds required of cache values.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

// == Graph Depth ==
/// Nesting depth of an encoded JSON value. Scalars have depth 1 and each
/// array or object level adds 1; object keys do not count.
///
/// The scan stops once the depth exceeds `stop_above`, so the result is
/// exact up to `stop_above + 1` and a lower bound beyond it.
pub fn encoded_depth(encoded: &[u8], stop_above: usize) -> usize {
    let mut open: Vec<u8> = Vec::new();
    let mut depth = 0;
    let mut expect_key = false;
    let mut i = 0;

    while i < encoded.len() && depth <= stop_above {
        match encoded[i] {
            b @ (b'{' | b'[') => {
                open.push(b);
                expect_key = b == b'{';
                depth = depth.max(open.len());
            }
            b'}' | b']' => {
                open.pop();
                expect_key = false;
            }
            b',' => expect_key = open.last() == Some(&b'{'),
            b':' => expect_key = false,
            b if b.is_ascii_whitespace() => {}
            b => {
                if b == b'"' {
                    i = string_end(encoded, i);
                }
                if expect_key {
                    expect_key = false;
                } else {
                    depth = depth.max(open.len() + 1);
                }
            }
        }
        i += 1;
    }
    depth
}

/// Index of the quote closing the string that opens at `start`.
fn string_end(encoded: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < encoded.len() {
        match encoded[i] {
            b'\\' => i += 2,
            b'"' => return i,
            _ => i += 1,
        }
    }
    encoded.len()
}

// == Disk Limits ==
/// Rejects values a disk tier must not hold.
///
/// # Arguments
/// * `encoded` - The value as produced by [`encode`]
/// * `max_size` - Largest accepted encoded length
/// * `max_depth` - Deepest accepted nesting
pub fn check_disk_limits(
    encoded: &[u8],
    max_size: Option<u64>,
    max_depth: Option<usize>,
) -> Result<()> {
    if let Some(limit) = max_size {
        let actual = encoded.len() as u64;
        if actual > limit {
            return Err(CacheError::SizeLimitExceeded {
                what: "object size",
                actual,
                limit,
            });
        }
    }

    if let Some(limit) = max_depth {
        let actual = encoded_depth(encoded, limit);
        if actual > limit {
            return Err(CacheError::SizeLimitExceeded {
                what: "object graph depth",
                actual: actual as u64,
                limit: limit as u64,
            });
        }
    }

    Ok(())
}
