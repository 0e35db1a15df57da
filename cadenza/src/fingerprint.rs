//! Content hashes used as series identity and block bucket keys.
//!
//! Both hashes are 64-bit FNV-1a, so they are stable across processes and
//! platforms. They are only ever used to find a bucket; membership is always
//! confirmed by comparing the full (name, label set) identity.

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::labels::LabelSet;

/// Separates components inside a fingerprint. Never occurs in UTF-8 text.
const SEPARATOR: u8 = 0xFF;

/// Hashes a metric name alone. This is the block's bucket key.
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.finish()
}

/// Hashes a series identity: the metric name plus its label set.
///
/// Value and timestamp are not part of the identity, so repeated samples of
/// one series share a fingerprint. Labels are fed in key order.
pub fn fingerprint(name: &str, labels: &LabelSet) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    for (key, value) in labels.iter() {
        hasher.write_u8(SEPARATOR);
        hasher.write(key.as_bytes());
        hasher.write_u8(SEPARATOR);
        hasher.write(value.as_bytes());
    }
    hasher.finish()
}
