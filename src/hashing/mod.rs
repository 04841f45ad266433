//! Hashing primitives
//!
//! Provides:
//! - Canonical serialization (order- and container-independent)
//! - A seedable 53-bit non-cryptographic string hash
//!
//! Both are pure and total: they never fail for values in the canonical
//! domain. Values that can only be reached through serde and fail to
//! convert degrade to the [`UNHASHABLE`] sentinel.

mod canonical;
mod hash;

pub use canonical::{
    same_value, to_canonical_serde, to_canonical_string, Canonicalize, SerializationError,
};
pub use hash::{hash, hash53, DIGEST_LEN, UNHASHABLE};

/// Seed used for every leaf and root digest
pub const LEAF_SEED: u32 = 0;

/// Canonicalize and hash a value
pub fn hash_value<T: Canonicalize + ?Sized>(value: &T) -> String {
    hash(&to_canonical_string(value), LEAF_SEED)
}

/// Canonicalize and hash any `Serialize` value
///
/// Values outside the canonical domain hash to [`UNHASHABLE`] and emit a
/// warning instead of failing.
pub fn hash_serializable<T: serde::Serialize + ?Sized>(value: &T) -> String {
    match to_canonical_serde(value) {
        Ok(canonical) => hash(&canonical, LEAF_SEED),
        Err(e) => {
            tracing::warn!(error = %e, "Value is not hashable, using sentinel digest");
            UNHASHABLE.to_string()
        }
    }
}
