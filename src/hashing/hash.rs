//! Fast seedable 53-bit string hash
//!
//! This is a non-cryptographic mixing hash (the cyrb53 construction): two
//! 32-bit accumulators fed one UTF-16 code unit at a time, finalized with
//! xor-shift/multiply rounds and combined into a 53-bit value. It gives
//! good avalanche behavior for change detection. It offers no protection
//! against deliberate collisions and must never be used for integrity.
//!
//! The digest format is persisted in the base/working hash tables; changing
//! anything here invalidates every stored snapshot.

/// Width of a rendered digest
pub const DIGEST_LEN: usize = 11;

/// Digest stored for a leaf whose value could not be canonicalized
pub const UNHASHABLE: &str = "unhashable";

/// Hash text into a 53-bit integer
pub fn hash53(text: &str, seed: u32) -> u64 {
    let mut h1: u32 = 0xdead_beef ^ seed;
    let mut h2: u32 = 0x41c6_ce57 ^ seed;

    for unit in text.encode_utf16() {
        let ch = u32::from(unit);
        h1 = (h1 ^ ch).wrapping_mul(2_654_435_761);
        h2 = (h2 ^ ch).wrapping_mul(1_597_334_677);
    }

    h1 = (h1 ^ (h1 >> 16)).wrapping_mul(2_246_822_507);
    h1 ^= (h2 ^ (h2 >> 13)).wrapping_mul(3_266_489_909);
    h2 = (h2 ^ (h2 >> 16)).wrapping_mul(2_246_822_507);
    h2 ^= (h1 ^ (h1 >> 13)).wrapping_mul(3_266_489_909);

    (u64::from(h2 & 0x001f_ffff) << 32) | u64::from(h1)
}

/// Hash text into a printable digest
///
/// The digest is the 53-bit value in lowercase base-36, zero-padded to
/// [`DIGEST_LEN`] characters.
pub fn hash(text: &str, seed: u32) -> String {
    to_base36(hash53(text, seed))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut buf = [b'0'; DIGEST_LEN];
    let mut i = DIGEST_LEN;
    while n > 0 && i > 0 {
        i -= 1;
        buf[i] = DIGITS[(n % 36) as usize];
        n /= 36;
    }

    buf.iter().map(|&b| b as char).collect()
}
