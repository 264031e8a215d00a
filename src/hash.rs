//! Bundled hash providers.
//!
//! Both functions are pure: the same bytes and seeds always produce the same
//! digest. Either can back [`KeyBytes`](crate::ops::KeyBytes), or a caller
//! can supply their own [`HashProvider`].

use core::hash::Hasher;

use siphasher::sip::SipHasher24;

/// Signature shared by the bundled hash functions.
pub type HashProvider = fn(&[u8], u64, u64) -> u64;

/// Hashes `data` with SipHash-2-4 keyed by the two seeds.
///
/// This is the safe default for keys an adversary may choose.
///
/// # Examples
///
/// ```rust
/// # use robin_table::hash::sip;
/// let a = sip(b"robin", 1, 2);
/// assert_eq!(a, sip(b"robin", 1, 2));
/// assert_ne!(a, sip(b"robin", 2, 1));
/// ```
pub fn sip(data: &[u8], seed0: u64, seed1: u64) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(seed0, seed1);
    hasher.write(data);
    hasher.finish()
}

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hashes `data` with a fast, non-cryptographic function.
        ///
        /// Backed by foldhash. `seed0` seeds the hasher and `seed1` is mixed
        /// in ahead of the data. Only use it for keys from a trusted source.
        pub fn fast(data: &[u8], seed0: u64, seed1: u64) -> u64 {
            use core::hash::BuildHasher;

            let mut hasher = foldhash::fast::FixedState::with_seed(seed0).build_hasher();
            hasher.write_u64(seed1);
            hasher.write(data);
            hasher.finish()
        }
    } else {
        /// Hashes `data` with a fast, non-cryptographic function.
        ///
        /// Without the `foldhash` feature this is SipHash-1-3 keyed by the
        /// seeds. Only use it for keys from a trusted source.
        pub fn fast(data: &[u8], seed0: u64, seed1: u64) -> u64 {
            let mut hasher = siphasher::sip::SipHasher13::new_with_keys(seed0, seed1);
            hasher.write(data);
            hasher.finish()
        }
    }
}
