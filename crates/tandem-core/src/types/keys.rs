//! Container keys.
//!
//! Ordered containers use [`FloatKey`], a fraction in `(0, 1)` written as
//! base-256 digits. A new key can always be generated strictly between two
//! neighbours, so concurrent inserts never renumber existing entries.
//! Unordered containers use [`RandomKey`], 160 random bits.

use std::fmt;
use rand::{rng, Rng};
use serde::{Serialize, Deserialize};
use crate::constants::{FLOAT_KEY_ENTROPY, RANDOM_KEY_LENGTH};
use crate::types::error::{CoreError, CoreResult};

/// Fractional key of an ordered container.
///
/// Keys compare lexicographically. A key is never empty and never ends
/// with a zero byte, which keeps lexicographic order equal to numeric order
/// and leaves room between any two keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FloatKey(Vec<u8>);

impl FloatKey {
    /// Wrap raw digits, rejecting empty input and trailing zeros
    pub fn from_bytes(bytes: Vec<u8>) -> CoreResult<Self> {
        match bytes.last() {
            None => Err(CoreError::invalid_input("empty fractional key")),
            Some(0) => Err(CoreError::invalid_input("fractional key ends with a zero digit")),
            Some(_) => Ok(Self(bytes)),
        }
    }

    /// Raw digits
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Generate a key strictly between `left` and `right`.
    ///
    /// `None` stands for the lower bound zero on the left and for the upper
    /// bound one on the right.
    pub fn generate(left: Option<&FloatKey>, right: Option<&FloatKey>) -> CoreResult<Self> {
        Self::generate_with(left, right, &mut rng())
    }

    /// [`FloatKey::generate`] with a caller-supplied random source
    pub fn generate_with<R: Rng + ?Sized>(
        left: Option<&FloatKey>,
        right: Option<&FloatKey>,
        rng: &mut R,
    ) -> CoreResult<Self> {
        if let (Some(l), Some(r)) = (left, right) {
            if l >= r {
                return Err(CoreError::invalid_input(format!(
                    "fractional key bounds out of order: {} >= {}",
                    l, r
                )));
            }
        }

        let lo: &[u8] = left.map(|k| k.as_bytes()).unwrap_or(&[]);
        let hi = right.map(|k| k.as_bytes());

        let mut key = midpoint(lo, hi);
        // A prefix of `right` cannot take a random suffix, so step closer
        // until the candidate diverges from it.
        if let Some(hi) = hi {
            while hi.starts_with(&key) {
                key = midpoint(&key, Some(hi));
            }
        }

        for i in 0..FLOAT_KEY_ENTROPY {
            let mut digit: u8 = rng.random();
            if i + 1 == FLOAT_KEY_ENTROPY && digit == 0 {
                digit = 1;
            }
            key.push(digit);
        }
        Ok(Self(key))
    }
}

/// Digits of a fraction strictly between `lo` and `hi` (`None` meaning one).
///
/// Requires `lo < hi` and that `hi` has no trailing zero. The result never
/// ends with a zero digit.
fn midpoint(lo: &[u8], hi: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(lo.len() + 1);
    let mut lo = lo;
    let mut hi = hi;

    loop {
        if let Some(h) = hi {
            // Strip the common prefix, reading `lo` as zero-padded.
            let mut n = 0;
            while n < h.len() && lo.get(n).copied().unwrap_or(0) == h[n] {
                n += 1;
            }
            out.extend_from_slice(&h[..n]);
            lo = lo.get(n..).unwrap_or(&[]);
            hi = Some(&h[n..]);
        }

        let a = lo.first().copied().map(u16::from).unwrap_or(0);
        let b = hi.and_then(|h| h.first().copied()).map(u16::from).unwrap_or(256);

        if b > a + 1 {
            out.push(((a + b) / 2) as u8);
            return out;
        }

        // Consecutive digits.
        if let Some(h) = hi {
            if h.len() > 1 {
                out.push(h[0]);
                return out;
            }
        }
        out.push(a as u8);
        lo = lo.get(1..).unwrap_or(&[]);
        hi = None;
    }
}

impl fmt::Display for FloatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for FloatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FloatKey({})", self)
    }
}

/// 160-bit key of an unordered container
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RandomKey([u8; RANDOM_KEY_LENGTH]);

impl RandomKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self::generate_with(&mut rng())
    }

    /// [`RandomKey::generate`] with a caller-supplied random source
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; RANDOM_KEY_LENGTH];
        rng.fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Create a key from raw bytes
    pub fn from_bytes(bytes: [u8; RANDOM_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create a key from a byte slice of exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let array: [u8; RANDOM_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_input(format!("random key must be {} bytes, got {}", RANDOM_KEY_LENGTH, bytes.len())))?;
        Ok(Self(array))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; RANDOM_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Display for RandomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for RandomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomKey({})", self)
    }
}

/// Key of one slot in any container
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotKey {
    /// Slot of an ordered container
    Float(FloatKey),
    /// Slot of an unordered, optional or single container
    Random(RandomKey),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Float(key) => write!(f, "f:{}", key),
            SlotKey::Random(key) => write!(f, "r:{}", key),
        }
    }
}

impl From<FloatKey> for SlotKey {
    fn from(key: FloatKey) -> Self {
        SlotKey::Float(key)
    }
}

impl From<RandomKey> for SlotKey {
    fn from(key: RandomKey) -> Self {
        SlotKey::Random(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn key(bytes: &[u8]) -> FloatKey {
        FloatKey::from_bytes(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_midpoint_between_neighbours() {
        assert_eq!(midpoint(&[], None), vec![128]);
        assert_eq!(midpoint(&[5], Some(&[5, 3])), vec![5, 1]);
        assert_eq!(midpoint(&[], Some(&[0, 7])), vec![0, 3]);
        assert_eq!(midpoint(&[255], None), vec![255, 128]);
        assert_eq!(midpoint(&[4], Some(&[5])), vec![4, 128]);
    }

    #[test]
    fn test_generate_rejects_reversed_bounds() {
        let a = key(&[10]);
        let b = key(&[20]);
        assert!(FloatKey::generate(Some(&b), Some(&a)).is_err());
        assert!(FloatKey::generate(Some(&a), Some(&a)).is_err());
    }

    #[test]
    fn test_generate_below_prefix_neighbour() {
        let mut rng = StdRng::seed_from_u64(7);
        let left = key(&[5]);
        let right = key(&[5, 1]);
        for _ in 0..64 {
            let k = FloatKey::generate_with(Some(&left), Some(&right), &mut rng).unwrap();
            assert!(left < k && k < right, "{} not in ({}, {})", k, left, right);
        }
    }

    #[test]
    fn test_repeated_subdivision_never_exhausts() {
        let mut rng = StdRng::seed_from_u64(42);
        let left = FloatKey::generate_with(None, None, &mut rng).unwrap();
        let mut right = FloatKey::generate_with(Some(&left), None, &mut rng).unwrap();
        for _ in 0..500 {
            let k = FloatKey::generate_with(Some(&left), Some(&right), &mut rng).unwrap();
            assert!(left < k && k < right);
            assert_ne!(*k.as_bytes().last().unwrap(), 0);
            right = k;
        }
    }

    #[test]
    fn test_from_bytes_rejects_trailing_zero() {
        assert!(FloatKey::from_bytes(vec![]).is_err());
        assert!(FloatKey::from_bytes(vec![3, 0]).is_err());
        assert!(FloatKey::from_bytes(vec![0, 3]).is_ok());
    }

    #[test]
    fn test_random_keys_differ() {
        let a = RandomKey::generate();
        let b = RandomKey::generate();
        assert_ne!(a, b);
        assert_eq!(RandomKey::from_slice(a.as_bytes()).unwrap(), a);
        assert!(RandomKey::from_slice(&[1, 2, 3]).is_err());
    }

    proptest! {
        #[test]
        fn prop_generated_key_is_strictly_between(
            seed in any::<u64>(),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..120),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut keys: Vec<FloatKey> = Vec::new();
            for pick in picks {
                let at = pick.index(keys.len() + 1);
                let left = if at == 0 { None } else { keys.get(at - 1) };
                let right = keys.get(at);
                let k = FloatKey::generate_with(left, right, &mut rng).unwrap();
                if let Some(l) = left {
                    prop_assert!(l < &k);
                }
                if let Some(r) = right {
                    prop_assert!(&k < r);
                }
                prop_assert_ne!(*k.as_bytes().last().unwrap(), 0u8);
                keys.insert(at, k);
            }
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn prop_midpoint_of_arbitrary_keys(
            a in proptest::collection::vec(any::<u8>(), 1..8),
            b in proptest::collection::vec(any::<u8>(), 1..8),
        ) {
            let (Ok(a), Ok(b)) = (FloatKey::from_bytes(a), FloatKey::from_bytes(b)) else {
                return Ok(());
            };
            if a == b {
                return Ok(());
            }
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let k = FloatKey::generate(Some(&lo), Some(&hi)).unwrap();
            prop_assert!(lo < k && k < hi);
        }
    }
}
