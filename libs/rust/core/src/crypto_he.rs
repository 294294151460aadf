//! Additively homomorphic ciphertext capability.
//!
//! The coordinator only ever needs three operations from an encryption scheme:
//! turn a plaintext vector into a ciphertext, add two ciphertexts, and decrypt a
//! (summed) ciphertext. [`AdditiveHomomorphic`] is that seam; production
//! deployments plug a lattice scheme in behind it.
//!
//! [`MaskedSumScheme`] is a symmetric scheme good enough for tests, the demo and
//! single-tenant deployments where the coordinator is allowed to hold the key:
//! every slot is a fixed-point value masked with a keyed SHA-256 stream, and the
//! ciphertext remembers the nonces whose masks it carries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HeError;

pub trait AdditiveHomomorphic: Send + Sync {
    type Ciphertext: Clone + Send + Sync;

    fn encode(&self, plaintext: &[f64]) -> Result<Self::Ciphertext, HeError>;

    /// Homomorphic addition. Must be commutative and associative.
    fn add(&self, left: &Self::Ciphertext, right: &Self::Ciphertext) -> Result<Self::Ciphertext, HeError>;

    fn decrypt(&self, ciphertext: &Self::Ciphertext) -> Result<Vec<f64>, HeError>;
}

const FRACTION_BITS: u32 = 24;
const SCALE: f64 = (1u64 << FRACTION_BITS) as f64;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedCiphertext {
    slots: Vec<u64>,
    nonces: Vec<u64>,
}

impl MaskedCiphertext {
    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
    /// Number of encodings folded into this ciphertext.
    pub fn terms(&self) -> usize { self.nonces.len() }
}

#[derive(Clone)]
pub struct MaskedSumScheme {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for MaskedSumScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskedSumScheme").finish_non_exhaustive()
    }
}

impl MaskedSumScheme {
    pub fn new(key: [u8; KEY_LEN]) -> Self { Self { key } }

    pub fn from_hex(key_hex: &str) -> Result<Self, HeError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|e| HeError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| HeError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", b.len())))?;
        Ok(Self::new(key))
    }

    pub fn generate() -> Self { Self::new(rand::thread_rng().gen()) }

    pub fn key_hex(&self) -> String { hex::encode(self.key) }

    fn mask(&self, nonce: u64, slot: usize) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(nonce.to_le_bytes());
        hasher.update((slot as u64).to_le_bytes());
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(word)
    }
}

fn to_fixed(value: f64) -> Result<u64, HeError> {
    let scaled = (value * SCALE).round();
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(HeError::Unencodable(value));
    }
    Ok(scaled as i64 as u64)
}

fn from_fixed(word: u64) -> f64 { word as i64 as f64 / SCALE }

impl AdditiveHomomorphic for MaskedSumScheme {
    type Ciphertext = MaskedCiphertext;

    fn encode(&self, plaintext: &[f64]) -> Result<MaskedCiphertext, HeError> {
        let nonce: u64 = rand::thread_rng().gen();
        let slots = plaintext
            .iter()
            .enumerate()
            .map(|(i, v)| Ok(to_fixed(*v)?.wrapping_add(self.mask(nonce, i))))
            .collect::<Result<Vec<_>, HeError>>()?;
        Ok(MaskedCiphertext { slots, nonces: vec![nonce] })
    }

    fn add(&self, left: &MaskedCiphertext, right: &MaskedCiphertext) -> Result<MaskedCiphertext, HeError> {
        if left.slots.len() != right.slots.len() {
            return Err(HeError::LengthMismatch { left: left.slots.len(), right: right.slots.len() });
        }
        let slots = left.slots.iter().zip(&right.slots).map(|(a, b)| a.wrapping_add(*b)).collect();
        let mut nonces = Vec::with_capacity(left.nonces.len() + right.nonces.len());
        nonces.extend_from_slice(&left.nonces);
        nonces.extend_from_slice(&right.nonces);
        // keeps the ciphertext itself independent of fold order
        nonces.sort_unstable();
        Ok(MaskedCiphertext { slots, nonces })
    }

    fn decrypt(&self, ciphertext: &MaskedCiphertext) -> Result<Vec<f64>, HeError> {
        if ciphertext.nonces.is_empty() {
            return Err(HeError::Malformed("ciphertext carries no nonces".into()));
        }
        Ok(ciphertext
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let mask = ciphertext.nonces.iter().fold(0u64, |acc, n| acc.wrapping_add(self.mask(*n, i)));
                from_fixed(slot.wrapping_sub(mask))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> MaskedSumScheme { MaskedSumScheme::new([7u8; KEY_LEN]) }

    #[test]
    fn sum_decrypts_to_plaintext_sum() {
        let he = scheme();
        let a = he.encode(&[1.0, -2.5, 0.125]).unwrap();
        let b = he.encode(&[2.0, 0.5, 0.125]).unwrap();
        let sum = he.add(&a, &b).unwrap();
        assert_eq!(sum.terms(), 2);
        assert_eq!(he.decrypt(&sum).unwrap(), vec![3.0, -2.0, 0.25]);
    }

    #[test]
    fn ciphertext_hides_plaintext() {
        let he = scheme();
        let ct = he.encode(&[1.0]).unwrap();
        assert_ne!(ct.slots[0], to_fixed(1.0).unwrap());
    }

    #[test]
    fn add_is_order_independent() {
        let he = scheme();
        let cts: Vec<_> = [1.0, 2.0, 3.0].iter().map(|v| he.encode(&[*v]).unwrap()).collect();
        let ab_c = he.add(&he.add(&cts[0], &cts[1]).unwrap(), &cts[2]).unwrap();
        let c_ba = he.add(&cts[2], &he.add(&cts[1], &cts[0]).unwrap()).unwrap();
        assert_eq!(ab_c, c_ba);
    }

    #[test]
    fn rejects_mismatched_lengths_and_empty_nonces() {
        let he = scheme();
        let a = he.encode(&[1.0, 2.0]).unwrap();
        let b = he.encode(&[1.0]).unwrap();
        assert_eq!(he.add(&a, &b), Err(HeError::LengthMismatch { left: 2, right: 1 }));
        let bare = MaskedCiphertext { slots: vec![1], nonces: vec![] };
        assert!(matches!(he.decrypt(&bare), Err(HeError::Malformed(_))));
    }

    #[test]
    fn key_from_hex() {
        let he = scheme();
        let again = MaskedSumScheme::from_hex(&he.key_hex()).unwrap();
        let ct = he.encode(&[4.5]).unwrap();
        assert_eq!(again.decrypt(&ct).unwrap(), vec![4.5]);
        assert!(matches!(MaskedSumScheme::from_hex("abcd"), Err(HeError::InvalidKey(_))));
        assert!(MaskedSumScheme::encode(&he, &[f64::NAN]).is_err());
    }
}
