//! Prime-field arithmetic for secret sharing.
//!
//! Elements live in GF(P) with `P = 2^256 + 297`, the smallest prime above
//! 2^256, so every 32-byte secret is already a canonical element and survives
//! the byte round trip unchanged. Big-integer work is delegated to `num`.
//!
//! Serialized elements are big-endian and padded to [`ELEMENT_LEN`] bytes.

use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::OnceLock;

use num::bigint::Sign;
use num::{BigInt, BigUint, Integer, One, Zero};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::FieldError;

/// Width of a serialized field element. P needs 257 bits.
pub const ELEMENT_LEN: usize = 33;

/// Distance of the modulus above 2^256.
const MODULUS_OFFSET: u32 = 297;

fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| (BigUint::one() << 256usize) + BigUint::from(MODULUS_OFFSET))
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldElement(BigUint);

impl fmt::Debug for FieldElement {
    // Elements routinely carry key material.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldElement(..)")
    }
}

impl FieldElement {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn one() -> Self {
        Self(BigUint::one())
    }

    pub fn modulus() -> BigUint {
        modulus().clone()
    }

    /// Reduce an arbitrary integer into the field.
    pub fn from_biguint(value: BigUint) -> Self {
        Self(value % modulus())
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_biguint(BigUint::from(value))
    }

    /// Parse a big-endian encoding. Values at or above the modulus are
    /// rejected rather than silently reduced.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, FieldError> {
        let value = BigUint::from_bytes_be(bytes);
        if &value >= modulus() {
            return Err(FieldError::OutOfRange);
        }
        Ok(Self(value))
    }

    /// Minimal big-endian encoding (zero encodes as a single `0x00`).
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    /// Big-endian encoding left-padded with zeros to `len` bytes.
    pub fn to_be_bytes_padded(&self, len: usize) -> Result<Vec<u8>, FieldError> {
        let raw = self.0.to_bytes_be();
        let raw: &[u8] = if self.0.is_zero() { &[] } else { &raw };
        if raw.len() > len {
            return Err(FieldError::OutOfRange);
        }
        let mut out = vec![0u8; len - raw.len()];
        out.extend_from_slice(raw);
        Ok(out)
    }

    /// Uniform element drawn from the OS RNG by rejection sampling.
    pub fn random() -> Self {
        let mut buf = [0u8; ELEMENT_LEN];
        loop {
            OsRng.fill_bytes(&mut buf);
            buf[0] &= 0x01;
            let candidate = BigUint::from_bytes_be(&buf);
            if &candidate < modulus() {
                return Self(candidate);
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn add(&self, other: &Self) -> Self {
        Self((&self.0 + &other.0) % modulus())
    }

    pub fn sub(&self, other: &Self) -> Self {
        let p = modulus();
        if self.0 >= other.0 {
            Self(&self.0 - &other.0)
        } else {
            Self(p - (&other.0 - &self.0))
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self((&self.0 * &other.0) % modulus())
    }

    pub fn pow(&self, exponent: &BigUint) -> Self {
        Self(self.0.modpow(exponent, modulus()))
    }

    /// Multiplicative inverse via the extended Euclidean algorithm.
    pub fn inverse(&self) -> Result<Self, FieldError> {
        if self.0.is_zero() {
            return Err(FieldError::DivisionByZero);
        }
        let p = BigInt::from_biguint(Sign::Plus, modulus().clone());
        let a = BigInt::from_biguint(Sign::Plus, self.0.clone());

        let (mut old_r, mut r) = (a, p.clone());
        let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
        while !r.is_zero() {
            let (q, rem) = old_r.div_rem(&r);
            old_r = std::mem::replace(&mut r, rem);
            let next_s = &old_s - &q * &s;
            old_s = std::mem::replace(&mut s, next_s);
        }
        if !old_r.is_one() {
            return Err(FieldError::DivisionByZero);
        }
        let reduced = old_s.mod_floor(&p);
        reduced
            .to_biguint()
            .map(Self)
            .ok_or(FieldError::OutOfRange)
    }

    pub fn div(&self, other: &Self) -> Result<Self, FieldError> {
        Ok(self.mul(&other.inverse()?))
    }
}

impl Add for &FieldElement {
    type Output = FieldElement;

    fn add(self, rhs: Self) -> FieldElement {
        FieldElement::add(self, rhs)
    }
}

impl Sub for &FieldElement {
    type Output = FieldElement;

    fn sub(self, rhs: Self) -> FieldElement {
        FieldElement::sub(self, rhs)
    }
}

impl Mul for &FieldElement {
    type Output = FieldElement;

    fn mul(self, rhs: Self) -> FieldElement {
        FieldElement::mul(self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p_minus(n: u64) -> FieldElement {
        FieldElement::from_biguint(FieldElement::modulus() - BigUint::from(n))
    }

    #[test]
    fn modulus_exceeds_every_32_byte_value() {
        let max = FieldElement::from_be_bytes(&[0xff; 32]).unwrap();
        assert_eq!(max.to_be_bytes_padded(32).unwrap(), vec![0xff; 32]);
    }

    #[test]
    fn rejects_non_canonical_bytes() {
        let encoded = FieldElement::modulus().to_bytes_be();
        assert_eq!(
            FieldElement::from_be_bytes(&encoded).unwrap_err(),
            FieldError::OutOfRange
        );
    }

    #[test]
    fn padded_encoding_round_trips() {
        let value = FieldElement::from_u64(0x0102);
        let bytes = value.to_be_bytes_padded(ELEMENT_LEN).unwrap();
        assert_eq!(bytes.len(), ELEMENT_LEN);
        assert_eq!(&bytes[31..], &[0x01, 0x02]);
        assert_eq!(FieldElement::from_be_bytes(&bytes).unwrap(), value);
        assert_eq!(
            FieldElement::zero().to_be_bytes_padded(4).unwrap(),
            vec![0u8; 4]
        );
    }

    #[test]
    fn subtraction_wraps_around_modulus() {
        let a = FieldElement::from_u64(3);
        let b = FieldElement::from_u64(5);
        assert_eq!(a.sub(&b), p_minus(2));
        assert_eq!(&a.sub(&b) + &b, a);
    }

    #[test]
    fn addition_wraps_around_modulus() {
        assert_eq!(p_minus(1).add(&FieldElement::from_u64(2)), FieldElement::one());
    }

    #[test]
    fn inverse_times_value_is_one() {
        for v in [1u64, 2, 7, 255, 65_537, u64::MAX] {
            let x = FieldElement::from_u64(v);
            assert_eq!(x.mul(&x.inverse().unwrap()), FieldElement::one());
        }
        let big = p_minus(12345);
        assert_eq!(&big * &big.inverse().unwrap(), FieldElement::one());
    }

    #[test]
    fn inverse_matches_fermat() {
        let x = FieldElement::random();
        let exponent = FieldElement::modulus() - BigUint::from(2u8);
        assert_eq!(x.inverse().unwrap(), x.pow(&exponent));
    }

    #[test]
    fn zero_has_no_inverse() {
        assert_eq!(
            FieldElement::zero().inverse().unwrap_err(),
            FieldError::DivisionByZero
        );
        assert!(FieldElement::one().div(&FieldElement::zero()).is_err());
    }

    #[test]
    fn division_undoes_multiplication() {
        let a = FieldElement::random();
        let b = FieldElement::from_u64(42);
        assert_eq!(a.mul(&b).div(&b).unwrap(), a);
    }

    #[test]
    fn random_elements_are_canonical() {
        for _ in 0..64 {
            let x = FieldElement::random();
            let bytes = x.to_be_bytes_padded(ELEMENT_LEN).unwrap();
            assert_eq!(FieldElement::from_be_bytes(&bytes).unwrap(), x);
        }
    }
}
