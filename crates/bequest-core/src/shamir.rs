//! Shamir (k, n) threshold sharing of item keys.
//!
//! A secret of up to 32 bytes is read as one element of GF(P) (see
//! [`crate::field`]) and hidden as the constant term of a random polynomial of
//! degree `k - 1`. Share `i` is the evaluation at `x = i`. Any `k` shares
//! recover the constant term by Lagrange interpolation at zero; fewer reveal
//! nothing about it.
//!
//! Every share carries a short SHA-256 checksum over its index and value so a
//! damaged share is reported as such instead of silently producing the wrong
//! secret.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::ShamirError;
use crate::field::{FieldElement, ELEMENT_LEN};

pub const MIN_THRESHOLD: u8 = 2;
pub const MAX_SHARES: usize = 255;
pub const MAX_SECRET_LEN: usize = 32;

/// Bytes of SHA-256 kept as the share checksum.
const CHECKSUM_LEN: usize = 8;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretShare {
    pub index: u8,
    #[serde(with = "hex_value")]
    pub value: Vec<u8>,
    pub threshold: u8,
    pub total_shares: u8,
    pub secret_len: u8,
    pub checksum: String,
}

impl std::fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretShare")
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("total_shares", &self.total_shares)
            .field("secret_len", &self.secret_len)
            .finish_non_exhaustive()
    }
}

impl SecretShare {
    fn new(index: u8, value: Vec<u8>, threshold: u8, total_shares: u8, secret_len: u8) -> Self {
        let checksum = share_checksum(index, &value);
        Self {
            index,
            value,
            threshold,
            total_shares,
            secret_len,
            checksum,
        }
    }

    /// True when the checksum matches the current index and value.
    pub fn verify(&self) -> bool {
        self.value.len() == ELEMENT_LEN && share_checksum(self.index, &self.value) == self.checksum
    }

    /// Base64 of the JSON form; the manual recovery input format.
    pub fn encode(&self) -> Result<String, ShamirError> {
        let json = Zeroizing::new(
            serde_json::to_vec(self).map_err(|e| ShamirError::Malformed(e.to_string()))?,
        );
        Ok(general_purpose::STANDARD.encode(json.as_slice()))
    }

    pub fn decode(encoded: &str) -> Result<Self, ShamirError> {
        let json = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| ShamirError::Malformed(format!("base64: {e}")))?,
        );
        serde_json::from_slice(&json).map_err(|e| ShamirError::Malformed(format!("json: {e}")))
    }

    fn x(&self) -> FieldElement {
        FieldElement::from_u64(u64::from(self.index))
    }

    fn y(&self) -> Result<FieldElement, ShamirError> {
        Ok(FieldElement::from_be_bytes(&self.value)?)
    }
}

fn share_checksum(index: u8, value: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update([index]);
    hasher.update(value);
    hex::encode(&hasher.finalize()[..CHECKSUM_LEN])
}

/// Split `secret` into `total_shares` shares, any `threshold` of which
/// reconstruct it.
pub fn split(
    secret: &[u8],
    threshold: u8,
    total_shares: usize,
) -> Result<Vec<SecretShare>, ShamirError> {
    if threshold < MIN_THRESHOLD {
        return Err(ShamirError::ThresholdTooLow);
    }
    if usize::from(threshold) > total_shares {
        return Err(ShamirError::ThresholdExceedsTotalShares);
    }
    if total_shares > MAX_SHARES {
        return Err(ShamirError::TooManyShares);
    }
    if secret.len() > MAX_SECRET_LEN {
        return Err(ShamirError::SecretTooLarge);
    }
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }

    let mut coefficients = Vec::with_capacity(usize::from(threshold));
    coefficients.push(FieldElement::from_be_bytes(secret)?);
    for _ in 1..threshold {
        coefficients.push(FieldElement::random());
    }

    let total = total_shares as u8;
    let secret_len = secret.len() as u8;
    let mut shares = Vec::with_capacity(total_shares);
    for index in 1..=total {
        let y = evaluate(&coefficients, &FieldElement::from_u64(u64::from(index)));
        let value = y.to_be_bytes_padded(ELEMENT_LEN)?;
        shares.push(SecretShare::new(index, value, threshold, total, secret_len));
    }
    Ok(shares)
}

/// Horner evaluation; `coefficients[0]` is the constant term.
fn evaluate(coefficients: &[FieldElement], x: &FieldElement) -> FieldElement {
    coefficients
        .iter()
        .rev()
        .fold(FieldElement::zero(), |acc, c| acc.mul(x).add(c))
}

/// Reconstruct the secret from at least `threshold` shares of one split.
/// Only the first `threshold` shares take part in the interpolation.
pub fn combine(shares: &[SecretShare]) -> Result<Zeroizing<Vec<u8>>, ShamirError> {
    let first = shares.first().ok_or(ShamirError::NoShares)?;
    let compatible = shares.iter().all(|s| {
        s.threshold == first.threshold
            && s.total_shares == first.total_shares
            && s.secret_len == first.secret_len
    });
    if !compatible || first.threshold < MIN_THRESHOLD {
        return Err(ShamirError::IncompatibleShares);
    }

    let need = usize::from(first.threshold);
    if shares.len() < need {
        return Err(ShamirError::InsufficientShares {
            have: shares.len(),
            need,
        });
    }
    if let Some(bad) = shares.iter().find(|s| !s.verify() || s.index == 0) {
        return Err(ShamirError::CorruptedShare(bad.index));
    }

    let used = &shares[..need];
    let mut seen = HashSet::with_capacity(need);
    for share in used {
        if !seen.insert(share.index) {
            return Err(ShamirError::DuplicateShare(share.index));
        }
    }

    let secret = interpolate_at_zero(used)?;
    let bytes = secret
        .to_be_bytes_padded(usize::from(first.secret_len))
        .map_err(|_| ShamirError::IncompatibleShares)?;
    Ok(Zeroizing::new(bytes))
}

fn interpolate_at_zero(shares: &[SecretShare]) -> Result<FieldElement, ShamirError> {
    let xs: Vec<FieldElement> = shares.iter().map(SecretShare::x).collect();
    let mut acc = FieldElement::zero();
    for (j, share) in shares.iter().enumerate() {
        let mut numerator = FieldElement::one();
        let mut denominator = FieldElement::one();
        for (m, xm) in xs.iter().enumerate() {
            if m == j {
                continue;
            }
            numerator = numerator.mul(xm);
            denominator = denominator.mul(&xm.sub(&xs[j]));
        }
        let basis = numerator.div(&denominator)?;
        acc = acc.add(&share.y()?.mul(&basis));
    }
    Ok(acc)
}

mod hex_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
