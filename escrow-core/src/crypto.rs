//! Hash and signature primitives
//!
//! - keccak-256 over packed byte concatenations (addresses 20 bytes,
//!   256-bit integers 32 bytes big-endian, digests verbatim, variable
//!   bytes verbatim without length prefix)
//! - ECDSA public-key recovery with the low-`s` malleability rule
//!
//! Encodings must be bit-exact with the platform-native packed encoding;
//! any off-chain peer recomputes the same digests.

use crate::error::{Error, Result};
use crate::types::{Address, Hash32};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::scalar::IsHigh;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

/// keccak-256 of a byte slice.
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// =========================================================================
// PACKED DIGESTS
// =========================================================================

/// Streaming keccak-256 over the packed encoding.
///
/// Field order is the caller's; widths are fixed per type, with no length
/// prefixes, matching the platform-native packed encoding.
pub struct PackedDigest {
    hasher: Keccak256,
}

impl PackedDigest {
    /// Start a new digest.
    pub fn new() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }

    /// Write a 20-byte address.
    pub fn write_address(&mut self, address: &Address) {
        self.hasher.update(address.as_bytes());
    }

    /// Write a 256-bit unsigned integer, big-endian. The upper 128 bits are
    /// zero by construction of [`crate::types::Amount`].
    pub fn write_u256(&mut self, value: u128) {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        self.hasher.update(word);
    }

    /// Write a fixed 32-byte digest verbatim.
    pub fn write_bytes32(&mut self, digest: &Hash32) {
        self.hasher.update(digest);
    }

    /// Write variable bytes verbatim, without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> Hash32 {
        self.hasher.finalize().into()
    }
}

impl Default for PackedDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of a personal-sign message over a payload:
/// `keccak("\x19Ethereum Signed Message:\n" || len || payload)`.
pub fn personal_digest(payload: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", payload.len()).as_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

// =========================================================================
// RECOVERABLE SIGNATURES
// =========================================================================

/// A 65-byte `(r, s, v)` recovery signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature(pub [u8; 65]);

impl RecoverableSignature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// Recovery byte `v` (raw, before normalization).
    pub const fn v(&self) -> u8 {
        self.0[64]
    }

    /// Hex string with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from a hex string, with or without `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| Error::InvalidSignature(format!("bad signature hex: {e}")))?;
        let arr: [u8; 65] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSignature("signature must be 65 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..18])
    }
}

impl Serialize for RecoverableSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecoverableSignature {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Recover the signer of `digest` from a 65-byte recovery signature.
///
/// High-`s` signatures are rejected before recovery; `v` values of 27/28
/// normalize to recovery ids 0/1.
pub fn recover_signer(digest: &Hash32, signature: &RecoverableSignature) -> Result<Address> {
    let sig = EcdsaSignature::from_slice(&signature.0[..64])
        .map_err(|e| Error::InvalidSignature(format!("malformed r||s: {e}")))?;

    if bool::from(sig.s().is_high()) {
        return Err(Error::InvalidSignature(
            "high-s signature rejected (malleable)".to_string(),
        ));
    }

    let v = signature.0[64];
    let recovery_byte = if v < 27 { v } else { v - 27 };
    let recovery_id = RecoveryId::from_byte(recovery_byte).ok_or_else(|| {
        Error::InvalidSignature(format!("recovery id {recovery_byte} out of range"))
    })?;

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| Error::InvalidSignature(format!("recovery failed: {e}")))?;

    Ok(address_of(&key))
}

/// Recover the signer and require it to match `expected`.
pub fn verify_signer(
    digest: &Hash32,
    signature: &RecoverableSignature,
    expected: &Address,
) -> Result<()> {
    let recovered = recover_signer(digest, signature)?;
    if recovered != *expected {
        return Err(Error::InvalidSignature(format!(
            "recovered {recovered}, expected {expected}"
        )));
    }
    Ok(())
}

/// Derive the 20-byte account of a public key: keccak of the uncompressed
/// point without its SEC1 tag byte, truncated to the final 20 bytes.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Sign a 32-byte digest, returning a 65-byte recovery signature with
/// `v ∈ {27, 28}` and low-`s` normalized `s`.
pub fn sign_digest(key: &SigningKey, digest: &Hash32) -> Result<RecoverableSignature> {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .map_err(|e| Error::InvalidSignature(format!("signing failed: {e}")))?;

    let mut bytes = [0u8; 65];
    bytes[..64].copy_from_slice(sig.to_bytes().as_slice());
    bytes[64] = recovery_id.to_byte() + 27;
    Ok(RecoverableSignature(bytes))
}
