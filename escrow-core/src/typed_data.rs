//! Domain-separated typed-data hashing
//!
//! Two domains are in use:
//! - `"x402 Channel"`: channel authorization presented at the HTTP boundary
//! - `"ChannelEscrow"`: per-call authorization verified during dispute proofs
//!
//! A domain separator is `keccak(domain_type_hash || name || version ||
//! chain_id || contract)`; a message hash is `keccak(type_hash ||
//! field_hashes...)`; the signing digest is
//! `keccak(0x19 || 0x01 || domain_separator || message_hash)`.

use crate::crypto::{keccak256, PackedDigest};
use crate::types::{Address, Amount, Hash32};
use serde::{Deserialize, Serialize};

/// Shared version string for both domains.
pub const DOMAIN_VERSION: &str = "1";

/// Domain name for channel authorizations.
pub const CHANNEL_DOMAIN_NAME: &str = "x402 Channel";

/// Domain name for call authorizations.
pub const CALL_DOMAIN_NAME: &str = "ChannelEscrow";

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const CHANNEL_AUTHORIZATION_TYPE: &[u8] = b"ChannelAuthorization(address agent,string sessionId,string endpoint,uint256 nonce,uint256 timestamp)";

const CALL_AUTHORIZATION_TYPE: &[u8] =
    b"CallAuthorization(bytes32 callId,uint256 cost,uint256 timestamp,address escrow)";

/// Domain separator binding a name, the chain, and the escrow contract.
pub fn domain_separator(name: &str, chain_id: u64, contract: &Address) -> Hash32 {
    let mut packed = PackedDigest::new();
    packed.write_bytes32(&keccak256(DOMAIN_TYPE));
    packed.write_bytes32(&keccak256(name.as_bytes()));
    packed.write_bytes32(&keccak256(DOMAIN_VERSION.as_bytes()));
    packed.write_u256(chain_id as Amount);
    // Addresses widen to a full word in struct encodings
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(contract.as_bytes());
    packed.write_bytes32(&word);
    packed.finalize()
}

/// Final signing digest: `keccak(0x19 || 0x01 || domain || message)`.
pub fn signing_digest(domain: &Hash32, message: &Hash32) -> Hash32 {
    let mut packed = PackedDigest::new();
    packed.write_bytes(&[0x19, 0x01]);
    packed.write_bytes32(domain);
    packed.write_bytes32(message);
    packed.finalize()
}

fn address_word(address: &Address) -> Hash32 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

// =========================================================================
// CHANNEL AUTHORIZATION (HTTP boundary)
// =========================================================================

/// Agent authorization for opening a paid session against an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAuthorization {
    /// Agent (payer) account
    pub agent: Address,
    /// Session identifier issued by the server
    pub session_id: String,
    /// Endpoint the session is scoped to
    pub endpoint: String,
    /// Monotonic session nonce
    pub nonce: u64,
    /// Unix timestamp of the authorization
    pub timestamp: u64,
}

impl ChannelAuthorization {
    /// Struct hash: dynamic fields enter as their keccak digests.
    pub fn struct_hash(&self) -> Hash32 {
        let mut packed = PackedDigest::new();
        packed.write_bytes32(&keccak256(CHANNEL_AUTHORIZATION_TYPE));
        packed.write_bytes32(&address_word(&self.agent));
        packed.write_bytes32(&keccak256(self.session_id.as_bytes()));
        packed.write_bytes32(&keccak256(self.endpoint.as_bytes()));
        packed.write_u256(self.nonce as Amount);
        packed.write_u256(self.timestamp as Amount);
        packed.finalize()
    }

    /// Digest the agent signs.
    pub fn signing_digest(&self, chain_id: u64, escrow: &Address) -> Hash32 {
        let domain = domain_separator(CHANNEL_DOMAIN_NAME, chain_id, escrow);
        signing_digest(&domain, &self.struct_hash())
    }
}

// =========================================================================
// CALL AUTHORIZATION (dispute proofs)
// =========================================================================

/// Payer authorization for a single metered call, verified under the
/// stronger adjudication tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAuthorization {
    /// Unique call identifier
    pub call_id: Hash32,
    /// Call cost in minor units
    pub cost: Amount,
    /// Unix timestamp of the call
    pub timestamp: u64,
    /// Escrow contract the authorization is bound to
    pub escrow: Address,
}

impl CallAuthorization {
    /// Struct hash over the four fixed-width fields.
    pub fn struct_hash(&self) -> Hash32 {
        let mut packed = PackedDigest::new();
        packed.write_bytes32(&keccak256(CALL_AUTHORIZATION_TYPE));
        packed.write_bytes32(&self.call_id);
        packed.write_u256(self.cost);
        packed.write_u256(self.timestamp as Amount);
        packed.write_bytes32(&address_word(&self.escrow));
        packed.finalize()
    }

    /// Digest the payer signs.
    pub fn signing_digest(&self, chain_id: u64, escrow: &Address) -> Hash32 {
        let domain = domain_separator(CALL_DOMAIN_NAME, chain_id, escrow);
        signing_digest(&domain, &self.struct_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escrow() -> Address {
        Address::from_bytes([0xee; 20])
    }

    #[test]
    fn test_domain_separators_differ() {
        let a = domain_separator(CHANNEL_DOMAIN_NAME, 1, &escrow());
        let b = domain_separator(CALL_DOMAIN_NAME, 1, &escrow());
        assert_ne!(a, b);

        // Chain and contract both bind
        assert_ne!(a, domain_separator(CHANNEL_DOMAIN_NAME, 2, &escrow()));
        assert_ne!(
            a,
            domain_separator(CHANNEL_DOMAIN_NAME, 1, &Address::from_bytes([0x01; 20]))
        );
    }

    #[test]
    fn test_channel_authorization_binds_every_field() {
        let base = ChannelAuthorization {
            agent: Address::from_bytes([0x0a; 20]),
            session_id: "sess-1".to_string(),
            endpoint: "/v1/complete".to_string(),
            nonce: 1,
            timestamp: 1_700_000_000,
        };
        let digest = base.signing_digest(1, &escrow());

        let mut other = base.clone();
        other.nonce = 2;
        assert_ne!(other.signing_digest(1, &escrow()), digest);

        let mut other = base.clone();
        other.endpoint = "/v1/other".to_string();
        assert_ne!(other.signing_digest(1, &escrow()), digest);

        let mut other = base;
        other.session_id = "sess-2".to_string();
        assert_ne!(other.signing_digest(1, &escrow()), digest);
    }

    #[test]
    fn test_call_authorization_is_deterministic() {
        let auth = CallAuthorization {
            call_id: [0x42; 32],
            cost: 10_000,
            timestamp: 1_700_000_000,
            escrow: escrow(),
        };
        assert_eq!(
            auth.signing_digest(1, &escrow()),
            auth.signing_digest(1, &escrow())
        );
        let mut other = auth;
        other.cost = 10_001;
        assert_ne!(
            other.signing_digest(1, &escrow()),
            auth.signing_digest(1, &escrow())
        );
    }

    #[test]
    fn test_signing_digest_uses_typed_data_prefix() {
        let domain = [0x11; 32];
        let message = [0x22; 32];
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x19, 0x01]);
        raw.extend_from_slice(&domain);
        raw.extend_from_slice(&message);
        assert_eq!(signing_digest(&domain, &message), keccak256(&raw));
    }
}
