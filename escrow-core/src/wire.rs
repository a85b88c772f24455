//! HTTP challenge/receipt wire payloads
//!
//! The HTTP surface itself is an external collaborator; this module pins
//! the header payload layouts and the cryptography the boundary delegates
//! here: the challenge a server issues with a 402, the signed authorization
//! an agent presents, and the per-call receipt a server returns.
//!
//! Amounts cross the wire as decimal strings in minor units; digests and
//! signatures as `0x`-prefixed hex.

use crate::config::EscrowConfig;
use crate::crypto::{self, PackedDigest, RecoverableSignature};
use crate::error::{Error, Result};
use crate::typed_data::ChannelAuthorization;
use crate::types::{hash32_from_hex, Address, Amount, Hash32};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

// =========================================================================
// CHALLENGE (server → agent, with the 402)
// =========================================================================

/// Payment challenge issued alongside a 402 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Protocol version
    pub x402_version: u32,
    /// Payment scheme (always `"channel"` here)
    pub scheme: String,
    /// Chain the escrow lives on
    pub chain_id: u64,
    /// Human-readable network name
    pub network: String,
    /// Receiver account the channel settles to
    pub pay_to: String,
    /// Settlement asset contract
    pub asset: String,
    /// Maximum cost of the challenged call, decimal minor units
    pub max_amount: String,
    /// Unix expiry of the challenge
    pub expiry: u64,
    /// Channel-scheme extension fields
    pub extra: ChallengeExtra,
}

/// Channel-scheme extension of the challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeExtra {
    /// Escrow contract address
    pub escrow_address: String,
    /// Minimum deposit to open a channel, decimal minor units
    pub min_deposit: String,
    /// Facilitator the server accepts
    pub facilitator_address: String,
    /// Facilitator's current bond, decimal minor units
    pub facilitator_bond: String,
}

impl PaymentChallenge {
    /// Build a channel-scheme challenge from the escrow configuration.
    pub fn for_channel(
        config: &EscrowConfig,
        pay_to: &Address,
        asset: &Address,
        facilitator: &Address,
        facilitator_bond: Amount,
        max_amount: Amount,
        expiry: u64,
    ) -> Self {
        Self {
            x402_version: crate::X402_VERSION,
            scheme: "channel".to_string(),
            chain_id: config.chain_id,
            network: config.network.clone(),
            pay_to: pay_to.to_hex(),
            asset: asset.to_hex(),
            max_amount: max_amount.to_string(),
            expiry,
            extra: ChallengeExtra {
                escrow_address: config.escrow_address.to_hex(),
                min_deposit: config.min_deposit.to_string(),
                facilitator_address: facilitator.to_hex(),
                facilitator_bond: facilitator_bond.to_string(),
            },
        }
    }
}

// =========================================================================
// AUTHORIZATION (agent → server)
// =========================================================================

/// Authorization header payload presented by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorizationHeader {
    /// Protocol version
    pub x402_version: u32,
    /// Payment scheme the agent selected
    pub scheme: String,
    /// Agent (payer) account
    pub agent_address: String,
    /// 65-byte recovery signature over the typed-data digest
    pub signature: RecoverableSignature,
    /// Scheme-specific authorization body
    pub authorization: PaymentAuthorization,
}

/// Payment authorization, a tagged sum over the supported schemes. The
/// adjudicator only handles the `channel` variant; `exact` is carried for
/// boundary completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "camelCase")]
pub enum PaymentAuthorization {
    /// Escrow-channel session authorization
    #[serde(rename_all = "camelCase")]
    Channel {
        /// Escrow contract the session is bound to
        escrow_address: String,
        /// Server-issued session id
        session_id: String,
        /// Monotonic session nonce
        nonce: u64,
        /// Unix timestamp of the authorization
        timestamp: u64,
    },
    /// One-shot exact-amount authorization
    #[serde(rename_all = "camelCase")]
    Exact {
        /// Receiver account
        pay_to: String,
        /// Exact amount, decimal minor units
        amount: String,
        /// Monotonic nonce
        nonce: u64,
        /// Unix timestamp of the authorization
        timestamp: u64,
    },
}

impl PaymentAuthorizationHeader {
    /// Verify a channel authorization and recover the agent.
    ///
    /// The endpoint is not carried in the header; it is the request target
    /// the server already knows, so the caller supplies it.
    pub fn verify_channel(&self, chain_id: u64, endpoint: &str) -> Result<Address> {
        let (escrow_address, session_id, nonce, timestamp) = match &self.authorization {
            PaymentAuthorization::Channel {
                escrow_address,
                session_id,
                nonce,
                timestamp,
            } => (escrow_address, session_id, *nonce, *timestamp),
            PaymentAuthorization::Exact { .. } => {
                return Err(Error::Unauthorized(
                    "exact-scheme authorization presented to a channel endpoint".to_string(),
                ))
            }
        };

        let agent = Address::from_hex(&self.agent_address)?;
        let escrow = Address::from_hex(escrow_address)?;
        let digest = ChannelAuthorization {
            agent,
            session_id: session_id.clone(),
            endpoint: endpoint.to_string(),
            nonce,
            timestamp,
        }
        .signing_digest(chain_id, &escrow);

        crypto::verify_signer(&digest, &self.signature, &agent)?;
        Ok(agent)
    }
}

// =========================================================================
// RECEIPT (server → agent, per call)
// =========================================================================

/// Per-call receipt returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    /// Unique call identifier, 32 bytes hex
    pub call_id: String,
    /// Endpoint that served the call
    pub endpoint: String,
    /// Call cost, decimal minor units
    pub cost: String,
    /// Unix timestamp of the call
    pub timestamp: u64,
    /// Server personal-sign signature over the packed receipt digest
    pub server_signature: RecoverableSignature,
}

/// Packed receipt digest: `keccak(call_id || endpoint || cost || timestamp)`
/// wrapped as a personal-sign message.
pub fn receipt_digest(call_id: &Hash32, endpoint: &str, cost: Amount, timestamp: u64) -> Hash32 {
    let mut packed = PackedDigest::new();
    packed.write_bytes32(call_id);
    packed.write_bytes(endpoint.as_bytes());
    packed.write_u256(cost);
    packed.write_u256(timestamp as Amount);
    crypto::personal_digest(&packed.finalize())
}

impl CallReceipt {
    /// Issue a signed receipt with the server's key.
    pub fn issue(
        server_key: &SigningKey,
        call_id: Hash32,
        endpoint: &str,
        cost: Amount,
        timestamp: u64,
    ) -> Result<Self> {
        let digest = receipt_digest(&call_id, endpoint, cost, timestamp);
        Ok(Self {
            call_id: format!("0x{}", hex::encode(call_id)),
            endpoint: endpoint.to_string(),
            cost: cost.to_string(),
            timestamp,
            server_signature: crypto::sign_digest(server_key, &digest)?,
        })
    }

    /// Verify the receipt against the known server account.
    pub fn verify(&self, server: &Address) -> Result<()> {
        let call_id = hash32_from_hex(&self.call_id)?;
        let cost: Amount = self
            .cost
            .parse()
            .map_err(|e| Error::InvalidAmount(format!("receipt cost {:?}: {e}", self.cost)))?;
        let digest = receipt_digest(&call_id, &self.endpoint, cost, self.timestamp);
        crypto::verify_signer(&digest, &self.server_signature, server)
    }
}
