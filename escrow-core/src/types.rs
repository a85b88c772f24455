//! Core escrow types
//!
//! All types are designed for:
//! - Deterministic hashing (packed big-endian encodings)
//! - Exact arithmetic (integer minor units, checked operations)
//! - JSON observability (serde derives on public records)

use crate::crypto::{PackedDigest, RecoverableSignature};
use crate::error::{Error, Result};
use crate::state::ChannelStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Amount of the settlement asset in minor units.
///
/// The wire and hash encodings widen to 32 big-endian bytes, so digests stay
/// bit-exact with 256-bit peers; in-memory arithmetic is checked `u128`.
pub type Amount = u128;

/// 32-byte digest (Merkle roots, call ids, typed-data hashes).
pub type Hash32 = [u8; 32];

/// Root digest of an empty Merkle accumulator.
pub const EMPTY_ROOT: Hash32 = [0u8; 32];

// =========================================================================
// ACCOUNTS
// =========================================================================

/// A 20-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address (sentinel, never a valid party).
    pub const ZERO: Self = Self([0u8; 20]);

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex string with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from a hex string, with or without `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| Error::InvalidAmount(format!("bad address hex: {e}")))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::InvalidAmount(format!("address must be 20 bytes: {s}")))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

/// Parse a 32-byte digest from a hex string, with or without `0x` prefix.
pub fn hash32_from_hex(s: &str) -> Result<Hash32> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes =
        hex::decode(stripped).map_err(|e| Error::InvalidProof(format!("bad digest hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidProof(format!("digest must be 32 bytes: {s}")))
}

// =========================================================================
// CALLS
// =========================================================================

/// A metered call as it appears in dispute proofs.
///
/// The Merkle leaf commits to `(call_id, cost, timestamp)`; the optional
/// signature is the payer's typed-data authorization over the same fields
/// plus the escrow address, required whenever the root in force was
/// asserted by the facilitator rather than committed by the payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedCall {
    /// Unique call identifier
    pub call_id: Hash32,
    /// Call cost in minor units
    pub cost: Amount,
    /// Unix timestamp of the call
    pub timestamp: u64,
    /// Payer authorization signature (65 bytes), when required by the root in force
    pub signature: Option<RecoverableSignature>,
}

impl SignedCall {
    /// Merkle leaf: `keccak(call_id || cost || timestamp)`, 32+32+32 bytes.
    pub fn leaf(&self) -> Hash32 {
        let mut packed = PackedDigest::new();
        packed.write_bytes32(&self.call_id);
        packed.write_u256(self.cost);
        packed.write_u256(self.timestamp as Amount);
        packed.finalize()
    }
}

// =========================================================================
// CHANNEL
// =========================================================================

/// Which side supplied the checkpoint root currently in force.
///
/// Governs the adjudication tier: proofs against a facilitator-supplied root
/// must carry per-call payer signatures; a payer-supplied root is itself an
/// admission, so the Merkle fold alone suffices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootSource {
    /// Root committed by the payer (initiate_close)
    Payer,
    /// Root asserted by the facilitator (claim_settlement, facilitator_dispute)
    Facilitator,
}

/// A settlement disbursement that has been resolved but not fully paid out.
///
/// Resolution records the full plan before any transfer is issued and marks
/// each leg as it completes, so a settlement retried after a failed transfer
/// only issues what is still owed, never a second copy of a completed leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDisbursement {
    /// Receiver share of the settlement
    pub settlement: Amount,
    /// Payer share from the channel balance (restored fee included)
    pub refund: Amount,
    /// Bond slash owed to the payer, transferred together with the refund
    pub slash: Amount,
    /// Whether the receiver share has been transferred
    pub receiver_paid: bool,
}

/// Per-payer channel record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Party that deposited and pays
    pub payer: Address,
    /// Bonded intermediary attesting off-chain receipts
    pub facilitator: Address,
    /// Party disbursed to at settlement
    pub receiver: Address,
    /// Locked funds remaining (minor units)
    pub balance: Amount,
    /// Last close proposal, either side
    pub claimed_amount: Amount,
    /// Counter-claim during dispute
    pub disputed_amount: Amount,
    /// Sum of successfully proven call costs this dispute
    pub proven_amount: Amount,
    /// Merkle root currently in force for proofs
    pub checkpoint_root: Hash32,
    /// Amount baselined at the last payer-committed checkpoint
    pub checkpoint_amount: Amount,
    /// Who supplied `checkpoint_root`
    pub root_source: RootSource,
    /// Fee currently withheld from the balance by a payer dispute
    pub dispute_fee_withheld: Amount,
    /// Disbursement resolved but not yet fully transferred
    pub pending_disbursement: Option<PendingDisbursement>,
    /// Absolute deadline for raising a dispute (0 when N/A)
    pub dispute_deadline: u64,
    /// Absolute deadline for submitting proofs (0 when N/A)
    pub proof_deadline: u64,
    /// Channel lifecycle status
    pub status: ChannelStatus,
    /// Generation counter, bumped on every (re)open
    pub generation: u64,
    /// Call ids already credited during this generation's dispute
    proven_calls: HashSet<Hash32>,
}

impl Channel {
    /// Fresh Active channel for a new generation. Counters and deadlines zeroed.
    pub fn open(
        payer: Address,
        facilitator: Address,
        receiver: Address,
        balance: Amount,
        generation: u64,
    ) -> Self {
        Self {
            payer,
            facilitator,
            receiver,
            balance,
            claimed_amount: 0,
            disputed_amount: 0,
            proven_amount: 0,
            checkpoint_root: EMPTY_ROOT,
            checkpoint_amount: 0,
            root_source: RootSource::Payer,
            dispute_fee_withheld: 0,
            pending_disbursement: None,
            dispute_deadline: 0,
            proof_deadline: 0,
            status: ChannelStatus::Active,
            generation,
            proven_calls: HashSet::new(),
        }
    }

    /// Whether a call id has already been credited this generation.
    pub fn is_proven(&self, call_id: &Hash32) -> bool {
        self.proven_calls.contains(call_id)
    }

    /// Mark a call id as credited. Returns false if it was already present.
    pub fn mark_proven(&mut self, call_id: Hash32) -> bool {
        self.proven_calls.insert(call_id)
    }

    /// Number of calls credited this generation.
    pub fn proven_call_count(&self) -> usize {
        self.proven_calls.len()
    }

    /// Checked status transition.
    pub fn set_status(&mut self, next: ChannelStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Per-payer channel records.
///
/// A payer with no record is treated as Inactive; a Settled record may be
/// replaced by a successor generation.
#[derive(Debug, Default)]
pub struct ChannelStore {
    channels: std::collections::HashMap<Address, Channel>,
}

impl ChannelStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for a payer; Inactive when no record exists.
    pub fn status_of(&self, payer: &Address) -> ChannelStatus {
        self.channels
            .get(payer)
            .map(|c| c.status)
            .unwrap_or(ChannelStatus::Inactive)
    }

    /// Look up a channel record.
    pub fn get(&self, payer: &Address) -> Option<&Channel> {
        self.channels.get(payer)
    }

    /// Look up a channel record mutably.
    pub fn get_mut(&mut self, payer: &Address) -> Option<&mut Channel> {
        self.channels.get_mut(payer)
    }

    /// Generation for the next channel opened by this payer.
    pub fn next_generation(&self, payer: &Address) -> u64 {
        self.channels
            .get(payer)
            .map(|c| c.generation + 1)
            .unwrap_or(1)
    }

    /// Install a channel record, replacing any settled predecessor.
    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.payer, channel);
    }

    /// Iterate all records (conservation checks, tests).
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }
}

// =========================================================================
// EVENTS
// =========================================================================

/// Events emitted by the adjudicator, consumed by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EscrowEvent {
    /// A channel was opened (or reopened) by a deposit
    #[serde(rename_all = "camelCase")]
    ChannelOpened {
        /// Channel payer
        payer: Address,
        /// Chosen facilitator
        facilitator: Address,
        /// Settlement receiver
        receiver: Address,
        /// Deposited amount
        amount: Amount,
        /// Channel generation
        generation: u64,
    },
    /// Additional funds were locked into an active channel
    #[serde(rename_all = "camelCase")]
    ChannelToppedUp {
        /// Channel payer
        payer: Address,
        /// Added amount
        amount: Amount,
        /// Balance after the top-up
        balance: Amount,
    },
    /// Either side proposed a close
    #[serde(rename_all = "camelCase")]
    CloseInitiated {
        /// Channel payer
        payer: Address,
        /// Who proposed the close
        initiator: Address,
        /// Proposed settlement amount
        claimed_amount: Amount,
        /// Deadline for the counterparty to contest
        dispute_deadline: u64,
    },
    /// A close proposal was contested
    #[serde(rename_all = "camelCase")]
    DisputeRaised {
        /// Channel payer
        payer: Address,
        /// Who contested
        disputant: Address,
        /// Counter-claimed amount
        disputed_amount: Amount,
        /// Deadline for proof submission
        proof_deadline: u64,
    },
    /// A proof batch was accepted
    #[serde(rename_all = "camelCase")]
    ProofSubmitted {
        /// Channel payer
        payer: Address,
        /// Calls credited by this batch
        calls_credited: u64,
        /// Amount added by this batch
        batch_amount: Amount,
        /// Proven total after the batch
        proven_amount: Amount,
    },
    /// The channel settled and funds were disbursed
    #[serde(rename_all = "camelCase")]
    ChannelSettled {
        /// Channel payer
        payer: Address,
        /// Settlement receiver
        receiver: Address,
        /// Amount disbursed to the receiver
        settlement: Amount,
        /// Amount refunded to the payer
        refund: Amount,
    },
    /// Facilitator collateral was deposited
    #[serde(rename_all = "camelCase")]
    BondDeposited {
        /// Facilitator account
        facilitator: Address,
        /// Deposited amount
        amount: Amount,
        /// Bond after the deposit
        bond: Amount,
    },
    /// Facilitator collateral was withdrawn
    #[serde(rename_all = "camelCase")]
    BondWithdrawn {
        /// Facilitator account
        facilitator: Address,
        /// Withdrawn amount
        amount: Amount,
        /// Bond after the withdrawal
        bond: Amount,
    },
    /// An overclaiming facilitator was slashed in favor of the payer
    #[serde(rename_all = "camelCase")]
    BondSlashed {
        /// Slashed facilitator
        facilitator: Address,
        /// Compensated payer
        payer: Address,
        /// Effective slash amount
        amount: Amount,
        /// Bond after the slash
        bond: Amount,
    },
    /// An underclaiming payer was penalized in favor of the receiver
    #[serde(rename_all = "camelCase")]
    PayerPenalized {
        /// Penalized payer
        payer: Address,
        /// Penalty added to the settlement
        penalty: Amount,
        /// Settlement including the penalty
        settlement: Amount,
    },
}
