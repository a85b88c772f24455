//! Error types for escrow operations

use crate::state::ChannelStatus;
use crate::types::Amount;
use thiserror::Error;

/// Escrow result type
pub type Result<T> = std::result::Result<T, Error>;

/// Escrow errors
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires an Active channel
    #[error("Channel is not active (status {status:?})")]
    ChannelNotActive {
        /// Observed status
        status: ChannelStatus,
    },

    /// A channel already exists and is neither Inactive nor Settled
    #[error("Channel is not inactive (status {status:?})")]
    ChannelNotInactive {
        /// Observed status
        status: ChannelStatus,
    },

    /// Operation requires a Closing channel
    #[error("Channel is not closing (status {status:?})")]
    ChannelNotClosing {
        /// Observed status
        status: ChannelStatus,
    },

    /// Operation requires a Disputed channel
    #[error("Channel is not disputed (status {status:?})")]
    ChannelNotDisputed {
        /// Observed status
        status: ChannelStatus,
    },

    /// Deposit below the protocol minimum
    #[error("Deposit {actual} below minimum {minimum}")]
    InsufficientDeposit {
        /// Protocol minimum
        minimum: Amount,
        /// Offered amount
        actual: Amount,
    },

    /// Channel balance cannot cover the requested amount
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Required amount
        required: Amount,
        /// Available balance
        available: Amount,
    },

    /// Bond balance cannot cover the requested withdrawal
    #[error("Insufficient bond: required {required}, available {available}")]
    InsufficientBond {
        /// Required amount
        required: Amount,
        /// Bonded amount
        available: Amount,
    },

    /// Facilitator bond below the qualification minimum
    #[error("Facilitator bond {actual} below minimum {minimum}")]
    InsufficientFacilitatorBond {
        /// Qualification minimum
        minimum: Amount,
        /// Bonded amount
        actual: Amount,
    },

    /// Merkle proof did not fold to the checkpoint root
    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    /// Signature malformed, malleable, or recovered to the wrong signer
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Dispute attempted after the dispute deadline
    #[error("Dispute window expired at {deadline} (now {now})")]
    DisputeWindowExpired {
        /// Absolute deadline
        deadline: u64,
        /// Current time
        now: u64,
    },

    /// Confirmation attempted before the dispute deadline
    #[error("Dispute window open until {deadline} (now {now})")]
    DisputeWindowNotExpired {
        /// Absolute deadline
        deadline: u64,
        /// Current time
        now: u64,
    },

    /// Proof submission attempted after the proof deadline
    #[error("Proof window expired at {deadline} (now {now})")]
    ProofWindowExpired {
        /// Absolute deadline
        deadline: u64,
        /// Current time
        now: u64,
    },

    /// Finalization attempted before the proof deadline
    #[error("Proof window open until {deadline} (now {now})")]
    ProofWindowNotExpired {
        /// Absolute deadline
        deadline: u64,
        /// Current time
        now: u64,
    },

    /// Caller is not a party entitled to this operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Amount rejected: zero where positive required, or checked arithmetic overflow
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// External asset transfer reverted or returned false
    #[error("Asset transfer failed: {0}")]
    AssetTransferFailed(String),

    /// Status change outside the channel state machine
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current status
        from: ChannelStatus,
        /// Requested status
        to: ChannelStatus,
    },

    /// Wire payload (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
