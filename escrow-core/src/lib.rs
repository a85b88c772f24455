//! # Channel Escrow Core
//!
//! Implements the adjudication engine for off-chain-authorized payment
//! channels between a payer (agent) and a receiver (server), intermediated
//! by a bonded facilitator:
//! - DEPOSIT / TOP_UP: lock funds once, accrue many small receipts off-chain
//! - CLOSE / CONFIRM: single-transaction settlement on agreement
//! - DISPUTE / PROOFS: Merkle-proof-based adjudication on disagreement
//! - BOND: facilitator collateral funding the symmetric punishment
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Adjudicator   │ ← deposits, closes, disputes, finalization
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  State Machine  │ ← channel status transitions
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  Cryptography   │ ← keccak-packed digests, ECDSA recovery, Merkle
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Bond & Channel  │ ← balance accounting, slash/penalty arithmetic
//! └─────────────────┘
//! ```
//!
//! ## Safety
//!
//! - `#![forbid(unsafe_code)]`: no unsafe operations
//! - Checked arithmetic on every amount; overflow is an error, never a wrap
//! - Operations validate before they mutate; failures leave state unchanged
//! - Low-`s` signature rule enforced at every recovery

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications, clippy::all)]

pub mod asset;
pub mod bond;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod escrow;
pub mod merkle;
pub mod state;
pub mod typed_data;
pub mod types;
pub mod wire;

pub use config::EscrowConfig;
pub use error::{Error, Result};
pub use escrow::Escrow;
pub use state::ChannelStatus;
pub use types::*;

/// Minimum channel deposit (minor units).
pub const MIN_DEPOSIT: Amount = 10_000_000;

/// Dispute window after a close is initiated (7 days).
pub const DISPUTE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Proof window after a dispute is raised (5 days).
pub const PROOF_WINDOW_SECS: u64 = 5 * 24 * 60 * 60;

/// Fee withheld from the channel balance when the payer raises a dispute.
pub const DISPUTE_FEE: Amount = 500_000;

/// Minimum bond for a facilitator to qualify at channel open.
pub const MIN_FACILITATOR_BOND: Amount = 100_000_000;

/// Underclaim penalty rate: numerator.
pub const UNDERCLAIM_PENALTY_NUMERATOR: Amount = 1;

/// Underclaim penalty rate: denominator.
pub const UNDERCLAIM_PENALTY_DENOMINATOR: Amount = 10;

/// x402 protocol version carried in wire payloads.
pub const X402_VERSION: u32 = 1;
