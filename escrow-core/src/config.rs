//! Configuration for the escrow

use crate::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::env;

/// Escrow configuration
///
/// Defaults are the protocol constants; every field can be overridden from
/// the environment for testnets and local deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Minimum channel deposit (minor units)
    pub min_deposit: Amount,

    /// Dispute window after a close proposal (seconds)
    pub dispute_window_secs: u64,

    /// Proof window after a dispute (seconds)
    pub proof_window_secs: u64,

    /// Fee withheld when the payer raises a dispute (minor units)
    pub dispute_fee: Amount,

    /// Minimum facilitator bond to qualify at channel open (minor units)
    pub min_facilitator_bond: Amount,

    /// Underclaim penalty numerator
    pub underclaim_penalty_numerator: Amount,

    /// Underclaim penalty denominator
    pub underclaim_penalty_denominator: Amount,

    /// Chain id bound into typed-data domains
    pub chain_id: u64,

    /// Network name carried in wire challenges
    pub network: String,

    /// Escrow contract address bound into typed-data domains
    pub escrow_address: Address,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            min_deposit: crate::MIN_DEPOSIT,
            dispute_window_secs: crate::DISPUTE_WINDOW_SECS,
            proof_window_secs: crate::PROOF_WINDOW_SECS,
            dispute_fee: crate::DISPUTE_FEE,
            min_facilitator_bond: crate::MIN_FACILITATOR_BOND,
            underclaim_penalty_numerator: crate::UNDERCLAIM_PENALTY_NUMERATOR,
            underclaim_penalty_denominator: crate::UNDERCLAIM_PENALTY_DENOMINATOR,
            chain_id: 84532,
            network: "base-sepolia".to_string(),
            escrow_address: Address::ZERO,
        }
    }
}

impl EscrowConfig {
    /// Build from defaults with environment-variable overrides.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("ESCROW_MIN_DEPOSIT") {
            config.min_deposit = parse_amount("ESCROW_MIN_DEPOSIT", &v)?;
        }
        if let Ok(v) = env::var("ESCROW_DISPUTE_WINDOW_SECS") {
            config.dispute_window_secs = parse_u64("ESCROW_DISPUTE_WINDOW_SECS", &v)?;
        }
        if let Ok(v) = env::var("ESCROW_PROOF_WINDOW_SECS") {
            config.proof_window_secs = parse_u64("ESCROW_PROOF_WINDOW_SECS", &v)?;
        }
        if let Ok(v) = env::var("ESCROW_DISPUTE_FEE") {
            config.dispute_fee = parse_amount("ESCROW_DISPUTE_FEE", &v)?;
        }
        if let Ok(v) = env::var("ESCROW_MIN_FACILITATOR_BOND") {
            config.min_facilitator_bond = parse_amount("ESCROW_MIN_FACILITATOR_BOND", &v)?;
        }
        if let Ok(v) = env::var("ESCROW_CHAIN_ID") {
            config.chain_id = parse_u64("ESCROW_CHAIN_ID", &v)?;
        }
        if let Ok(v) = env::var("ESCROW_NETWORK") {
            config.network = v;
        }
        if let Ok(v) = env::var("ESCROW_ADDRESS") {
            config.escrow_address = Address::from_hex(&v)?;
        }

        Ok(config)
    }
}

fn parse_amount(key: &str, value: &str) -> crate::Result<Amount> {
    value
        .parse::<Amount>()
        .map_err(|e| crate::Error::InvalidAmount(format!("{key}={value}: {e}")))
}

fn parse_u64(key: &str, value: &str) -> crate::Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| crate::Error::InvalidAmount(format!("{key}={value}: {e}")))
}
