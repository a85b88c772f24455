//! Asset transfer interface
//!
//! The escrow holds custody of a single settlement asset as a fungible
//! pool; per-channel and per-bond accounting is virtual. The interface is
//! designed to be swappable:
//! - Tests/development: `MockAsset` (in-memory balances, failure injection)
//! - Production: an adapter over the deployed token's transfer calls
//!
//! Any transfer that reverts or reports false is surfaced as
//! `AssetTransferFailed`; the enclosing operation aborts wholesale.

use crate::error::{Error, Result};
use crate::types::{Address, Amount};
use std::collections::HashMap;
use std::sync::Mutex;

/// Asset trait (interface)
pub trait Asset: Send + Sync {
    /// Pull `amount` from `from` into escrow custody.
    fn pull(&self, from: Address, amount: Amount) -> Result<()>;

    /// Push `amount` from escrow custody to `to`.
    fn push(&self, to: Address, amount: Amount) -> Result<()>;
}

// =========================================================================
// MOCK ASSET (for tests and development)
// =========================================================================

#[derive(Debug, Default)]
struct MockAssetState {
    balances: HashMap<Address, Amount>,
    custody: Amount,
    fail_pulls: bool,
    fail_pushes: bool,
    pushes_before_failure: Option<u32>,
}

/// In-memory asset with custody accounting and failure injection.
#[derive(Debug, Default)]
pub struct MockAsset {
    state: Mutex<MockAssetState>,
}

impl MockAsset {
    /// Empty asset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an external account (test fixture funding).
    pub fn fund(&self, account: Address, amount: Amount) {
        let mut state = self.state.lock().expect("asset state poisoned");
        *state.balances.entry(account).or_insert(0) += amount;
    }

    /// External balance of an account.
    pub fn balance_of(&self, account: &Address) -> Amount {
        let state = self.state.lock().expect("asset state poisoned");
        state.balances.get(account).copied().unwrap_or(0)
    }

    /// Total assets held in escrow custody.
    pub fn custody(&self) -> Amount {
        let state = self.state.lock().expect("asset state poisoned");
        state.custody
    }

    /// Make subsequent pulls fail (false-returning token semantics).
    pub fn set_fail_pulls(&self, fail: bool) {
        self.state.lock().expect("asset state poisoned").fail_pulls = fail;
    }

    /// Make subsequent pushes fail.
    pub fn set_fail_pushes(&self, fail: bool) {
        self.state.lock().expect("asset state poisoned").fail_pushes = fail;
    }

    /// Let the next `successes` pushes succeed, then fail one push
    /// (a transient transfer failure); later pushes succeed again.
    pub fn fail_push_after(&self, successes: u32) {
        self.state
            .lock()
            .expect("asset state poisoned")
            .pushes_before_failure = Some(successes);
    }
}

impl Asset for MockAsset {
    fn pull(&self, from: Address, amount: Amount) -> Result<()> {
        let mut state = self.state.lock().expect("asset state poisoned");
        if state.fail_pulls {
            return Err(Error::AssetTransferFailed(format!(
                "pull of {amount} from {from} returned false"
            )));
        }
        let balance = state.balances.get(&from).copied().unwrap_or(0);
        let remaining = balance.checked_sub(amount).ok_or_else(|| {
            Error::AssetTransferFailed(format!(
                "pull of {amount} from {from} exceeds balance {balance}"
            ))
        })?;
        state.balances.insert(from, remaining);
        state.custody = state
            .custody
            .checked_add(amount)
            .ok_or_else(|| Error::AssetTransferFailed("custody overflow".to_string()))?;
        Ok(())
    }

    fn push(&self, to: Address, amount: Amount) -> Result<()> {
        let mut state = self.state.lock().expect("asset state poisoned");
        if state.fail_pushes {
            return Err(Error::AssetTransferFailed(format!(
                "push of {amount} to {to} returned false"
            )));
        }
        if let Some(remaining) = state.pushes_before_failure {
            if remaining == 0 {
                state.pushes_before_failure = None;
                return Err(Error::AssetTransferFailed(format!(
                    "push of {amount} to {to} returned false"
                )));
            }
            state.pushes_before_failure = Some(remaining - 1);
        }
        state.custody = state.custody.checked_sub(amount).ok_or_else(|| {
            Error::AssetTransferFailed(format!("push of {amount} exceeds custody"))
        })?;
        let balance = state.balances.entry(to).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| Error::AssetTransferFailed("balance overflow".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address::from_bytes([tag; 20])
    }

    #[test]
    fn test_pull_push_moves_through_custody() {
        let asset = MockAsset::new();
        asset.fund(addr(1), 1_000);

        asset.pull(addr(1), 400).unwrap();
        assert_eq!(asset.balance_of(&addr(1)), 600);
        assert_eq!(asset.custody(), 400);

        asset.push(addr(2), 150).unwrap();
        assert_eq!(asset.balance_of(&addr(2)), 150);
        assert_eq!(asset.custody(), 250);
    }

    #[test]
    fn test_pull_beyond_balance_fails() {
        let asset = MockAsset::new();
        asset.fund(addr(1), 100);
        assert!(matches!(
            asset.pull(addr(1), 101),
            Err(Error::AssetTransferFailed(_))
        ));
        // Nothing moved
        assert_eq!(asset.balance_of(&addr(1)), 100);
        assert_eq!(asset.custody(), 0);
    }

    #[test]
    fn test_push_beyond_custody_fails() {
        let asset = MockAsset::new();
        assert!(asset.push(addr(2), 1).is_err());
    }

    #[test]
    fn test_failure_injection() {
        let asset = MockAsset::new();
        asset.fund(addr(1), 100);

        asset.set_fail_pulls(true);
        assert!(asset.pull(addr(1), 1).is_err());
        asset.set_fail_pulls(false);
        asset.pull(addr(1), 1).unwrap();

        asset.set_fail_pushes(true);
        assert!(asset.push(addr(1), 1).is_err());
    }

    #[test]
    fn test_transient_push_failure() {
        let asset = MockAsset::new();
        asset.fund(addr(1), 100);
        asset.pull(addr(1), 100).unwrap();

        // One success, then one transient failure, then healthy again
        asset.fail_push_after(1);
        asset.push(addr(2), 10).unwrap();
        assert!(asset.push(addr(2), 10).is_err());
        asset.push(addr(2), 10).unwrap();
        assert_eq!(asset.balance_of(&addr(2)), 20);
        assert_eq!(asset.custody(), 80);
    }
}
