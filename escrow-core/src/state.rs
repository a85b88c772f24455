//! Channel state machine
//!
//! Enforces the channel lifecycle:
//! Inactive → Active → Closing → {Settled, Disputed → Settled}, with
//! reopening permitted from Settled.

use serde::{Deserialize, Serialize};

/// Channel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelStatus {
    /// No channel exists for this payer
    Inactive = 0,
    /// Funds locked, receipts accruing off-chain
    Active = 1,
    /// A close was proposed; dispute window running
    Closing = 2,
    /// The close was contested; proof window running
    Disputed = 3,
    /// Funds disbursed; reopenable
    Settled = 4,
}

impl ChannelStatus {
    /// Check if a transition is valid
    pub fn can_transition_to(&self, next: ChannelStatus) -> bool {
        use ChannelStatus::*;

        matches!(
            (self, next),
            // Opening (deposit)
            | (Inactive, Active)
            | (Settled, Active)

            // Close proposals
            | (Active, Closing)

            // Resolution
            | (Closing, Settled)   // confirm, or window expiry
            | (Closing, Disputed)  // either side contests
            | (Disputed, Settled)  // finalization
        )
    }

    /// Whether a fresh channel may be opened from this status
    pub fn can_open(&self) -> bool {
        matches!(self, ChannelStatus::Inactive | ChannelStatus::Settled)
    }

    /// Terminal for the current generation (funds fully disbursed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelStatus::Settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(ChannelStatus::Inactive.can_transition_to(ChannelStatus::Active));
        assert!(ChannelStatus::Active.can_transition_to(ChannelStatus::Closing));
        assert!(ChannelStatus::Closing.can_transition_to(ChannelStatus::Settled));
    }

    #[test]
    fn test_dispute_path_transitions() {
        assert!(ChannelStatus::Closing.can_transition_to(ChannelStatus::Disputed));
        assert!(ChannelStatus::Disputed.can_transition_to(ChannelStatus::Settled));
    }

    #[test]
    fn test_reopen_after_settlement() {
        assert!(ChannelStatus::Settled.can_transition_to(ChannelStatus::Active));
        assert!(ChannelStatus::Settled.can_open());
        assert!(ChannelStatus::Inactive.can_open());
        assert!(!ChannelStatus::Closing.can_open());
        assert!(!ChannelStatus::Disputed.can_open());
    }

    #[test]
    fn test_invalid_transitions() {
        // Can't jump straight to settlement or dispute
        assert!(!ChannelStatus::Active.can_transition_to(ChannelStatus::Settled));
        assert!(!ChannelStatus::Active.can_transition_to(ChannelStatus::Disputed));
        // Disputes can't be re-disputed or walked back
        assert!(!ChannelStatus::Disputed.can_transition_to(ChannelStatus::Closing));
        assert!(!ChannelStatus::Disputed.can_transition_to(ChannelStatus::Active));
        // Inactive only opens
        assert!(!ChannelStatus::Inactive.can_transition_to(ChannelStatus::Closing));
    }

    #[test]
    fn test_settled_is_terminal_for_generation() {
        assert!(ChannelStatus::Settled.is_terminal());
        assert!(!ChannelStatus::Closing.is_terminal());
    }
}
