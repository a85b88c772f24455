//! Channel escrow adjudicator
//!
//! Single entry point for all channel and bond operations. Each operation
//! validates its preconditions against a consistent snapshot of channel,
//! bond, and proven-call state, then commits atomically; failures surface
//! as typed errors with no state mutation. Asset transfers happen at
//! well-defined commit points and abort the enclosing operation wholesale
//! when they fail.

use crate::asset::Asset;
use crate::bond::BondLedger;
use crate::clock::Clock;
use crate::config::EscrowConfig;
use crate::crypto::verify_signer;
use crate::error::{Error, Result};
use crate::merkle;
use crate::state::ChannelStatus;
use crate::typed_data::CallAuthorization;
use crate::types::{
    Address, Amount, Channel, ChannelStore, EscrowEvent, Hash32, PendingDisbursement, SignedCall,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Channel escrow adjudicator
pub struct Escrow {
    config: EscrowConfig,
    asset: Arc<dyn Asset>,
    clock: Arc<dyn Clock>,
    channels: ChannelStore,
    bonds: BondLedger,
    events: Vec<EscrowEvent>,
    fees_retained: Amount,
}

impl Escrow {
    /// Create an adjudicator over an asset and a trusted clock.
    pub fn new(config: EscrowConfig, asset: Arc<dyn Asset>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            asset,
            clock,
            channels: ChannelStore::new(),
            bonds: BondLedger::new(),
            events: Vec::new(),
            fees_retained: 0,
        }
    }

    // =====================================================================
    // BOND OPERATIONS
    // =====================================================================

    /// Deposit facilitator collateral.
    pub fn deposit_bond(&mut self, facilitator: Address, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(Error::InvalidAmount("bond deposit must be positive".into()));
        }
        self.asset.pull(facilitator, amount)?;
        let bond = self.bonds.credit(facilitator, amount)?;
        self.emit(EscrowEvent::BondDeposited {
            facilitator,
            amount,
            bond,
        });
        Ok(())
    }

    /// Withdraw facilitator collateral. Withdrawal is allowed
    /// unconditionally; qualification is only checked at channel open.
    pub fn withdraw_bond(&mut self, facilitator: Address, amount: Amount) -> Result<()> {
        let available = self.bonds.bond_of(&facilitator);
        if amount > available {
            return Err(Error::InsufficientBond {
                required: amount,
                available,
            });
        }
        self.asset.push(facilitator, amount)?;
        let bond = self.bonds.debit(facilitator, amount)?;
        self.emit(EscrowEvent::BondWithdrawn {
            facilitator,
            amount,
            bond,
        });
        Ok(())
    }

    /// Bonded amount for a facilitator.
    pub fn bond_of(&self, facilitator: &Address) -> Amount {
        self.bonds.bond_of(facilitator)
    }

    // =====================================================================
    // CHANNEL LIFECYCLE (O1, O2)
    // =====================================================================

    /// O1. Open (or reopen) a channel by locking a deposit.
    pub fn deposit(
        &mut self,
        payer: Address,
        facilitator: Address,
        receiver: Address,
        amount: Amount,
    ) -> Result<()> {
        if amount < self.config.min_deposit {
            return Err(Error::InsufficientDeposit {
                minimum: self.config.min_deposit,
                actual: amount,
            });
        }
        if !self
            .bonds
            .is_qualified(&facilitator, self.config.min_facilitator_bond)
        {
            return Err(Error::InsufficientFacilitatorBond {
                minimum: self.config.min_facilitator_bond,
                actual: self.bonds.bond_of(&facilitator),
            });
        }
        let status = self.channels.status_of(&payer);
        if !status.can_open() {
            return Err(Error::ChannelNotInactive { status });
        }

        self.asset.pull(payer, amount)?;

        let generation = self.channels.next_generation(&payer);
        self.channels
            .insert(Channel::open(payer, facilitator, receiver, amount, generation));
        self.emit(EscrowEvent::ChannelOpened {
            payer,
            facilitator,
            receiver,
            amount,
            generation,
        });
        Ok(())
    }

    /// O2. Lock additional funds into an active channel.
    pub fn top_up(&mut self, payer: Address, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(Error::InvalidAmount("top-up must be positive".into()));
        }
        let channel = self.active_channel(&payer)?;
        let balance = channel
            .balance
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidAmount("balance overflow".into()))?;

        self.asset.pull(payer, amount)?;

        if let Some(channel) = self.channels.get_mut(&payer) {
            channel.balance = balance;
        }
        self.emit(EscrowEvent::ChannelToppedUp {
            payer,
            amount,
            balance,
        });
        Ok(())
    }

    // =====================================================================
    // CLOSE PROPOSALS (O3, O4)
    // =====================================================================

    /// O3. Payer proposes a close, acknowledging a total and committing a
    /// checkpoint root. The acknowledged amount becomes the mutual floor.
    pub fn initiate_close(
        &mut self,
        payer: Address,
        acknowledged_amount: Amount,
        checkpoint_root: Hash32,
    ) -> Result<()> {
        let channel = self.active_channel(&payer)?;
        if acknowledged_amount > channel.balance {
            return Err(Error::InsufficientBalance {
                required: acknowledged_amount,
                available: channel.balance,
            });
        }
        let dispute_deadline = self.clock.now() + self.config.dispute_window_secs;

        let channel = self.active_channel_mut(&payer)?;
        channel.claimed_amount = acknowledged_amount;
        channel.checkpoint_root = checkpoint_root;
        channel.checkpoint_amount = acknowledged_amount;
        channel.root_source = crate::types::RootSource::Payer;
        channel.dispute_deadline = dispute_deadline;
        channel.set_status(ChannelStatus::Closing)?;

        self.emit(EscrowEvent::CloseInitiated {
            payer,
            initiator: payer,
            claimed_amount: acknowledged_amount,
            dispute_deadline,
        });
        Ok(())
    }

    /// O4. Facilitator proposes a close with its own accounting. The root
    /// is facilitator-asserted, so the mutual floor is left untouched and
    /// dispute proofs against it require per-call payer signatures.
    pub fn claim_settlement(
        &mut self,
        caller: Address,
        payer: Address,
        amount: Amount,
        merkle_root: Hash32,
    ) -> Result<()> {
        let channel = self.active_channel(&payer)?;
        if caller != channel.facilitator {
            return Err(Error::Unauthorized(format!(
                "caller {caller} is not the channel facilitator"
            )));
        }
        if amount > channel.balance {
            return Err(Error::InsufficientBalance {
                required: amount,
                available: channel.balance,
            });
        }
        let dispute_deadline = self.clock.now() + self.config.dispute_window_secs;

        let channel = self.active_channel_mut(&payer)?;
        channel.claimed_amount = amount;
        channel.checkpoint_root = merkle_root;
        channel.root_source = crate::types::RootSource::Facilitator;
        channel.dispute_deadline = dispute_deadline;
        channel.set_status(ChannelStatus::Closing)?;

        self.emit(EscrowEvent::CloseInitiated {
            payer,
            initiator: caller,
            claimed_amount: amount,
            dispute_deadline,
        });
        Ok(())
    }

    // =====================================================================
    // CONFIRMATION (O5 and window expiry)
    // =====================================================================

    /// O5. Facilitator confirms the standing close proposal, settling
    /// immediately at the claimed amount without waiting out the window.
    pub fn facilitator_confirm(&mut self, caller: Address, payer: Address) -> Result<Amount> {
        let channel = self.closing_channel(&payer)?;
        if caller != channel.facilitator {
            return Err(Error::Unauthorized(format!(
                "caller {caller} is not the channel facilitator"
            )));
        }
        let settlement = channel.claimed_amount;
        self.settle(payer, settlement)?;
        Ok(settlement)
    }

    /// Settle an uncontested close after the dispute window expires.
    /// Callable by anyone; the payer may not bypass the window, which would
    /// extinguish the facilitator's right to contest.
    pub fn confirm_close(&mut self, payer: Address) -> Result<Amount> {
        let channel = self.closing_channel(&payer)?;
        let now = self.clock.now();
        if now <= channel.dispute_deadline {
            return Err(Error::DisputeWindowNotExpired {
                deadline: channel.dispute_deadline,
                now,
            });
        }
        let settlement = channel.claimed_amount;
        self.settle(payer, settlement)?;
        Ok(settlement)
    }

    // =====================================================================
    // DISPUTES (O6, O7)
    // =====================================================================

    /// O6. Payer contests a close, withholding the dispute fee and
    /// counter-claiming their own maximum admission. The proven total is
    /// baselined at the mutual checkpoint.
    pub fn dispute(&mut self, payer: Address, counter_amount: Amount) -> Result<()> {
        let channel = self.closing_channel(&payer)?;
        // A channel mid-disbursement can only complete its settlement
        if channel.pending_disbursement.is_some() {
            return Err(Error::InvalidStateTransition {
                from: channel.status,
                to: ChannelStatus::Disputed,
            });
        }
        let now = self.clock.now();
        if now > channel.dispute_deadline {
            return Err(Error::DisputeWindowExpired {
                deadline: channel.dispute_deadline,
                now,
            });
        }
        if channel.balance < self.config.dispute_fee {
            return Err(Error::InsufficientBalance {
                required: self.config.dispute_fee,
                available: channel.balance,
            });
        }
        let fee = self.config.dispute_fee;
        let proof_deadline = now + self.config.proof_window_secs;

        let channel = self.closing_channel_mut(&payer)?;
        channel.balance -= fee;
        channel.dispute_fee_withheld = fee;
        channel.disputed_amount = counter_amount;
        // Baseline at the mutual checkpoint, never above the locked balance
        channel.proven_amount = channel.checkpoint_amount.min(channel.balance);
        channel.proof_deadline = proof_deadline;
        channel.set_status(ChannelStatus::Disputed)?;
        let disputed_amount = channel.disputed_amount;

        self.emit(EscrowEvent::DisputeRaised {
            payer,
            disputant: payer,
            disputed_amount,
            proof_deadline,
        });
        Ok(())
    }

    /// O7. Facilitator contests a payer close, asserting an underclaim and
    /// swapping in its own root. Prior per-call credit is void against the
    /// new root; the mutual checkpoint survives as a floor applied at
    /// finalization.
    pub fn facilitator_dispute(
        &mut self,
        caller: Address,
        payer: Address,
        counter_amount: Amount,
        merkle_root: Hash32,
    ) -> Result<()> {
        let channel = self.closing_channel(&payer)?;
        if caller != channel.facilitator {
            return Err(Error::Unauthorized(format!(
                "caller {caller} is not the channel facilitator"
            )));
        }
        // A channel mid-disbursement can only complete its settlement
        if channel.pending_disbursement.is_some() {
            return Err(Error::InvalidStateTransition {
                from: channel.status,
                to: ChannelStatus::Disputed,
            });
        }
        let now = self.clock.now();
        if now > channel.dispute_deadline {
            return Err(Error::DisputeWindowExpired {
                deadline: channel.dispute_deadline,
                now,
            });
        }
        if counter_amount <= channel.claimed_amount {
            return Err(Error::InvalidAmount(format!(
                "counter-claim {counter_amount} does not exceed claimed {}",
                channel.claimed_amount
            )));
        }
        let proof_deadline = now + self.config.proof_window_secs;

        let channel = self.closing_channel_mut(&payer)?;
        channel.disputed_amount = counter_amount;
        channel.checkpoint_root = merkle_root;
        channel.root_source = crate::types::RootSource::Facilitator;
        channel.proven_amount = 0;
        channel.proof_deadline = proof_deadline;
        channel.set_status(ChannelStatus::Disputed)?;

        self.emit(EscrowEvent::DisputeRaised {
            payer,
            disputant: caller,
            disputed_amount: counter_amount,
            proof_deadline,
        });
        Ok(())
    }

    // =====================================================================
    // PROOF SUBMISSION (O8)
    // =====================================================================

    /// O8. Facilitator submits a batch of Merkle-proven calls. Call ids
    /// already credited this generation are skipped silently; any invalid
    /// proof or signature rejects the entire batch. Returns the amount the
    /// batch added to the proven total.
    pub fn submit_proofs(
        &mut self,
        caller: Address,
        payer: Address,
        calls: &[SignedCall],
        proofs: &[Vec<Hash32>],
    ) -> Result<Amount> {
        let channel = self.disputed_channel(&payer)?;
        if caller != channel.facilitator {
            return Err(Error::Unauthorized(format!(
                "caller {caller} is not the channel facilitator"
            )));
        }
        let now = self.clock.now();
        if now > channel.proof_deadline {
            return Err(Error::ProofWindowExpired {
                deadline: channel.proof_deadline,
                now,
            });
        }
        if calls.len() != proofs.len() {
            return Err(Error::InvalidProof(format!(
                "{} calls with {} proofs",
                calls.len(),
                proofs.len()
            )));
        }

        // The stronger adjudication tier applies whenever the root in force
        // was asserted by the facilitator rather than committed by the payer.
        let signature_required = channel.root_source == crate::types::RootSource::Facilitator;

        // Verify the whole batch before crediting anything.
        let mut credited: HashSet<Hash32> = HashSet::new();
        let mut batch: Amount = 0;
        for (call, path) in calls.iter().zip(proofs.iter()) {
            if channel.is_proven(&call.call_id) || !credited.insert(call.call_id) {
                continue;
            }
            if !merkle::verify(&call.leaf(), path, &channel.checkpoint_root) {
                return Err(Error::InvalidProof(format!(
                    "call {} does not fold to the checkpoint root",
                    hex::encode(call.call_id)
                )));
            }
            match &call.signature {
                Some(signature) => {
                    let digest = CallAuthorization {
                        call_id: call.call_id,
                        cost: call.cost,
                        timestamp: call.timestamp,
                        escrow: self.config.escrow_address,
                    }
                    .signing_digest(self.config.chain_id, &self.config.escrow_address);
                    verify_signer(&digest, signature, &channel.payer)?;
                }
                None if signature_required => {
                    return Err(Error::InvalidSignature(format!(
                        "call {} lacks the payer authorization required for a \
                         facilitator-asserted root",
                        hex::encode(call.call_id)
                    )));
                }
                None => {}
            }
            batch = batch
                .checked_add(call.cost)
                .ok_or_else(|| Error::InvalidAmount("proven amount overflow".into()))?;
        }

        let calls_credited = credited.len() as u64;
        let channel = self.disputed_channel_mut(&payer)?;
        for call_id in credited {
            channel.mark_proven(call_id);
        }
        // The proven total never exceeds the locked balance
        let raised = channel
            .proven_amount
            .checked_add(batch)
            .ok_or_else(|| Error::InvalidAmount("proven amount overflow".into()))?;
        channel.proven_amount = raised.min(channel.balance);
        let proven_amount = channel.proven_amount;

        self.emit(EscrowEvent::ProofSubmitted {
            payer,
            calls_credited,
            batch_amount: batch,
            proven_amount,
        });
        Ok(batch)
    }

    // =====================================================================
    // FINALIZATION (O9)
    // =====================================================================

    /// O9. Resolve a dispute after the proof window. Callable by anyone.
    /// Returns the settlement disbursed to the receiver.
    ///
    /// Resolution commits the outcome (bond slash, fee disposition, the
    /// disbursement plan) before any transfer is issued; the transfers then
    /// drain the plan. A failed transfer leaves the committed plan in place,
    /// so a retry completes the remaining legs without slashing or paying
    /// anything twice.
    pub fn finalize_dispute(&mut self, payer: Address) -> Result<Amount> {
        let channel = self.disputed_channel(&payer)?;
        let now = self.clock.now();
        if now <= channel.proof_deadline {
            return Err(Error::ProofWindowNotExpired {
                deadline: channel.proof_deadline,
                now,
            });
        }

        // Resume a disbursement interrupted by a failed transfer
        if let Some(plan) = channel.pending_disbursement {
            self.drain_disbursement(payer)?;
            return Ok(plan.settlement);
        }

        let claimed = channel.claimed_amount;
        let disputed = channel.disputed_amount;
        let proven = channel.proven_amount;
        let checkpoint = channel.checkpoint_amount;
        let balance = channel.balance;
        let facilitator = channel.facilitator;
        let fee_withheld = channel.dispute_fee_withheld;

        if disputed > claimed {
            // Facilitator-disputed: the facilitator asserted an underclaim.
            // The mutual checkpoint floors what the payer already admitted.
            let effective_proven = proven.max(checkpoint);
            let mut settlement = effective_proven.min(disputed).min(balance);

            let mut penalty_applied = None;
            if settlement > claimed {
                let underclaim = settlement - claimed;
                let penalty = underclaim
                    .checked_mul(self.config.underclaim_penalty_numerator)
                    .ok_or_else(|| Error::InvalidAmount("penalty overflow".into()))?
                    / self.config.underclaim_penalty_denominator;
                let with_penalty = settlement
                    .checked_add(penalty)
                    .ok_or_else(|| Error::InvalidAmount("settlement overflow".into()))?;
                if balance >= with_penalty {
                    settlement = with_penalty;
                    penalty_applied = Some(penalty);
                }
            }
            let refund = balance
                .checked_sub(settlement)
                .ok_or(Error::InsufficientBalance {
                    required: settlement,
                    available: balance,
                })?;

            // Resolution commit: no transfers have been issued yet
            if let Some(penalty) = penalty_applied {
                self.emit(EscrowEvent::PayerPenalized {
                    payer,
                    penalty,
                    settlement,
                });
            }
            // A fee withheld by an earlier payer dispute stays with the pool
            if fee_withheld > 0 {
                self.fees_retained = self
                    .fees_retained
                    .checked_add(fee_withheld)
                    .ok_or_else(|| Error::InvalidAmount("fee accumulator overflow".into()))?;
            }
            let channel = self.disputed_channel_mut(&payer)?;
            channel.dispute_fee_withheld = 0;
            channel.balance = 0;
            channel.pending_disbursement = Some(PendingDisbursement {
                settlement,
                refund,
                slash: 0,
                receiver_paid: false,
            });

            self.drain_disbursement(payer)?;
            Ok(settlement)
        } else {
            // Payer-disputed: the payer contested a facilitator overclaim.
            let settlement = proven.min(disputed);

            // Overclaim confirmed: slash the facilitator's bond in the
            // payer's favor, capped at the bonded amount.
            let slash = if proven < claimed {
                (claimed - proven).min(self.bonds.bond_of(&facilitator))
            } else {
                0
            };
            // The payer was at least partially right: restore the fee
            let fee_restored = if settlement <= disputed { fee_withheld } else { 0 };
            let balance_with_fee = balance
                .checked_add(fee_restored)
                .ok_or_else(|| Error::InvalidAmount("balance overflow".into()))?;
            let refund = balance_with_fee
                .checked_sub(settlement)
                .ok_or(Error::InsufficientBalance {
                    required: settlement,
                    available: balance_with_fee,
                })?;

            // Resolution commit: no transfers have been issued yet
            if slash > 0 {
                let (slashed, bond) = self.bonds.slash(facilitator, slash);
                self.emit(EscrowEvent::BondSlashed {
                    facilitator,
                    payer,
                    amount: slashed,
                    bond,
                });
            }
            if fee_restored == 0 && fee_withheld > 0 {
                self.fees_retained = self
                    .fees_retained
                    .checked_add(fee_withheld)
                    .ok_or_else(|| Error::InvalidAmount("fee accumulator overflow".into()))?;
            }
            let channel = self.disputed_channel_mut(&payer)?;
            channel.dispute_fee_withheld = 0;
            channel.balance = 0;
            channel.pending_disbursement = Some(PendingDisbursement {
                settlement,
                refund,
                slash,
                receiver_paid: false,
            });

            self.drain_disbursement(payer)?;
            Ok(settlement)
        }
    }

    // =====================================================================
    // INTERNAL SETTLEMENT (O10)
    // =====================================================================

    /// Disburse `settlement` to the receiver and the remainder to the payer,
    /// then mark the channel Settled.
    ///
    /// Two phases: resolve (compute the shares, zero the balance, record the
    /// disbursement plan) and drain (issue the transfers). The plan is
    /// committed before the first transfer, so a transfer failure leaves a
    /// record of exactly what is still owed and a retry never repeats a
    /// completed leg.
    fn settle(&mut self, payer: Address, settlement: Amount) -> Result<()> {
        let channel = match self.channels.get(&payer) {
            Some(channel) => channel,
            None => {
                return Err(Error::ChannelNotClosing {
                    status: ChannelStatus::Inactive,
                })
            }
        };
        // Resume a disbursement interrupted by a failed transfer
        if channel.pending_disbursement.is_some() {
            return self.drain_disbursement(payer);
        }
        let refund = channel
            .balance
            .checked_sub(settlement)
            .ok_or(Error::InsufficientBalance {
                required: settlement,
                available: channel.balance,
            })?;

        if let Some(channel) = self.channels.get_mut(&payer) {
            channel.balance = 0;
            channel.pending_disbursement = Some(PendingDisbursement {
                settlement,
                refund,
                slash: 0,
                receiver_paid: false,
            });
        }
        self.drain_disbursement(payer)
    }

    /// Issue the transfers recorded in the channel's disbursement plan,
    /// marking each leg as it completes. The receiver leg is marked paid the
    /// moment its transfer lands; the payer leg (refund plus any slash)
    /// clears the plan and settles the channel.
    fn drain_disbursement(&mut self, payer: Address) -> Result<()> {
        let (receiver, plan) = match self.channels.get(&payer) {
            Some(channel) => match channel.pending_disbursement {
                Some(plan) => (channel.receiver, plan),
                // Nothing in flight
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        if !plan.receiver_paid {
            if plan.settlement > 0 {
                self.asset.push(receiver, plan.settlement)?;
            }
            if let Some(channel) = self.channels.get_mut(&payer) {
                if let Some(plan) = channel.pending_disbursement.as_mut() {
                    plan.receiver_paid = true;
                }
            }
        }

        let to_payer = plan
            .refund
            .checked_add(plan.slash)
            .ok_or_else(|| Error::InvalidAmount("refund overflow".into()))?;
        if to_payer > 0 {
            self.asset.push(payer, to_payer)?;
        }

        if let Some(channel) = self.channels.get_mut(&payer) {
            channel.pending_disbursement = None;
            channel.set_status(ChannelStatus::Settled)?;
        }
        self.emit(EscrowEvent::ChannelSettled {
            payer,
            receiver,
            settlement: plan.settlement,
            refund: plan.refund,
        });
        Ok(())
    }

    // =====================================================================
    // ACCESSORS
    // =====================================================================

    /// Channel record for a payer.
    pub fn channel(&self, payer: &Address) -> Option<&Channel> {
        self.channels.get(payer)
    }

    /// Channel status for a payer; Inactive when no record exists.
    pub fn status_of(&self, payer: &Address) -> ChannelStatus {
        self.channels.status_of(payer)
    }

    /// Configuration in force.
    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    /// Events emitted so far.
    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    /// Drain emitted events for an observer.
    pub fn drain_events(&mut self) -> Vec<EscrowEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sum of all channel balances, withheld fees, and in-flight
    /// disbursement legs (conservation checks).
    pub fn total_channel_liability(&self) -> Amount {
        self.channels
            .iter()
            .map(|c| {
                let in_flight = match c.pending_disbursement {
                    Some(p) => {
                        let receiver_leg = if p.receiver_paid { 0 } else { p.settlement };
                        receiver_leg + p.refund + p.slash
                    }
                    None => 0,
                };
                c.balance + c.dispute_fee_withheld + in_flight
            })
            .sum()
    }

    /// Sum of all bonds (conservation checks).
    pub fn total_bonds(&self) -> Amount {
        self.bonds.total()
    }

    /// Fees withheld from disputes that finalized against the payer.
    pub fn fees_retained(&self) -> Amount {
        self.fees_retained
    }

    fn emit(&mut self, event: EscrowEvent) {
        info!(event = ?event, "escrow event");
        self.events.push(event);
    }

    fn active_channel(&self, payer: &Address) -> Result<&Channel> {
        match self.channels.get(payer) {
            Some(channel) if channel.status == ChannelStatus::Active => Ok(channel),
            other => Err(Error::ChannelNotActive {
                status: other.map(|c| c.status).unwrap_or(ChannelStatus::Inactive),
            }),
        }
    }

    fn active_channel_mut(&mut self, payer: &Address) -> Result<&mut Channel> {
        let status = self.channels.status_of(payer);
        match self.channels.get_mut(payer) {
            Some(channel) if status == ChannelStatus::Active => Ok(channel),
            _ => Err(Error::ChannelNotActive { status }),
        }
    }

    fn closing_channel(&self, payer: &Address) -> Result<&Channel> {
        match self.channels.get(payer) {
            Some(channel) if channel.status == ChannelStatus::Closing => Ok(channel),
            other => Err(Error::ChannelNotClosing {
                status: other.map(|c| c.status).unwrap_or(ChannelStatus::Inactive),
            }),
        }
    }

    fn closing_channel_mut(&mut self, payer: &Address) -> Result<&mut Channel> {
        let status = self.channels.status_of(payer);
        match self.channels.get_mut(payer) {
            Some(channel) if status == ChannelStatus::Closing => Ok(channel),
            _ => Err(Error::ChannelNotClosing { status }),
        }
    }

    fn disputed_channel(&self, payer: &Address) -> Result<&Channel> {
        match self.channels.get(payer) {
            Some(channel) if channel.status == ChannelStatus::Disputed => Ok(channel),
            other => Err(Error::ChannelNotDisputed {
                status: other.map(|c| c.status).unwrap_or(ChannelStatus::Inactive),
            }),
        }
    }

    fn disputed_channel_mut(&mut self, payer: &Address) -> Result<&mut Channel> {
        let status = self.channels.status_of(payer);
        match self.channels.get_mut(payer) {
            Some(channel) if status == ChannelStatus::Disputed => Ok(channel),
            _ => Err(Error::ChannelNotDisputed { status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MockAsset;
    use crate::clock::ManualClock;

    const T0: u64 = 1_700_000_000;

    fn addr(tag: u8) -> Address {
        Address::from_bytes([tag; 20])
    }

    struct Fixture {
        escrow: Escrow,
        asset: Arc<MockAsset>,
        clock: Arc<ManualClock>,
        payer: Address,
        facilitator: Address,
        receiver: Address,
    }

    fn fixture() -> Fixture {
        let asset = Arc::new(MockAsset::new());
        let clock = Arc::new(ManualClock::new(T0));
        let escrow = Escrow::new(
            EscrowConfig::default(),
            asset.clone() as Arc<dyn Asset>,
            clock.clone() as Arc<dyn Clock>,
        );
        let fx = Fixture {
            escrow,
            asset,
            clock,
            payer: addr(0x0a),
            facilitator: addr(0x0f),
            receiver: addr(0x0e),
        };
        fx.asset.fund(fx.payer, 1_000_000_000);
        fx.asset.fund(fx.facilitator, 1_000_000_000);
        fx
    }

    fn bonded_fixture() -> Fixture {
        let mut fx = fixture();
        fx.escrow
            .deposit_bond(fx.facilitator, crate::MIN_FACILITATOR_BOND)
            .unwrap();
        fx
    }

    #[test]
    fn test_deposit_requires_minimum() {
        let mut fx = bonded_fixture();
        let err = fx
            .escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 9_999_999)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientDeposit { .. }));
    }

    #[test]
    fn test_deposit_requires_qualified_facilitator() {
        let mut fx = fixture();
        fx.escrow.deposit_bond(fx.facilitator, 99_999_999).unwrap();
        let err = fx
            .escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFacilitatorBond { .. }));
    }

    #[test]
    fn test_deposit_opens_active_channel() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();

        let channel = fx.escrow.channel(&fx.payer).unwrap();
        assert_eq!(channel.status, ChannelStatus::Active);
        assert_eq!(channel.balance, 10_000_000);
        assert_eq!(channel.generation, 1);
        assert_eq!(fx.asset.custody(), crate::MIN_FACILITATOR_BOND + 10_000_000);

        // A second deposit while Active is rejected
        let err = fx
            .escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap_err();
        assert!(matches!(err, Error::ChannelNotInactive { .. }));
    }

    #[test]
    fn test_deposit_rolls_back_on_transfer_failure() {
        let mut fx = bonded_fixture();
        fx.asset.set_fail_pulls(true);
        let err = fx
            .escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap_err();
        assert!(matches!(err, Error::AssetTransferFailed(_)));
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Inactive);
    }

    #[test]
    fn test_top_up_increases_balance() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.top_up(fx.payer, 2_000_000).unwrap();
        assert_eq!(fx.escrow.channel(&fx.payer).unwrap().balance, 12_000_000);

        assert!(matches!(
            fx.escrow.top_up(fx.payer, 0),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_initiate_close_checkpoints_acknowledgement() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.initiate_close(fx.payer, 50_000, [3; 32]).unwrap();

        let channel = fx.escrow.channel(&fx.payer).unwrap();
        assert_eq!(channel.status, ChannelStatus::Closing);
        assert_eq!(channel.claimed_amount, 50_000);
        assert_eq!(channel.checkpoint_amount, 50_000);
        assert_eq!(channel.checkpoint_root, [3; 32]);
        assert_eq!(
            channel.dispute_deadline,
            T0 + crate::DISPUTE_WINDOW_SECS
        );
    }

    #[test]
    fn test_initiate_close_rejects_overacknowledgement() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        assert!(matches!(
            fx.escrow.initiate_close(fx.payer, 10_000_001, [0; 32]),
            Err(Error::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_claim_settlement_leaves_checkpoint_floor() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow
            .claim_settlement(fx.facilitator, fx.payer, 1_500_000, [9; 32])
            .unwrap();

        let channel = fx.escrow.channel(&fx.payer).unwrap();
        assert_eq!(channel.claimed_amount, 1_500_000);
        assert_eq!(channel.checkpoint_amount, 0);
        assert_eq!(channel.root_source, crate::types::RootSource::Facilitator);
    }

    #[test]
    fn test_claim_settlement_rejects_strangers() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        assert!(matches!(
            fx.escrow
                .claim_settlement(addr(0x99), fx.payer, 1, [0; 32]),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_confirm_close_respects_window() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.initiate_close(fx.payer, 50_000, [0; 32]).unwrap();

        assert!(matches!(
            fx.escrow.confirm_close(fx.payer),
            Err(Error::DisputeWindowNotExpired { .. })
        ));

        fx.clock.advance(crate::DISPUTE_WINDOW_SECS + 1);
        let settlement = fx.escrow.confirm_close(fx.payer).unwrap();
        assert_eq!(settlement, 50_000);
        assert_eq!(fx.asset.balance_of(&fx.receiver), 50_000);
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Settled);
    }

    #[test]
    fn test_facilitator_confirm_settles_immediately() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.initiate_close(fx.payer, 50_000, [0; 32]).unwrap();
        fx.escrow
            .facilitator_confirm(fx.facilitator, fx.payer)
            .unwrap();
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Settled);
        assert_eq!(fx.asset.balance_of(&fx.receiver), 50_000);
    }

    #[test]
    fn test_dispute_withholds_fee_and_baselines_proven() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow
            .claim_settlement(fx.facilitator, fx.payer, 1_500_000, [9; 32])
            .unwrap();
        fx.escrow.dispute(fx.payer, 1_000_000).unwrap();

        let channel = fx.escrow.channel(&fx.payer).unwrap();
        assert_eq!(channel.status, ChannelStatus::Disputed);
        assert_eq!(channel.balance, 9_500_000);
        assert_eq!(channel.disputed_amount, 1_000_000);
        assert_eq!(channel.proven_amount, 0);
        assert_eq!(channel.proof_deadline, T0 + crate::PROOF_WINDOW_SECS);
    }

    #[test]
    fn test_dispute_rejected_after_window() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow
            .claim_settlement(fx.facilitator, fx.payer, 1_500_000, [9; 32])
            .unwrap();
        fx.clock.advance(crate::DISPUTE_WINDOW_SECS + 1);
        assert!(matches!(
            fx.escrow.dispute(fx.payer, 1_000_000),
            Err(Error::DisputeWindowExpired { .. })
        ));
    }

    #[test]
    fn test_facilitator_dispute_requires_larger_counter() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.initiate_close(fx.payer, 80_000, [1; 32]).unwrap();
        assert!(matches!(
            fx.escrow
                .facilitator_dispute(fx.facilitator, fx.payer, 80_000, [2; 32]),
            Err(Error::InvalidAmount(_))
        ));
        fx.escrow
            .facilitator_dispute(fx.facilitator, fx.payer, 160_000, [2; 32])
            .unwrap();
        let channel = fx.escrow.channel(&fx.payer).unwrap();
        assert_eq!(channel.checkpoint_root, [2; 32]);
        assert_eq!(channel.proven_amount, 0);
        assert_eq!(channel.checkpoint_amount, 80_000);
    }

    #[test]
    fn test_finalize_requires_expired_proof_window() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow
            .claim_settlement(fx.facilitator, fx.payer, 1_500_000, [9; 32])
            .unwrap();
        fx.escrow.dispute(fx.payer, 1_000_000).unwrap();
        assert!(matches!(
            fx.escrow.finalize_dispute(fx.payer),
            Err(Error::ProofWindowNotExpired { .. })
        ));
    }

    #[test]
    fn test_reopen_after_settlement_starts_clean() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.initiate_close(fx.payer, 50_000, [0; 32]).unwrap();
        fx.escrow
            .facilitator_confirm(fx.facilitator, fx.payer)
            .unwrap();

        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        let channel = fx.escrow.channel(&fx.payer).unwrap();
        assert_eq!(channel.generation, 2);
        assert_eq!(channel.status, ChannelStatus::Active);
        assert_eq!(channel.claimed_amount, 0);
        assert_eq!(channel.proven_call_count(), 0);
    }

    #[test]
    fn test_bond_withdraw_and_events() {
        let mut fx = fixture();
        fx.escrow.deposit_bond(fx.facilitator, 5_000).unwrap();
        fx.escrow.withdraw_bond(fx.facilitator, 2_000).unwrap();
        assert_eq!(fx.escrow.bond_of(&fx.facilitator), 3_000);
        assert!(matches!(
            fx.escrow.withdraw_bond(fx.facilitator, 3_001),
            Err(Error::InsufficientBond { .. })
        ));

        let events = fx.escrow.drain_events();
        assert!(matches!(events[0], EscrowEvent::BondDeposited { .. }));
        assert!(matches!(events[1], EscrowEvent::BondWithdrawn { .. }));
        assert!(fx.escrow.events().is_empty());
    }

    #[test]
    fn test_partial_settlement_resumes_without_double_pay() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow.initiate_close(fx.payer, 50_000, [0; 32]).unwrap();

        // Receiver leg lands, then the refund transfer fails transiently
        fx.asset.fail_push_after(1);
        let err = fx
            .escrow
            .facilitator_confirm(fx.facilitator, fx.payer)
            .unwrap_err();
        assert!(matches!(err, Error::AssetTransferFailed(_)));
        assert_eq!(fx.asset.balance_of(&fx.receiver), 50_000);
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Closing);
        let plan = fx
            .escrow
            .channel(&fx.payer)
            .unwrap()
            .pending_disbursement
            .unwrap();
        assert!(plan.receiver_paid);
        assert_eq!(plan.refund, 9_950_000);

        // Custody still covers the recorded plan
        assert_eq!(
            fx.asset.custody(),
            fx.escrow.total_channel_liability()
                + fx.escrow.total_bonds()
                + fx.escrow.fees_retained()
        );

        // Contesting a channel mid-disbursement is rejected
        assert!(matches!(
            fx.escrow.dispute(fx.payer, 1),
            Err(Error::InvalidStateTransition { .. })
        ));

        // The retry issues only the outstanding refund leg
        fx.escrow
            .facilitator_confirm(fx.facilitator, fx.payer)
            .unwrap();
        assert_eq!(fx.asset.balance_of(&fx.receiver), 50_000);
        assert_eq!(
            fx.asset.balance_of(&fx.payer),
            1_000_000_000 - 10_000_000 + 9_950_000
        );
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Settled);
    }

    #[test]
    fn test_interrupted_finalize_slashes_once() {
        let mut fx = bonded_fixture();
        fx.escrow
            .deposit(fx.payer, fx.facilitator, fx.receiver, 10_000_000)
            .unwrap();
        fx.escrow
            .claim_settlement(fx.facilitator, fx.payer, 40_000, [9; 32])
            .unwrap();
        fx.escrow.dispute(fx.payer, 40_000).unwrap();
        fx.clock.advance(crate::PROOF_WINDOW_SECS + 1);

        // Nothing proven: settlement 0, so the combined payer leg (refund
        // plus slash) is the first transfer, and it fails once
        fx.asset.fail_push_after(0);
        let err = fx.escrow.finalize_dispute(fx.payer).unwrap_err();
        assert!(matches!(err, Error::AssetTransferFailed(_)));

        // The slash was committed exactly once despite the failed transfer
        assert_eq!(
            fx.escrow.bond_of(&fx.facilitator),
            crate::MIN_FACILITATOR_BOND - 40_000
        );
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Disputed);

        let settlement = fx.escrow.finalize_dispute(fx.payer).unwrap();
        assert_eq!(settlement, 0);
        assert_eq!(
            fx.escrow.bond_of(&fx.facilitator),
            crate::MIN_FACILITATOR_BOND - 40_000
        );
        // Full refund with the fee restored, plus the slash, paid once
        assert_eq!(fx.asset.balance_of(&fx.payer), 1_000_000_000 + 40_000);
        assert_eq!(fx.escrow.status_of(&fx.payer), ChannelStatus::Settled);
        let slashes = fx
            .escrow
            .events()
            .iter()
            .filter(|e| matches!(e, EscrowEvent::BondSlashed { .. }))
            .count();
        assert_eq!(slashes, 1);
    }

    #[test]
    fn test_operations_on_missing_channel() {
        let mut fx = fixture();
        assert!(matches!(
            fx.escrow.top_up(fx.payer, 1),
            Err(Error::ChannelNotActive {
                status: ChannelStatus::Inactive
            })
        ));
        assert!(matches!(
            fx.escrow.dispute(fx.payer, 1),
            Err(Error::ChannelNotClosing { .. })
        ));
        assert!(matches!(
            fx.escrow.finalize_dispute(fx.payer),
            Err(Error::ChannelNotDisputed { .. })
        ));
    }
}
