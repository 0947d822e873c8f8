//! Client-side checks of the proposal lifecycle.
//!
//! The ledger enforces the same rules; checking first avoids paying for a
//! transaction that is bound to fail and gives a precise error.

use cryptid_state::TransactionState;
use solana_sdk::pubkey::Pubkey;

use crate::error::{CryptidSdkError, Result, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOp {
    Extend,
    Seal,
    Execute,
    Close,
}

impl ProposalOp {
    pub fn name(self) -> &'static str {
        match self {
            ProposalOp::Extend => "extend",
            ProposalOp::Seal => "seal",
            ProposalOp::Execute => "execute",
            ProposalOp::Close => "close",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            ProposalOp::Extend | ProposalOp::Seal => Stage::Propose,
            ProposalOp::Execute => Stage::Execute,
            ProposalOp::Close => Stage::Close,
        }
    }

    pub fn allowed_in(self, state: TransactionState) -> bool {
        match self {
            ProposalOp::Extend | ProposalOp::Seal => state == TransactionState::NotReady,
            ProposalOp::Execute => state == TransactionState::Ready,
            ProposalOp::Close => true,
        }
    }
}

/// Reject `op` on `account` unless its stored `state` permits it
pub fn check(op: ProposalOp, account: &Pubkey, state: TransactionState) -> Result<()> {
    if op.allowed_in(state) {
        return Ok(());
    }
    Err(CryptidSdkError::State {
        stage: op.stage(),
        operation: op.name(),
        account: *account,
        state,
    })
}
