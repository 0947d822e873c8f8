//! Stored proposal accounts.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

use crate::{AbbreviatedInstructionData, CryptidStateError};

/// Lifecycle of a stored proposal. Only ever moves forward.
///
/// Discriminants: `NotReady = 0`, `Ready = 1`, `Executed = 2`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Still accepting `extend`
    NotReady,
    /// Sealed; may be executed
    Ready,
    /// Executed by the ledger
    Executed,
}

impl TransactionState {
    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_advance_to(self, next: TransactionState) -> bool {
        matches!(
            (self, next),
            (TransactionState::NotReady, TransactionState::Ready)
                | (TransactionState::Ready, TransactionState::Executed)
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionState::NotReady => "NotReady",
            TransactionState::Ready => "Ready",
            TransactionState::Executed => "Executed",
        };
        f.write_str(name)
    }
}

/// A proposal stored on the ledger between `propose` and `execute`.
///
/// Layout (field order is the wire order):
/// - cryptid_account: Pubkey
/// - owner_did: Pubkey (DID account)
/// - account_table: Vec<Pubkey>
/// - instructions: Vec<AbbreviatedInstructionData>
/// - approved_middleware: Option<Pubkey>
/// - state: TransactionState
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionAccount {
    pub cryptid_account: Pubkey,
    pub owner_did: Pubkey,
    pub account_table: Vec<Pubkey>,
    pub instructions: Vec<AbbreviatedInstructionData>,
    pub approved_middleware: Option<Pubkey>,
    pub state: TransactionState,
}

impl TransactionAccount {
    /// Smallest possible encoding: two keys, two empty vectors, `None`, state
    pub const MIN_LEN: usize = 32 + 32 + 4 + 4 + 1 + 1;

    /// Decode from raw account data. Trailing bytes left by over-allocation
    /// are ignored.
    pub fn load(address: &Pubkey, data: &[u8]) -> Result<Self, CryptidStateError> {
        if data.len() < Self::MIN_LEN {
            return Err(CryptidStateError::AccountTooSmall {
                account: *address,
                len: data.len(),
                min: Self::MIN_LEN,
            });
        }
        Self::deserialize(&mut &data[..]).map_err(|e| CryptidStateError::InvalidAccountData {
            account: *address,
            reason: e.to_string(),
        })
    }
}
