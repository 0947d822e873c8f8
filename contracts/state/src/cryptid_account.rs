use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

use crate::CryptidStateError;

/// Initialized (non-generative) Cryptid account.
///
/// PDA Seeds: ["cryptid_account", did_program, did, index (u32 LE)]
///
/// Layout:
/// - did: Pubkey
/// - did_program: Pubkey
/// - index: u32
/// - bump: u8
/// - middlewares: Vec<Pubkey> (attachment order)
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct CryptidAccount {
    pub did: Pubkey,
    pub did_program: Pubkey,
    pub index: u32,
    pub bump: u8,
    pub middlewares: Vec<Pubkey>,
}

impl CryptidAccount {
    /// Fixed part of the layout (without middleware entries)
    pub const BASE_LEN: usize = 32 + 32 + 4 + 1 + 4;

    /// Allocation size for an account carrying `middlewares` entries
    pub fn space(middlewares: usize) -> usize {
        Self::BASE_LEN + 32 * middlewares
    }

    pub fn load(address: &Pubkey, data: &[u8]) -> Result<Self, CryptidStateError> {
        if data.len() < Self::BASE_LEN {
            return Err(CryptidStateError::AccountTooSmall {
                account: *address,
                len: data.len(),
                min: Self::BASE_LEN,
            });
        }
        Self::deserialize(&mut &data[..]).map_err(|e| CryptidStateError::InvalidAccountData {
            account: *address,
            reason: e.to_string(),
        })
    }
}
