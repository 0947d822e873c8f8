use solana_program::pubkey::Pubkey;
use thiserror::Error;

/// Errors raised while reading Cryptid-owned account data.
#[derive(Debug, Error)]
pub enum CryptidStateError {
    /// Account data does not decode as the expected layout
    #[error("Invalid account data for {account}: {reason}")]
    InvalidAccountData { account: Pubkey, reason: String },

    /// Account data is shorter than the fixed part of the layout
    #[error("Account {account} holds {len} bytes, layout needs at least {min}")]
    AccountTooSmall {
        account: Pubkey,
        len: usize,
        min: usize,
    },
}
