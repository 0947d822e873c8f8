//! Index-compressed instruction format.
//!
//! Instead of repeating 32-byte keys per instruction, every account reference
//! points either at one of the fixed named slots the execution context always
//! supplies, or at an entry of the dynamic account table carried alongside the
//! instructions.

use borsh::{BorshDeserialize, BorshSerialize};

/// Accounts the wrapping instruction always supplies positionally.
///
/// Borsh discriminants follow declaration order (0..=3).
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedAccount {
    /// The Cryptid account itself
    CryptidAccount,
    /// The DID account owning the Cryptid account
    DidAccount,
    /// The DID registry program
    DidProgram,
    /// The transaction signer; resolved at execution time
    Signer,
}

impl NamedAccount {
    /// Named slots in their fixed order
    pub const ALL: [NamedAccount; 4] = [
        NamedAccount::CryptidAccount,
        NamedAccount::DidAccount,
        NamedAccount::DidProgram,
        NamedAccount::Signer,
    ];

    /// Fixed slot position of this account
    pub fn slot(self) -> usize {
        self as usize
    }
}

/// Where an abbreviated reference points.
///
/// Layout: `[tag: u8]` followed by `[NamedAccount: u8]` (tag 0) or
/// `[table index: u8]` (tag 1).
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountIndex {
    Named(NamedAccount),
    Table(u8),
}

/// One account reference of an abbreviated instruction.
///
/// Layout: `index`, `is_signer: u8`, `is_writable: u8`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbbreviatedAccountMeta {
    pub index: AccountIndex,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AbbreviatedAccountMeta {
    pub fn table(index: u8, is_signer: bool, is_writable: bool) -> Self {
        Self {
            index: AccountIndex::Table(index),
            is_signer,
            is_writable,
        }
    }

    pub fn named(account: NamedAccount, is_signer: bool, is_writable: bool) -> Self {
        Self {
            index: AccountIndex::Named(account),
            is_signer,
            is_writable,
        }
    }
}

/// An instruction whose program and accounts are table references.
///
/// Layout: `program_index`, `accounts: Vec<AbbreviatedAccountMeta>`,
/// `data: Vec<u8>`. The data bytes are opaque and copied verbatim.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct AbbreviatedInstructionData {
    pub program_index: AccountIndex,
    pub accounts: Vec<AbbreviatedAccountMeta>,
    pub data: Vec<u8>,
}

impl AbbreviatedInstructionData {
    /// Every index this instruction references, program first
    pub fn references(&self) -> impl Iterator<Item = AccountIndex> + '_ {
        std::iter::once(self.program_index).chain(self.accounts.iter().map(|meta| meta.index))
    }
}
