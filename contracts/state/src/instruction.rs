//! Cryptid Instruction Definitions
//!
//! Discriminants are the one-byte borsh variant tags, in declaration order.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

use crate::{AbbreviatedInstructionData, TransactionState};

/// Execution flags carried by `DirectExecute` and `ExecuteTransaction`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteFlags(pub u8);

impl ExecuteFlags {
    /// Verbose on-chain logging
    pub const DEBUG: u8 = 0b0000_0001;
    /// Signer is not a key on the DID; approval must come from a superuser middleware
    pub const ALLOW_UNAUTHORIZED: u8 = 0b0000_0010;

    pub fn new(debug: bool, allow_unauthorized: bool) -> Self {
        let mut flags = 0;
        if debug {
            flags |= Self::DEBUG;
        }
        if allow_unauthorized {
            flags |= Self::ALLOW_UNAUTHORIZED;
        }
        Self(flags)
    }

    pub fn debug(self) -> bool {
        self.0 & Self::DEBUG != 0
    }

    pub fn allow_unauthorized(self) -> bool {
        self.0 & Self::ALLOW_UNAUTHORIZED != 0
    }
}

/// Bumps and index that let the verifier re-derive the Cryptid and DID accounts.
///
/// Layout: `cryptid_account_bump: u8`, `cryptid_account_index: u32`,
/// `did_account_bump: u8`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptidSeeds {
    pub cryptid_account_bump: u8,
    pub cryptid_account_index: u32,
    pub did_account_bump: u8,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum CryptidInstruction {
    /// Initialize a non-generative Cryptid account
    ///
    /// Accounts:
    /// 0. `[writable, signer]` Payer
    /// 1. `[writable]` Cryptid account (PDA)
    /// 2. `[]` DID account
    /// 3. `[]` DID program
    /// 4. `[signer]` Authority (key on the DID or end of the controller chain)
    /// 5. `[]` System program
    /// 6+ `[]` Controller DID accounts
    CreateCryptidAccount {
        /// Account index, never 0
        index: u32,
        did_account_bump: u8,
        /// Indices into accounts 6+
        controller_chain: Vec<u8>,
        /// Initial middleware list, attachment order
        middlewares: Vec<Pubkey>,
    },

    /// Execute wrapped instructions in the same transaction
    ///
    /// Accounts:
    /// 0. `[writable]` Cryptid account
    /// 1. `[]` DID account
    /// 2. `[]` DID program
    /// 3. `[writable, signer]` Signer
    /// 4+ Dynamic account table
    DirectExecute {
        /// Table indices of the controller DID accounts
        controller_chain: Vec<u8>,
        instructions: Vec<AbbreviatedInstructionData>,
        seeds: CryptidSeeds,
        flags: ExecuteFlags,
    },

    /// Store a proposal in a fresh transaction account
    ///
    /// Accounts:
    /// 0. `[writable]` Cryptid account
    /// 1. `[]` DID account
    /// 2. `[]` DID program
    /// 3. `[writable, signer]` Authority
    /// 4. `[writable]` Rent payer (the authority or the Cryptid account)
    /// 5. `[writable, signer]` Transaction account
    /// 6. `[]` System program
    /// 7+ Dynamic account table (`num_accounts` entries)
    ProposeTransaction {
        controller_chain: Vec<u8>,
        seeds: CryptidSeeds,
        state: TransactionState,
        allow_unauthorized: bool,
        instructions: Vec<AbbreviatedInstructionData>,
        num_accounts: u8,
    },

    /// Append to a `NotReady` proposal
    ///
    /// Accounts:
    /// 0. `[writable]` Cryptid account
    /// 1. `[]` DID account
    /// 2. `[]` DID program
    /// 3. `[writable, signer]` Authority
    /// 4. `[writable]` Transaction account
    /// 5+ New table entries (`num_accounts`), appended after the stored table
    /// 5+num_accounts.. `[]` Controller DID accounts
    ExtendTransaction {
        /// Indices into the controller accounts after the new entries
        controller_chain: Vec<u8>,
        seeds: CryptidSeeds,
        allow_unauthorized: bool,
        instructions: Vec<AbbreviatedInstructionData>,
        num_accounts: u8,
    },

    /// Freeze a proposal (`NotReady` to `Ready`)
    ///
    /// Accounts:
    /// 0. `[writable]` Cryptid account
    /// 1. `[]` DID account
    /// 2. `[]` DID program
    /// 3. `[writable, signer]` Authority
    /// 4. `[writable]` Transaction account
    /// 5+ `[]` Controller DID accounts
    SealTransaction {
        controller_chain: Vec<u8>,
        seeds: CryptidSeeds,
        allow_unauthorized: bool,
    },

    /// Execute a `Ready` proposal
    ///
    /// Accounts:
    /// 0. `[writable]` Cryptid account
    /// 1. `[]` DID account
    /// 2. `[]` DID program
    /// 3. `[writable, signer]` Signer
    /// 4. `[writable]` Rent destination
    /// 5. `[writable]` Transaction account
    /// 6+ Stored account table, then execute-time accounts
    ExecuteTransaction {
        /// Indices into accounts 6+
        controller_chain: Vec<u8>,
        seeds: CryptidSeeds,
        flags: ExecuteFlags,
    },

    /// Reclaim a transaction account
    ///
    /// Accounts:
    /// 0. `[writable]` Cryptid account
    /// 1. `[]` DID account
    /// 2. `[]` DID program
    /// 3. `[signer]` Authority
    /// 4. `[writable]` Rent destination
    /// 5. `[writable]` Transaction account
    /// 6+ `[]` Controller DID accounts
    CloseTransaction {
        controller_chain: Vec<u8>,
        seeds: CryptidSeeds,
    },
}

impl CryptidInstruction {
    pub fn pack(&self) -> Vec<u8> {
        // Writing into a Vec cannot fail
        borsh::to_vec(self).unwrap_or_default()
    }

    pub fn unpack(input: &[u8]) -> std::io::Result<Self> {
        Self::try_from_slice(input)
    }

    /// Short name for logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            CryptidInstruction::CreateCryptidAccount { .. } => "create_cryptid_account",
            CryptidInstruction::DirectExecute { .. } => "direct_execute",
            CryptidInstruction::ProposeTransaction { .. } => "propose_transaction",
            CryptidInstruction::ExtendTransaction { .. } => "extend_transaction",
            CryptidInstruction::SealTransaction { .. } => "seal_transaction",
            CryptidInstruction::ExecuteTransaction { .. } => "execute_transaction",
            CryptidInstruction::CloseTransaction { .. } => "close_transaction",
        }
    }
}
