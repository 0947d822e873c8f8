//! Cryptid State Module
//!
//! Wire and account layouts shared between the Cryptid client and the on-chain
//! verifier. Every type here is encoded with borsh: fields in declared order,
//! `u32` little-endian length prefixes for vectors and strings, and a one-byte
//! discriminant for enums in declared-variant order. The layouts carry no
//! version tag, so any reordering is a breaking change on the wire.

pub mod abbreviated;
pub mod cryptid_account;
pub mod error;
pub mod instruction;
pub mod transaction;

use solana_program::{pubkey, pubkey::Pubkey};

pub use abbreviated::{
    AbbreviatedAccountMeta, AbbreviatedInstructionData, AccountIndex, NamedAccount,
};
pub use cryptid_account::CryptidAccount;
pub use error::CryptidStateError;
pub use instruction::{CryptidInstruction, CryptidSeeds, ExecuteFlags};
pub use transaction::{TransactionAccount, TransactionState};

/// Cryptid wrapping program
pub const CRYPTID_PROGRAM_ID: Pubkey = pubkey!("cryptJTh61jY5kbUmBEXyc86tBUyueBDrLuNSZWmUcs");

/// DID registry program (`did:sol`)
pub const DID_PROGRAM_ID: Pubkey = pubkey!("didso1Dpqpm4CsiCjzP766BGY89CAdD6ZBL68cRhFPc");

/// Seed prefix for Cryptid account PDAs
pub const CRYPTID_ACCOUNT_SEED: &[u8] = b"cryptid_account";

/// Seed prefix for DID account PDAs (owned by the DID program)
pub const DID_ACCOUNT_SEED: &[u8] = b"did-account";

/// Upper bound on dynamic account-table entries. The table length travels as a
/// single byte, so 255 is the largest table the verifier can be told about.
pub const MAX_ACCOUNT_TABLE_ENTRIES: usize = u8::MAX as usize;
