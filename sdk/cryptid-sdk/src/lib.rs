pub mod advanced;
pub mod basic;
pub mod config;
pub mod core;
pub mod error;
pub mod types;
pub mod utils;

pub use crate::advanced::encoder::{
    AccessFlags, ControllerReference, EncodedTransaction, InstructionEncoder, NamedAccounts,
    TableEntry,
};
pub use crate::advanced::instructions::{CryptidTransactionBuilder, ExecuteSource};
pub use crate::basic::actions::ProposeAndExecute;
pub use crate::basic::client::{
    Capabilities, ComposedTransaction, Cryptid, CryptidClientBuilder, Proposal,
};
pub use crate::basic::middleware::{
    MiddlewareClient, MiddlewareContext, MiddlewareOutput, MiddlewarePipeline, MiddlewareRegistry,
};
pub use crate::config::{Commitment, CryptidConfig, RentPayer};
pub use crate::core::connection::{RpcConnection, SolConnection};
pub use crate::core::signer::CryptidSigner;
pub use crate::error::{CryptidSdkError, EncodingError, Result, Stage};
pub use crate::types::{CryptidAccountDetails, Middleware};
pub use crate::utils::{
    default_cryptid_account, derive_cryptid_account, derive_did_account, did_for_authority,
    parse_did,
};

pub mod state {
    pub use cryptid_state::{
        AbbreviatedAccountMeta, AbbreviatedInstructionData, AccountIndex, CryptidAccount,
        CryptidInstruction, CryptidSeeds, ExecuteFlags, NamedAccount, TransactionAccount,
        TransactionState, CRYPTID_PROGRAM_ID, DID_PROGRAM_ID, MAX_ACCOUNT_TABLE_ENTRIES,
    };
}
