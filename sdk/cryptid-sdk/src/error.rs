use cryptid_state::{CryptidStateError, TransactionState};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::error::Error;
use thiserror::Error;

/// Boxed error handed back by transport and middleware collaborators
pub type BoxedError = Box<dyn Error + Send + Sync>;

/// Lifecycle stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Encode,
    Propose,
    Execute,
    Close,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Encode => "encode",
            Stage::Propose => "propose",
            Stage::Execute => "execute",
            Stage::Close => "close",
        };
        f.write_str(name)
    }
}

/// Failures of the account-table encoder and decoder
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// Adding this key would grow the dynamic table past its one-byte bound
    #[error("Account table is full: cannot add {pubkey}, limit is {max} entries")]
    TableOverflow { pubkey: Pubkey, max: usize },

    /// A stored proposal holds more entries than one-byte indices can address
    #[error("Stored account table has {len} entries, limit is {max}")]
    StoredTableTooLarge { len: usize, max: usize },

    /// A held encoding no longer matches the proposal stored on the ledger
    #[error("Encoding of {account} is stale: the stored proposal has changed")]
    StaleEncoding { account: Pubkey },

    /// A stored reference points past the end of the supplied table
    #[error("Table index {index} is outside a table of {len} entries")]
    UnresolvedIndex { index: u8, len: usize },

    /// Concrete metas were requested while the signer slot is still reserved
    #[error("Reserved signer slot has no concrete key")]
    UnresolvedSigner,

    /// A controller key collides with a fixed named account
    #[error("Controller {pubkey} is already a named account")]
    NamedController { pubkey: Pubkey },

    /// The serialized ledger transaction exceeds the packet budget
    #[error("Transaction is {size} bytes, limit is {limit}")]
    TransactionTooLarge { size: usize, limit: usize },
}

/// SDK-specific error types for Cryptid operations
#[derive(Debug, Error)]
pub enum CryptidSdkError {
    /// Malformed DID or account index
    #[error("Cannot derive address from {input}: {reason}")]
    AddressDerivation { input: String, reason: String },

    #[error("[{stage}] encoding failed: {source}")]
    Encoding {
        stage: Stage,
        #[source]
        source: EncodingError,
    },

    /// Operation attempted in the wrong proposal state
    #[error("[{stage}] cannot {operation} transaction account {account} in state {state}")]
    State {
        stage: Stage,
        operation: &'static str,
        account: Pubkey,
        state: TransactionState,
    },

    /// An execute was already submitted for this proposal and did not land
    #[error("[execute] refusing to resubmit execute for {account}: previous attempt was rejected")]
    ReplayRefused { account: Pubkey },

    /// A middleware hook rejected or raised
    #[error("[{stage}] middleware {middleware} failed: {source}")]
    Middleware {
        stage: Stage,
        middleware: Pubkey,
        #[source]
        source: BoxedError,
    },

    /// Submit, confirm or fetch failed; the transport error is kept as the source
    #[error("[{stage}] transport error: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: BoxedError,
    },

    #[error("[{stage}] transaction {signature} was not confirmed")]
    NotConfirmed { stage: Stage, signature: Signature },

    #[error("[{stage}] signer {signer} failed: {reason}")]
    Signing {
        stage: Stage,
        signer: Pubkey,
        reason: String,
    },

    /// Unrecognized configuration value
    #[error("Unsupported value {value:?} for option {option}")]
    UnsupportedOption { option: &'static str, value: String },

    #[error("[{stage}] account not found: {account}")]
    AccountNotFound { stage: Stage, account: Pubkey },

    #[error("Invalid account data: {0}")]
    InvalidAccountData(#[from] CryptidStateError),

    /// Borsh serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] std::io::Error),
}

impl CryptidSdkError {
    pub fn encoding(stage: Stage, source: EncodingError) -> Self {
        CryptidSdkError::Encoding { stage, source }
    }

    pub fn transport(stage: Stage, source: BoxedError) -> Self {
        CryptidSdkError::Transport { stage, source }
    }

    /// Stage the failure belongs to, when it is tied to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CryptidSdkError::Encoding { stage, .. }
            | CryptidSdkError::State { stage, .. }
            | CryptidSdkError::Middleware { stage, .. }
            | CryptidSdkError::Transport { stage, .. }
            | CryptidSdkError::NotConfirmed { stage, .. }
            | CryptidSdkError::Signing { stage, .. }
            | CryptidSdkError::AccountNotFound { stage, .. } => Some(*stage),
            CryptidSdkError::ReplayRefused { .. } => Some(Stage::Execute),
            _ => None,
        }
    }

    /// Whether the payload is too big for one transaction and the caller may
    /// fall back to the propose/execute path
    pub fn is_oversized(&self) -> bool {
        matches!(
            self,
            CryptidSdkError::Encoding {
                source: EncodingError::TransactionTooLarge { .. }
                    | EncodingError::TableOverflow { .. },
                ..
            }
        )
    }
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, CryptidSdkError>;
