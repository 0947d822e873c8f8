//! Client for the check-recipient middleware.
//!
//! The middleware pins a Cryptid account to one recipient: every system
//! transfer in a proposal must pay the recipient recorded in the middleware
//! state account, otherwise the execute-stage hook refuses to approve it.

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use cryptid_sdk::error::BoxedError;
use cryptid_sdk::{
    utils, EncodedTransaction, Middleware, MiddlewareClient, MiddlewareContext, MiddlewareOutput,
    Stage, TableEntry,
};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction::SystemInstruction;
use solana_sdk::{pubkey, system_program};
use thiserror::Error;

pub const PROGRAM_ID: Pubkey = pubkey!("midcHDoZsxvMmNtUr8howe8MWFrJeHHPbAyJF1nHvyf");

pub const SEED: &[u8] = b"check_recipient";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CheckRecipientError {
    #[error("Middleware account {account} does not exist")]
    MissingState { account: Pubkey },

    #[error("Middleware account {account} is not check-recipient state: {reason}")]
    InvalidState { account: Pubkey, reason: String },

    #[error("Transaction account {account} does not exist")]
    MissingTransaction { account: Pubkey },

    #[error("Transfer to {recipient} is not allowed; only {allowed} may receive funds")]
    RecipientNotAllowed { recipient: Pubkey, allowed: Pubkey },
}

/// Middleware state account
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRecipientState {
    pub authority: Pubkey,
    pub recipient: Pubkey,
    pub bump: u8,
}

impl CheckRecipientState {
    pub const LEN: usize = 32 + 32 + 1;
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum CheckRecipientInstruction {
    /// Accounts:
    /// 0. `[writable, signer]` Payer
    /// 1. `[writable]` Middleware account (PDA)
    /// 2. `[signer]` Authority
    /// 3. `[]` System program
    Create { recipient: Pubkey, bump: u8 },

    /// Accounts:
    /// 0. `[]` Middleware account
    /// 1. `[writable]` Transaction account
    ExecuteMiddleware,
}

/// Derive the middleware account for `authority` and `recipient`
pub fn find_middleware_address(authority: &Pubkey, recipient: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[SEED, authority.as_ref(), recipient.as_ref()], &PROGRAM_ID)
}

pub struct CheckRecipientBuilder {
    authority: Pubkey,
    recipient: Pubkey,
}

impl CheckRecipientBuilder {
    pub fn new(authority: Pubkey) -> Self {
        Self {
            authority,
            recipient: Pubkey::default(),
        }
    }

    pub fn recipient(mut self, recipient: Pubkey) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn address(&self) -> (Pubkey, u8) {
        find_middleware_address(&self.authority, &self.recipient)
    }

    /// The entry to attach to a Cryptid account
    pub fn middleware(&self) -> Middleware {
        Middleware {
            address: self.address().0,
            owning_program: PROGRAM_ID,
            is_superuser: false,
        }
    }

    pub fn build_state(&self) -> CheckRecipientState {
        CheckRecipientState {
            authority: self.authority,
            recipient: self.recipient,
            bump: self.address().1,
        }
    }

    /// Instruction creating the middleware account
    pub fn build_create(&self, payer: &Pubkey) -> Instruction {
        let (address, bump) = self.address();
        Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(address, false),
                AccountMeta::new_readonly(self.authority, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: borsh::to_vec(&CheckRecipientInstruction::Create {
                recipient: self.recipient,
                bump,
            })
            .unwrap_or_default(),
        }
    }
}

/// Recipient of a system transfer, if `ix` is one
fn transfer_recipient(ix: &Instruction) -> Option<Pubkey> {
    if ix.program_id != system_program::id() {
        return None;
    }
    match bincode::deserialize::<SystemInstruction>(&ix.data).ok()? {
        SystemInstruction::Transfer { .. } => ix.accounts.get(1).map(|meta| meta.pubkey),
        _ => None,
    }
}

/// Refuse `instructions` unless every transfer pays `allowed`
pub fn check_transfers(
    instructions: &[Instruction],
    allowed: &Pubkey,
) -> Result<(), CheckRecipientError> {
    for recipient in instructions.iter().filter_map(transfer_recipient) {
        if recipient != *allowed {
            return Err(CheckRecipientError::RecipientNotAllowed {
                recipient,
                allowed: *allowed,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CheckRecipientClient;

impl CheckRecipientClient {
    async fn load_state(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<CheckRecipientState, BoxedError> {
        let account = ctx
            .connection
            .get_account(&ctx.middleware_account)
            .await?
            .ok_or(CheckRecipientError::MissingState {
                account: ctx.middleware_account,
            })?;
        CheckRecipientState::try_from_slice(&account.data).map_err(|e| {
            CheckRecipientError::InvalidState {
                account: ctx.middleware_account,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl MiddlewareClient for CheckRecipientClient {
    async fn on_execute(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, BoxedError> {
        let state = self.load_state(ctx).await?;
        let stored = utils::fetch_transaction_account(
            ctx.connection,
            &ctx.transaction_account,
            Stage::Execute,
        )
        .await?
        .ok_or(CheckRecipientError::MissingTransaction {
            account: ctx.transaction_account,
        })?;

        let named = ctx.details.named_accounts(TableEntry::Concrete(ctx.authority));
        let instructions =
            EncodedTransaction::from_stored(named, stored.account_table, stored.instructions)?
                .decode_instructions()?;
        check_transfers(&instructions, &state.recipient)?;

        tracing::debug!(
            transaction_account = %ctx.transaction_account,
            recipient = %state.recipient,
            "check-recipient approved"
        );
        Ok(MiddlewareOutput::new().with_instruction(Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(ctx.middleware_account, false),
                AccountMeta::new(ctx.transaction_account, false),
            ],
            data: borsh::to_vec(&CheckRecipientInstruction::ExecuteMiddleware)?,
        }))
    }
}
