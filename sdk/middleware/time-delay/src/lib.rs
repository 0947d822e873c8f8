//! Client for the time-delay middleware.
//!
//! A proposal guarded by this middleware is registered when it is sealed; the
//! registration records its creation time in a PDA. Execution is approved only
//! once the configured number of seconds has passed. Closing the proposal
//! reclaims the registration account.

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use cryptid_sdk::error::BoxedError;
use cryptid_sdk::{Middleware, MiddlewareClient, MiddlewareContext, MiddlewareOutput};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::{pubkey, system_program};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const PROGRAM_ID: Pubkey = pubkey!("midttN2h6G2CBvt1kpnwUsFXM6Gv7gratVwuo2XhSNk");

pub const SEED: &[u8] = b"time_delay";
pub const CREATE_TIME_SEED: &[u8] = b"transaction_create_time";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimeDelayError {
    #[error("Middleware account {account} does not exist")]
    MissingState { account: Pubkey },

    #[error("Account {account} holds malformed time-delay data: {reason}")]
    InvalidState { account: Pubkey, reason: String },

    #[error("Transaction account {account} was never registered with the time delay")]
    NotRegistered { account: Pubkey },

    #[error("Time delay not elapsed: {remaining}s remaining")]
    DelayNotElapsed { remaining: i64 },

    #[error("Delay of {seconds}s after {time} is past the representable time range")]
    DelayOutOfRange { time: i64, seconds: i64 },
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeDelayState {
    pub authority: Pubkey,
    /// Seconds between registration and the earliest execute
    pub seconds: i64,
    pub bump: u8,
}

/// Registration record of one transaction account
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCreateTime {
    /// Unix timestamp
    pub time: i64,
    pub bump: u8,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum TimeDelayInstruction {
    /// Accounts:
    /// 0. `[writable, signer]` Payer
    /// 1. `[writable]` Middleware account (PDA)
    /// 2. `[signer]` Authority
    /// 3. `[]` System program
    Create { seconds: i64, bump: u8 },

    /// Accounts:
    /// 0. `[]` Middleware account
    /// 1. `[]` Transaction account
    /// 2. `[writable]` Create-time account (PDA)
    /// 3. `[writable, signer]` Payer
    /// 4. `[]` System program
    RegisterTransaction { bump: u8 },

    /// Accounts:
    /// 0. `[]` Middleware account
    /// 1. `[writable]` Transaction account
    /// 2. `[]` Create-time account
    ExecuteMiddleware,

    /// Accounts:
    /// 0. `[]` Middleware account
    /// 1. `[]` Transaction account
    /// 2. `[writable]` Create-time account
    /// 3. `[writable]` Rent destination
    CloseTransaction,
}

pub fn find_middleware_address(authority: &Pubkey, seconds: i64) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[SEED, authority.as_ref(), &seconds.to_le_bytes()],
        &PROGRAM_ID,
    )
}

pub fn find_create_time_address(transaction_account: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[CREATE_TIME_SEED, transaction_account.as_ref()], &PROGRAM_ID)
}

pub struct TimeDelayBuilder {
    authority: Pubkey,
    seconds: i64,
}

impl TimeDelayBuilder {
    pub fn new(authority: Pubkey) -> Self {
        Self {
            authority,
            seconds: 0,
        }
    }

    pub fn delay(mut self, seconds: i64) -> Self {
        self.seconds = seconds;
        self
    }

    pub fn address(&self) -> (Pubkey, u8) {
        find_middleware_address(&self.authority, self.seconds)
    }

    pub fn middleware(&self) -> Middleware {
        Middleware {
            address: self.address().0,
            owning_program: PROGRAM_ID,
            is_superuser: false,
        }
    }

    pub fn build_state(&self) -> TimeDelayState {
        TimeDelayState {
            authority: self.authority,
            seconds: self.seconds,
            bump: self.address().1,
        }
    }

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
            data: borsh::to_vec(&TimeDelayInstruction::Create {
                seconds: self.seconds,
                bump,
            })
            .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeDelayClient {
    /// Fixed clock; the system clock when unset
    now: Option<i64>,
}

impl TimeDelayClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate delays as of `now` (unix seconds)
    pub fn at(now: i64) -> Self {
        Self { now: Some(now) }
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default()
        })
    }
}

async fn load<T: BorshDeserialize>(
    ctx: &MiddlewareContext<'_>,
    address: &Pubkey,
) -> Result<Option<T>, BoxedError> {
    let Some(account) = ctx.connection.get_account(address).await? else {
        return Ok(None);
    };
    T::deserialize(&mut &account.data[..])
        .map(Some)
        .map_err(|e| {
            TimeDelayError::InvalidState {
                account: *address,
                reason: e.to_string(),
            }
            .into()
        })
}

#[async_trait]
impl MiddlewareClient for TimeDelayClient {
    async fn on_propose(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, BoxedError> {
        let (create_time, bump) = find_create_time_address(&ctx.transaction_account);
        Ok(MiddlewareOutput::new().with_instruction(Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(ctx.middleware_account, false),
                AccountMeta::new_readonly(ctx.transaction_account, false),
                AccountMeta::new(create_time, false),
                AccountMeta::new(ctx.authority, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: borsh::to_vec(&TimeDelayInstruction::RegisterTransaction { bump })?,
        }))
    }

    async fn on_execute(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, BoxedError> {
        let state: TimeDelayState = load(ctx, &ctx.middleware_account)
            .await?
            .ok_or(TimeDelayError::MissingState {
                account: ctx.middleware_account,
            })?;
        let (create_time, _) = find_create_time_address(&ctx.transaction_account);
        let registered: TransactionCreateTime =
            load(ctx, &create_time)
                .await?
                .ok_or(TimeDelayError::NotRegistered {
                    account: ctx.transaction_account,
                })?;

        let ready_at = registered
            .time
            .checked_add(state.seconds)
            .ok_or(TimeDelayError::DelayOutOfRange {
                time: registered.time,
                seconds: state.seconds,
            })?;
        let remaining = ready_at.saturating_sub(self.now());
        if remaining > 0 {
            return Err(TimeDelayError::DelayNotElapsed { remaining }.into());
        }

        tracing::debug!(
            transaction_account = %ctx.transaction_account,
            seconds = state.seconds,
            "time delay elapsed"
        );
        Ok(MiddlewareOutput::new().with_instruction(Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(ctx.middleware_account, false),
                AccountMeta::new(ctx.transaction_account, false),
                AccountMeta::new_readonly(create_time, false),
            ],
            data: borsh::to_vec(&TimeDelayInstruction::ExecuteMiddleware)?,
        }))
    }

    async fn on_close(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, BoxedError> {
        let (create_time, _) = find_create_time_address(&ctx.transaction_account);
        // never sealed, so never registered
        if ctx.connection.get_account(&create_time).await?.is_none() {
            return Ok(MiddlewareOutput::default());
        }

        Ok(MiddlewareOutput::new().with_instruction(Instruction {
            program_id: PROGRAM_ID,
            accounts: vec![
                AccountMeta::new_readonly(ctx.middleware_account, false),
                AccountMeta::new_readonly(ctx.transaction_account, false),
                AccountMeta::new(create_time, false),
                AccountMeta::new(ctx.authority, false),
            ],
            data: borsh::to_vec(&TimeDelayInstruction::CloseTransaction)?,
        }))
    }
}
