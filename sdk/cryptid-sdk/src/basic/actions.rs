//! Multi-transaction execution of instruction sets too large for one
//! direct-execute transaction.
//!
//! The instructions are split greedily into a `propose` and as many `extend`
//! chunks as needed, each sized to fit one transaction. The proposal is then
//! sealed and executed. The transaction-account keypair belongs to the action,
//! so a failed run can be retried and resumes from what the ledger already
//! holds.

use cryptid_state::{TransactionAccount, TransactionState};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use std::sync::Arc;

use crate::advanced::encoder::EncodedTransaction;
use crate::basic::client::{ComposedTransaction, Cryptid};
use crate::error::{CryptidSdkError, EncodingError, Result, Stage};
use crate::utils;

pub struct ProposeAndExecute {
    transaction_account: Arc<Keypair>,
    chunks: Vec<Vec<Instruction>>,
    execute_attempted: bool,
}

impl ProposeAndExecute {
    pub fn new(client: &Cryptid, instructions: Vec<Instruction>) -> Result<Self> {
        Self::with_keypair(client, Arc::new(Keypair::new()), instructions)
    }

    pub fn with_keypair(
        client: &Cryptid,
        transaction_account: Arc<Keypair>,
        instructions: Vec<Instruction>,
    ) -> Result<Self> {
        let chunks = plan_chunks(client, &transaction_account.pubkey(), instructions)?;
        tracing::debug!(
            transaction_account = %transaction_account.pubkey(),
            chunks = chunks.len(),
            "planned proposal"
        );
        Ok(Self {
            transaction_account,
            chunks,
            execute_attempted: false,
        })
    }

    pub fn transaction_account(&self) -> Pubkey {
        self.transaction_account.pubkey()
    }

    /// Instruction groups: the first is proposed, the rest extend it
    pub fn chunks(&self) -> &[Vec<Instruction>] {
        &self.chunks
    }

    /// Drive the proposal to execution. Steps already on the ledger are
    /// skipped. Once an execute has been submitted, further runs are refused.
    pub async fn run(&mut self, client: &Cryptid) -> Result<Signature> {
        let address = self.transaction_account();
        if self.execute_attempted {
            return Err(CryptidSdkError::ReplayRefused { account: address });
        }

        let stored =
            utils::fetch_transaction_account(client.connection(), &address, Stage::Propose).await?;

        let (mut done, mut state) = match stored {
            None => {
                let state = if self.chunks.len() == 1 {
                    TransactionState::Ready
                } else {
                    TransactionState::NotReady
                };
                client
                    .propose_with_keypair(self.transaction_account.clone(), &self.chunks[0], state)
                    .await?;
                (1, state)
            },
            Some(stored) => (self.chunks_on_ledger(&stored), stored.state),
        };

        if state == TransactionState::NotReady {
            while done < self.chunks.len() {
                client.extend(&address, &self.chunks[done]).await?;
                done += 1;
            }
            client.seal(&address).await?;
            state = TransactionState::Ready;
        }

        tracing::debug!(transaction_account = %address, %state, "proposal ready, executing");
        self.execute_attempted = true;
        client.execute(&address).await
    }

    /// Number of leading chunks whose instructions are already stored
    fn chunks_on_ledger(&self, stored: &TransactionAccount) -> usize {
        let mut total = 0;
        let mut done = 0;
        for chunk in &self.chunks {
            if total + chunk.len() > stored.instructions.len() {
                break;
            }
            total += chunk.len();
            done += 1;
        }
        done
    }
}

/// Split `instructions` so every propose/extend transaction fits the size
/// budget. Fails if a single instruction cannot fit on its own.
fn plan_chunks(
    client: &Cryptid,
    transaction_account: &Pubkey,
    instructions: Vec<Instruction>,
) -> Result<Vec<Vec<Instruction>>> {
    let limit = client.config().transaction_size_limit;
    let mut chunks: Vec<Vec<Instruction>> = Vec::new();
    let mut stored: Option<TransactionAccount> = None;
    let mut current: Vec<Instruction> = Vec::new();

    for ix in instructions {
        current.push(ix);
        let (size, _) = measure(client, transaction_account, stored.as_ref(), &current)?;
        if size <= limit {
            continue;
        }

        let Some(overflow) = current.pop() else {
            continue;
        };
        if current.is_empty() {
            return Err(CryptidSdkError::encoding(
                Stage::Propose,
                EncodingError::TransactionTooLarge { size, limit },
            ));
        }

        let (_, encoded) = measure(client, transaction_account, stored.as_ref(), &current)?;
        stored = Some(simulate_stored(client, stored, encoded));
        chunks.push(std::mem::take(&mut current));

        current.push(overflow);
        let (size, _) = measure(client, transaction_account, stored.as_ref(), &current)?;
        if size > limit {
            return Err(CryptidSdkError::encoding(
                Stage::Propose,
                EncodingError::TransactionTooLarge { size, limit },
            ));
        }
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// Size of the propose (or extend, once something is stored) transaction
/// carrying `chunk`
fn measure(
    client: &Cryptid,
    transaction_account: &Pubkey,
    stored: Option<&TransactionAccount>,
    chunk: &[Instruction],
) -> Result<(usize, EncodedTransaction)> {
    let builder = client.transaction_builder();
    let authority = client.signer_key();
    let controllers = client.additional_keys();

    let (ix, encoded) = match stored {
        None => builder.propose(
            &authority,
            transaction_account,
            chunk,
            TransactionState::NotReady,
            &controllers,
        )?,
        Some(stored) => {
            builder.extend(&authority, transaction_account, stored, chunk, &controllers)?
        },
    };

    let composed = ComposedTransaction::new(vec![ix], client.capabilities().signer.clone());
    Ok((composed.size(), encoded))
}

/// What the ledger will hold after the chunk behind `encoded` lands
fn simulate_stored(
    client: &Cryptid,
    stored: Option<TransactionAccount>,
    encoded: EncodedTransaction,
) -> TransactionAccount {
    match stored {
        None => TransactionAccount {
            cryptid_account: client.address(),
            owner_did: client.details().did_account,
            account_table: encoded.account_table,
            instructions: encoded.instructions,
            approved_middleware: None,
            state: TransactionState::NotReady,
        },
        Some(mut stored) => {
            stored.account_table = encoded.account_table;
            stored.instructions.extend(encoded.instructions);
            stored
        },
    }
}
