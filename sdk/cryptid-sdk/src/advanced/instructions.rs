use cryptid_state::{
    CryptidInstruction, ExecuteFlags, TransactionAccount, TransactionState, CRYPTID_PROGRAM_ID,
    DID_PROGRAM_ID, MAX_ACCOUNT_TABLE_ENTRIES,
};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;

use crate::advanced::encoder::{
    self, layer_account, EncodedTransaction, InstructionEncoder, TableEntry,
};
use crate::advanced::proposal::{self, ProposalOp};
use crate::config::RentPayer;
use crate::error::{CryptidSdkError, EncodingError, Result, Stage};
use crate::types::CryptidAccountDetails;

/// Where `execute` takes the wrapped instructions from
#[derive(Debug, Clone, Copy)]
pub enum ExecuteSource<'a> {
    /// The encoding produced when proposing, still held by the caller
    Precomputed(&'a EncodedTransaction),
    /// The proposal as read back from the ledger
    Stored(&'a TransactionAccount),
}

/// Builds the Cryptid program instructions for one account.
///
/// `controllers` arguments are controller DID accounts, outermost first.
pub struct CryptidTransactionBuilder<'a> {
    details: &'a CryptidAccountDetails,
    rent_payer: RentPayer,
    debug: bool,
    allow_unauthorized: bool,
}

impl<'a> CryptidTransactionBuilder<'a> {
    pub fn new(details: &'a CryptidAccountDetails) -> Self {
        Self {
            details,
            rent_payer: RentPayer::default(),
            debug: false,
            allow_unauthorized: false,
        }
    }

    pub fn with_rent_payer(mut self, rent_payer: RentPayer) -> Self {
        self.rent_payer = rent_payer;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Let a signer that is not on the DID act, pending superuser approval
    pub fn with_allow_unauthorized(mut self, allow_unauthorized: bool) -> Self {
        self.allow_unauthorized = allow_unauthorized;
        self
    }

    fn flags(&self) -> ExecuteFlags {
        ExecuteFlags::new(self.debug, self.allow_unauthorized)
    }

    fn instruction(&self, accounts: Vec<AccountMeta>, data: &CryptidInstruction) -> Instruction {
        tracing::debug!(
            instruction = data.name(),
            cryptid_account = %self.details.address,
            accounts = accounts.len(),
            "built cryptid instruction"
        );
        Instruction {
            program_id: CRYPTID_PROGRAM_ID,
            accounts,
            data: data.pack(),
        }
    }

    /// Accounts 0..=3 with the layout's fixed flags
    fn fixed_accounts(&self, authority: &Pubkey, authority_writable: bool) -> Vec<AccountMeta> {
        vec![
            AccountMeta::new(self.details.address, false),
            AccountMeta::new_readonly(self.details.did_account, false),
            AccountMeta::new_readonly(DID_PROGRAM_ID, false),
            AccountMeta {
                pubkey: *authority,
                is_signer: true,
                is_writable: authority_writable,
            },
        ]
    }

    /// Wrap `instructions` into one `DirectExecute`
    pub fn direct_execute(
        &self,
        authority: &Pubkey,
        instructions: &[Instruction],
        controllers: &[Pubkey],
    ) -> Result<Instruction> {
        let named = self.details.named_accounts(TableEntry::Concrete(*authority));
        let encoded = encoder::encode(named, instructions, controllers)
            .map_err(|e| CryptidSdkError::encoding(Stage::Encode, e))?;
        let accounts = encoded
            .account_metas()
            .map_err(|e| CryptidSdkError::encoding(Stage::Encode, e))?;

        let data = CryptidInstruction::DirectExecute {
            controller_chain: encoded.controller_chain,
            instructions: encoded.instructions,
            seeds: self.details.seeds(),
            flags: self.flags(),
        };
        Ok(self.instruction(accounts, &data))
    }

    /// Store `instructions` in the fresh account `transaction_account`.
    ///
    /// The signer slot stays reserved: whoever executes fills it.
    pub fn propose(
        &self,
        authority: &Pubkey,
        transaction_account: &Pubkey,
        instructions: &[Instruction],
        state: TransactionState,
        controllers: &[Pubkey],
    ) -> Result<(Instruction, EncodedTransaction)> {
        if state == TransactionState::Executed {
            return Err(CryptidSdkError::UnsupportedOption {
                option: "state",
                value: state.to_string(),
            });
        }

        let named = self.details.named_accounts(TableEntry::Reserved);
        let encoded = encoder::encode(named, instructions, controllers)
            .map_err(|e| CryptidSdkError::encoding(Stage::Propose, e))?;

        let mut accounts = self.fixed_accounts(authority, true);
        accounts.push(self.rent_payer_meta(authority));
        accounts.push(AccountMeta::new(*transaction_account, true));
        accounts.push(AccountMeta::new_readonly(system_program::id(), false));
        accounts.extend(record_only(&encoded.account_table));

        let data = CryptidInstruction::ProposeTransaction {
            controller_chain: encoded.controller_chain.clone(),
            seeds: self.details.seeds(),
            state,
            allow_unauthorized: self.allow_unauthorized,
            instructions: encoded.instructions.clone(),
            num_accounts: encoded.account_table.len() as u8,
        };
        Ok((self.instruction(accounts, &data), encoded))
    }

    /// Append `more` to a stored `NotReady` proposal
    pub fn extend(
        &self,
        authority: &Pubkey,
        transaction_account: &Pubkey,
        stored: &TransactionAccount,
        more: &[Instruction],
        controllers: &[Pubkey],
    ) -> Result<(Instruction, EncodedTransaction)> {
        proposal::check(ProposalOp::Extend, transaction_account, stored.state)?;

        let named = self.details.named_accounts(TableEntry::Reserved);
        let mut encoder =
            InstructionEncoder::with_existing(named, &stored.account_table, &stored.instructions)
                .map_err(|e| CryptidSdkError::encoding(Stage::Propose, e))?;
        encoder
            .push_all(more)
            .map_err(|e| CryptidSdkError::encoding(Stage::Propose, e))?;
        let encoded = encoder.finish();

        let mut accounts = self.fixed_accounts(authority, true);
        accounts.push(AccountMeta::new(*transaction_account, false));
        accounts.extend(record_only(encoded.new_entries()));
        accounts.extend(record_only(controllers));

        let data = CryptidInstruction::ExtendTransaction {
            controller_chain: sequential(controllers.len()),
            seeds: self.details.seeds(),
            allow_unauthorized: self.allow_unauthorized,
            instructions: encoded.instructions.clone(),
            num_accounts: encoded.new_entries().len() as u8,
        };
        Ok((self.instruction(accounts, &data), encoded))
    }

    /// Freeze a stored proposal
    pub fn seal(
        &self,
        authority: &Pubkey,
        transaction_account: &Pubkey,
        stored: &TransactionAccount,
        controllers: &[Pubkey],
    ) -> Result<Instruction> {
        proposal::check(ProposalOp::Seal, transaction_account, stored.state)?;

        let mut accounts = self.fixed_accounts(authority, true);
        accounts.push(AccountMeta::new(*transaction_account, false));
        accounts.extend(record_only(controllers));

        let data = CryptidInstruction::SealTransaction {
            controller_chain: sequential(controllers.len()),
            seeds: self.details.seeds(),
            allow_unauthorized: self.allow_unauthorized,
        };
        Ok(self.instruction(accounts, &data))
    }

    /// Execute a `Ready` proposal. The rent of the transaction account goes
    /// to `destination`. `extra_accounts` (middleware accounts) are layered
    /// after the stored table.
    pub fn execute(
        &self,
        authority: &Pubkey,
        transaction_account: &Pubkey,
        destination: &Pubkey,
        source: ExecuteSource<'_>,
        extra_accounts: &[AccountMeta],
        controllers: &[Pubkey],
    ) -> Result<Instruction> {
        let named = self.details.named_accounts(TableEntry::Concrete(*authority));
        let encoded = match source {
            ExecuteSource::Stored(stored) => {
                proposal::check(ProposalOp::Execute, transaction_account, stored.state)?;
                EncodedTransaction::from_stored(
                    named,
                    stored.account_table.clone(),
                    stored.instructions.clone(),
                )
                .map_err(|e| CryptidSdkError::encoding(Stage::Execute, e))?
            },
            ExecuteSource::Precomputed(encoded) => EncodedTransaction {
                named,
                ..encoded.clone()
            },
        };

        let mut table = encoded.table_metas();
        for meta in extra_accounts {
            layer_account(&mut table, meta.clone());
        }
        for controller in controllers {
            layer_account(&mut table, AccountMeta::new_readonly(*controller, false));
        }
        if let Some(first_over) = table.get(MAX_ACCOUNT_TABLE_ENTRIES) {
            return Err(CryptidSdkError::encoding(
                Stage::Execute,
                EncodingError::TableOverflow {
                    pubkey: first_over.pubkey,
                    max: MAX_ACCOUNT_TABLE_ENTRIES,
                },
            ));
        }
        let controller_chain = controllers
            .iter()
            .filter_map(|c| table.iter().position(|m| m.pubkey == *c))
            .map(|i| {
                u8::try_from(i).map_err(|_| {
                    CryptidSdkError::encoding(
                        Stage::Execute,
                        EncodingError::TableOverflow {
                            pubkey: table[i].pubkey,
                            max: MAX_ACCOUNT_TABLE_ENTRIES,
                        },
                    )
                })
            })
            .collect::<Result<Vec<u8>>>()?;

        let mut accounts = self.fixed_accounts(authority, true);
        accounts.push(AccountMeta::new(*destination, false));
        accounts.push(AccountMeta::new(*transaction_account, false));
        accounts.extend(table);

        let data = CryptidInstruction::ExecuteTransaction {
            controller_chain,
            seeds: self.details.seeds(),
            flags: self.flags(),
        };
        Ok(self.instruction(accounts, &data))
    }

    /// Reclaim the transaction account's rent to `destination`
    pub fn close(
        &self,
        authority: &Pubkey,
        transaction_account: &Pubkey,
        destination: &Pubkey,
        controllers: &[Pubkey],
    ) -> Instruction {
        let mut accounts = self.fixed_accounts(authority, false);
        accounts.push(AccountMeta::new(*destination, false));
        accounts.push(AccountMeta::new(*transaction_account, false));
        accounts.extend(record_only(controllers));

        let data = CryptidInstruction::CloseTransaction {
            controller_chain: sequential(controllers.len()),
            seeds: self.details.seeds(),
        };
        self.instruction(accounts, &data)
    }

    /// Initialize the (non-generative) account described by the details
    pub fn create_cryptid_account(
        &self,
        payer: &Pubkey,
        authority: &Pubkey,
        controllers: &[Pubkey],
    ) -> Result<Instruction> {
        self.details.ensure_creatable()?;

        let mut accounts = vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(self.details.address, false),
            AccountMeta::new_readonly(self.details.did_account, false),
            AccountMeta::new_readonly(DID_PROGRAM_ID, false),
            AccountMeta::new_readonly(*authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ];
        accounts.extend(record_only(controllers));

        let data = CryptidInstruction::CreateCryptidAccount {
            index: self.details.index,
            did_account_bump: self.details.did_account_bump,
            controller_chain: sequential(controllers.len()),
            middlewares: self.details.middlewares.iter().map(|m| m.address).collect(),
        };
        Ok(self.instruction(accounts, &data))
    }

    fn rent_payer_meta(&self, authority: &Pubkey) -> AccountMeta {
        match self.rent_payer {
            RentPayer::SignerPays => AccountMeta::new(*authority, true),
            RentPayer::DidPays => AccountMeta::new(self.details.address, false),
        }
    }
}

/// Keys passed only to be recorded, not accessed
fn record_only(keys: &[Pubkey]) -> impl Iterator<Item = AccountMeta> + '_ {
    keys.iter().map(|key| AccountMeta::new_readonly(*key, false))
}

fn sequential(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}
