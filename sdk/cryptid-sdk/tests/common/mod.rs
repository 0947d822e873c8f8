#![allow(dead_code)]

use async_trait::async_trait;
use cryptid_sdk::advanced::encoder::{EncodedTransaction, NamedAccounts, TableEntry};
use cryptid_sdk::basic::middleware::{MiddlewareClient, MiddlewareContext, MiddlewareOutput};
use cryptid_sdk::core::connection::SolConnection;
use cryptid_sdk::state::{
    AbbreviatedInstructionData, CryptidAccount, CryptidInstruction, TransactionAccount,
    TransactionState, CRYPTID_PROGRAM_ID,
};
use cryptid_sdk::{derive_cryptid_account, did_for_authority, Cryptid, CryptidSigner, Stage};
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

type LedgerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    confirmed: HashSet<Signature>,
    submitted: Vec<Transaction>,
    executed: Vec<Instruction>,
    rejected_programs: HashSet<Pubkey>,
    fail_next_send: Option<String>,
}

/// In-memory ledger that understands the Cryptid instruction set.
///
/// Every transaction is signature-checked and applied atomically: either all
/// of its instructions take effect or none do. Instructions for programs other
/// than Cryptid are accepted as no-ops unless the program was rejected with
/// [`MockLedger::reject_program`].
pub struct MockLedger {
    state: Mutex<LedgerState>,
    blockhash: Hash,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            blockhash: Hash::new_unique(),
        }
    }

    pub async fn set_account(&self, pubkey: Pubkey, account: Account) {
        self.state.lock().await.accounts.insert(pubkey, account);
    }

    pub async fn reject_program(&self, program: Pubkey) {
        self.state.lock().await.rejected_programs.insert(program);
    }

    pub async fn fail_next_send(&self, reason: &str) {
        self.state.lock().await.fail_next_send = Some(reason.to_string());
    }

    pub async fn transaction_account(&self, address: &Pubkey) -> Option<TransactionAccount> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(address)
            .and_then(|account| TransactionAccount::load(address, &account.data).ok())
    }

    pub async fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().await.submitted.clone()
    }

    /// Wrapped instructions the ledger has executed, decoded
    pub async fn executed(&self) -> Vec<Instruction> {
        self.state.lock().await.executed.clone()
    }
}

#[async_trait]
impl SolConnection for MockLedger {
    async fn send_transaction(&self, tx: &Transaction) -> LedgerResult<Signature> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.fail_next_send.take() {
            return Err(reason.into());
        }

        tx.verify()?;
        if tx.message.recent_blockhash != self.blockhash {
            return Err("unknown blockhash".into());
        }

        let required = tx.message.header.num_required_signatures as usize;
        let signers = &tx.message.account_keys[..required];
        let mut accounts = state.accounts.clone();
        let mut executed = Vec::new();

        for compiled in &tx.message.instructions {
            let program_id = tx.message.account_keys[compiled.program_id_index as usize];
            if state.rejected_programs.contains(&program_id) {
                return Err(format!("program {program_id} rejected the transaction").into());
            }
            if program_id != CRYPTID_PROGRAM_ID {
                continue;
            }
            let keys: Vec<Pubkey> = compiled
                .accounts
                .iter()
                .map(|i| tx.message.account_keys[*i as usize])
                .collect();
            apply(&mut accounts, &mut executed, signers, &keys, &compiled.data)?;
        }

        let signature = tx.signatures[0];
        state.accounts = accounts;
        state.executed.extend(executed);
        state.confirmed.insert(signature);
        state.submitted.push(tx.clone());
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &Signature) -> LedgerResult<bool> {
        Ok(self.state.lock().await.confirmed.contains(signature))
    }

    async fn get_account(&self, pubkey: &Pubkey) -> LedgerResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(pubkey).cloned())
    }

    async fn get_latest_blockhash(&self) -> LedgerResult<Hash> {
        Ok(self.blockhash)
    }
}

fn program_account<T: borsh::BorshSerialize>(value: &T) -> LedgerResult<Account> {
    Ok(Account {
        lamports: 1_000_000,
        data: borsh::to_vec(value)?,
        owner: CRYPTID_PROGRAM_ID,
        executable: false,
        rent_epoch: 0,
    })
}

fn load_proposal(
    accounts: &HashMap<Pubkey, Account>,
    address: &Pubkey,
) -> LedgerResult<TransactionAccount> {
    let account = accounts
        .get(address)
        .ok_or_else(|| format!("transaction account {address} does not exist"))?;
    Ok(TransactionAccount::load(address, &account.data)?)
}

fn check_indices(
    named: &[Pubkey],
    table: &[Pubkey],
    instructions: &[AbbreviatedInstructionData],
    signer: TableEntry,
) -> LedgerResult<EncodedTransaction> {
    let named = NamedAccounts {
        cryptid_account: named[0],
        did_account: named[1],
        did_program: named[2],
        signer,
    };
    Ok(EncodedTransaction::from_stored(
        named,
        table.to_vec(),
        instructions.to_vec(),
    )?)
}

fn apply(
    accounts: &mut HashMap<Pubkey, Account>,
    executed: &mut Vec<Instruction>,
    signers: &[Pubkey],
    keys: &[Pubkey],
    data: &[u8],
) -> LedgerResult<()> {
    let instruction = CryptidInstruction::unpack(data)?;
    let require_signer = |key: &Pubkey| -> LedgerResult<()> {
        if signers.contains(key) {
            Ok(())
        } else {
            Err(format!("{key} did not sign").into())
        }
    };

    match instruction {
        CryptidInstruction::CreateCryptidAccount {
            index,
            middlewares,
            ..
        } => {
            let address = keys[1];
            if accounts.contains_key(&address) {
                return Err("cryptid account already initialized".into());
            }
            let (expected, bump) = derive_cryptid_account(&keys[3], &keys[2], index);
            if expected != address {
                return Err("cryptid account address mismatch".into());
            }
            require_signer(&keys[4])?;
            let stored = CryptidAccount {
                did: keys[2],
                did_program: keys[3],
                index,
                bump,
                middlewares,
            };
            accounts.insert(address, program_account(&stored)?);
        },
        CryptidInstruction::DirectExecute {
            controller_chain,
            instructions,
            ..
        } => {
            require_signer(&keys[3])?;
            let table = &keys[4..];
            if controller_chain.iter().any(|i| *i as usize >= table.len()) {
                return Err("controller index out of range".into());
            }
            let decoded =
                check_indices(&keys[..3], table, &instructions, TableEntry::Concrete(keys[3]))?;
            executed.extend(decoded.decode_instructions()?);
        },
        CryptidInstruction::ProposeTransaction {
            state,
            instructions,
            num_accounts,
            ..
        } => {
            require_signer(&keys[3])?;
            let address = keys[5];
            require_signer(&address)?;
            if accounts.contains_key(&address) {
                return Err("transaction account already in use".into());
            }
            if state == TransactionState::Executed {
                return Err("cannot propose an executed transaction".into());
            }
            let table = keys
                .get(7..7 + num_accounts as usize)
                .ok_or("missing table accounts")?
                .to_vec();
            check_indices(&keys[..3], &table, &instructions, TableEntry::Reserved)?;
            let stored = TransactionAccount {
                cryptid_account: keys[0],
                owner_did: keys[1],
                account_table: table,
                instructions,
                approved_middleware: None,
                state,
            };
            accounts.insert(address, program_account(&stored)?);
        },
        CryptidInstruction::ExtendTransaction {
            instructions,
            num_accounts,
            ..
        } => {
            require_signer(&keys[3])?;
            let address = keys[4];
            let mut stored = load_proposal(accounts, &address)?;
            if stored.state != TransactionState::NotReady {
                return Err(format!("cannot extend in state {}", stored.state).into());
            }
            let new_entries = keys
                .get(5..5 + num_accounts as usize)
                .ok_or("missing table accounts")?;
            stored.account_table.extend_from_slice(new_entries);
            stored.instructions.extend(instructions);
            check_indices(
                &keys[..3],
                &stored.account_table,
                &stored.instructions,
                TableEntry::Reserved,
            )?;
            accounts.insert(address, program_account(&stored)?);
        },
        CryptidInstruction::SealTransaction { .. } => {
            require_signer(&keys[3])?;
            let address = keys[4];
            let mut stored = load_proposal(accounts, &address)?;
            if !stored.state.can_advance_to(TransactionState::Ready) {
                return Err(format!("cannot seal in state {}", stored.state).into());
            }
            stored.state = TransactionState::Ready;
            accounts.insert(address, program_account(&stored)?);
        },
        CryptidInstruction::ExecuteTransaction { .. } => {
            require_signer(&keys[3])?;
            let address = keys[5];
            let mut stored = load_proposal(accounts, &address)?;
            if stored.state != TransactionState::Ready {
                return Err(format!("cannot execute in state {}", stored.state).into());
            }
            if stored.cryptid_account != keys[0] {
                return Err("proposal belongs to another cryptid account".into());
            }
            let remaining = &keys[6..];
            if !remaining.starts_with(&stored.account_table) {
                return Err("account table mismatch".into());
            }
            let decoded = check_indices(
                &keys[..3],
                &stored.account_table,
                &stored.instructions,
                TableEntry::Concrete(keys[3]),
            )?;
            executed.extend(decoded.decode_instructions()?);
            stored.state = TransactionState::Executed;
            accounts.insert(address, program_account(&stored)?);
        },
        CryptidInstruction::CloseTransaction { .. } => {
            require_signer(&keys[3])?;
            let address = keys[5];
            load_proposal(accounts, &address)?;
            accounts.remove(&address);
        },
    }
    Ok(())
}

/// Middleware client that emits one marker instruction per hook and records
/// the stages it was called for
pub struct RecordingMiddleware {
    pub program: Pubkey,
    pub tag: u8,
    pub calls: std::sync::Mutex<Vec<Stage>>,
    pub extra_signer: Option<Arc<Keypair>>,
    /// Zero bytes appended after the marker
    pub padding: usize,
}

impl RecordingMiddleware {
    pub fn new(tag: u8) -> Self {
        Self {
            program: Pubkey::new_unique(),
            tag,
            calls: std::sync::Mutex::new(Vec::new()),
            extra_signer: None,
            padding: 0,
        }
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_signer(mut self, signer: Arc<Keypair>) -> Self {
        self.extra_signer = Some(signer);
        self
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    fn output(&self, stage: Stage, ctx: &MiddlewareContext<'_>) -> MiddlewareOutput {
        self.calls.lock().unwrap().push(stage);
        let mut accounts = vec![
            AccountMeta::new_readonly(ctx.middleware_account, false),
            AccountMeta::new_readonly(ctx.transaction_account, false),
        ];
        if let Some(signer) = &self.extra_signer {
            accounts.push(AccountMeta::new_readonly(Signer::pubkey(signer.as_ref()), true));
        }
        let mut data = marker(self.tag, stage);
        data.resize(data.len() + self.padding, 0);
        let mut output = MiddlewareOutput::new().with_instruction(Instruction {
            program_id: self.program,
            accounts,
            data,
        });
        if let Some(signer) = &self.extra_signer {
            output = output.with_signer(signer.clone() as Arc<dyn CryptidSigner>);
        }
        output
    }
}

pub fn marker(tag: u8, stage: Stage) -> Vec<u8> {
    let stage = match stage {
        Stage::Encode => 0,
        Stage::Propose => 1,
        Stage::Execute => 2,
        Stage::Close => 3,
    };
    vec![tag, stage]
}

#[async_trait]
impl MiddlewareClient for RecordingMiddleware {
    async fn on_propose(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, Box<dyn Error + Send + Sync>> {
        Ok(self.output(Stage::Propose, ctx))
    }

    async fn on_execute(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, Box<dyn Error + Send + Sync>> {
        Ok(self.output(Stage::Execute, ctx))
    }

    async fn on_close(
        &self,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, Box<dyn Error + Send + Sync>> {
        Ok(self.output(Stage::Close, ctx))
    }
}

/// Middleware client whose execute hook always refuses
pub struct FailingMiddleware;

#[async_trait]
impl MiddlewareClient for FailingMiddleware {
    async fn on_execute(
        &self,
        _ctx: &MiddlewareContext<'_>,
    ) -> Result<MiddlewareOutput, Box<dyn Error + Send + Sync>> {
        Err("recipient not allowed".into())
    }
}

pub struct TestContext {
    pub ledger: Arc<MockLedger>,
    pub authority: Arc<Keypair>,
    pub did: String,
}

impl TestContext {
    pub fn new() -> Self {
        let authority = Arc::new(Keypair::new());
        let did = did_for_authority(&Signer::pubkey(authority.as_ref()));
        Self {
            ledger: Arc::new(MockLedger::new()),
            authority,
            did,
        }
    }

    pub fn client(&self) -> Cryptid {
        Cryptid::builder(
            self.did.clone(),
            self.authority.clone() as Arc<dyn CryptidSigner>,
            self.ledger.clone() as Arc<dyn SolConnection>,
        )
        .build()
        .unwrap()
    }
}

/// A system-transfer-shaped instruction with distinct accounts
pub fn transfer(from: Pubkey, to: Pubkey, lamports: u64) -> Instruction {
    solana_sdk::system_instruction::transfer(&from, &to, lamports)
}

/// An instruction touching `accounts` fresh keys, for filling tables
pub fn wide_instruction(accounts: usize) -> Instruction {
    Instruction {
        program_id: Pubkey::new_unique(),
        accounts: (0..accounts)
            .map(|_| AccountMeta::new_readonly(Pubkey::new_unique(), false))
            .collect(),
        data: vec![7; 8],
    }
}

pub fn setup_test_context() -> TestContext {
    TestContext::new()
}
