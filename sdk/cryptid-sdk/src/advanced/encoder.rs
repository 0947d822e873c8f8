//! Account-table encoding for wrapped instructions.
//!
//! Every pubkey an instruction touches is collected once into a table and the
//! instructions are rewritten to point at table positions. Keys the wrapping
//! instruction always supplies (the Cryptid account, its DID account, the DID
//! program and the signer) are addressed through named slots instead and never
//! occupy a dynamic entry, so the full one-byte range of 255 entries stays
//! available to instruction accounts.
//!
//! Access flags are accumulated per key with OR, so the table-level flags are
//! independent of instruction order. Instruction-level metas keep exactly the
//! flags they were declared with.

use cryptid_state::{
    AbbreviatedAccountMeta, AbbreviatedInstructionData, AccountIndex, NamedAccount,
    MAX_ACCOUNT_TABLE_ENTRIES,
};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};

use crate::error::EncodingError;

/// Content of a named slot. The signer of a proposal is not known until
/// execution, so its slot can stay `Reserved` while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableEntry {
    Reserved,
    Concrete(Pubkey),
}

impl TableEntry {
    pub fn key(&self) -> Option<Pubkey> {
        match self {
            TableEntry::Reserved => None,
            TableEntry::Concrete(key) => Some(*key),
        }
    }
}

/// Keys behind the four named slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedAccounts {
    pub cryptid_account: Pubkey,
    pub did_account: Pubkey,
    pub did_program: Pubkey,
    pub signer: TableEntry,
}

impl NamedAccounts {
    pub fn entry(&self, account: NamedAccount) -> TableEntry {
        match account {
            NamedAccount::CryptidAccount => TableEntry::Concrete(self.cryptid_account),
            NamedAccount::DidAccount => TableEntry::Concrete(self.did_account),
            NamedAccount::DidProgram => TableEntry::Concrete(self.did_program),
            NamedAccount::Signer => self.signer,
        }
    }

    /// Named slot holding `key`, if any
    pub fn lookup(&self, key: &Pubkey) -> Option<NamedAccount> {
        NamedAccount::ALL
            .into_iter()
            .find(|account| self.entry(*account).key().as_ref() == Some(key))
    }

    pub fn with_signer(mut self, signer: Pubkey) -> Self {
        self.signer = TableEntry::Concrete(signer);
        self
    }

    fn resolve(&self, account: NamedAccount) -> Result<Pubkey, EncodingError> {
        self.entry(account)
            .key()
            .ok_or(EncodingError::UnresolvedSigner)
    }
}

/// Access permissions of one key. Merging is a bitwise OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessFlags {
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccessFlags {
    pub const fn new(is_signer: bool, is_writable: bool) -> Self {
        Self {
            is_signer,
            is_writable,
        }
    }

    pub fn merge(self, other: AccessFlags) -> Self {
        Self {
            is_signer: self.is_signer || other.is_signer,
            is_writable: self.is_writable || other.is_writable,
        }
    }

    fn of(meta: &AccountMeta) -> Self {
        Self::new(meta.is_signer, meta.is_writable)
    }
}

/// Flags the named slots start from, in slot order
pub const NAMED_BASE_FLAGS: [AccessFlags; 4] = [
    AccessFlags::new(false, true),
    AccessFlags::new(false, false),
    AccessFlags::new(false, false),
    AccessFlags::new(true, true),
];

/// Widen a named slot's flags. The Cryptid account is a program-derived
/// address and never signs at the table level.
fn merge_named(flags: &mut [AccessFlags; 4], account: NamedAccount, with: AccessFlags) {
    let slot = account.slot();
    flags[slot] = flags[slot].merge(with);
    if account == NamedAccount::CryptidAccount {
        flags[slot].is_signer = false;
    }
}

/// A controller DID account placed in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerReference {
    pub table_index: u8,
    pub authority_key: Pubkey,
}

/// Incremental encoder. Feed instructions with [`InstructionEncoder::push`],
/// then controllers, then [`InstructionEncoder::finish`].
#[derive(Debug, Clone)]
pub struct InstructionEncoder {
    named: NamedAccounts,
    named_flags: [AccessFlags; 4],
    table: Vec<Pubkey>,
    table_flags: Vec<AccessFlags>,
    positions: HashMap<Pubkey, u8>,
    existing: usize,
    instructions: Vec<AbbreviatedInstructionData>,
    controller_chain: Vec<u8>,
}

impl InstructionEncoder {
    pub fn new(named: NamedAccounts) -> Self {
        Self {
            named,
            named_flags: NAMED_BASE_FLAGS,
            table: Vec::new(),
            table_flags: Vec::new(),
            positions: HashMap::new(),
            existing: 0,
            instructions: Vec::new(),
            controller_chain: Vec::new(),
        }
    }

    /// Continue a stored table. Stored entries keep their indices; only new
    /// keys are appended.
    pub fn with_existing(
        named: NamedAccounts,
        stored_table: &[Pubkey],
        stored_instructions: &[AbbreviatedInstructionData],
    ) -> Result<Self, EncodingError> {
        let stored = EncodedTransaction::from_stored(
            named,
            stored_table.to_vec(),
            stored_instructions.to_vec(),
        )?;

        let positions = stored
            .account_table
            .iter()
            .enumerate()
            .map(|(i, key)| (*key, i as u8))
            .collect();

        Ok(Self {
            named,
            named_flags: stored.named_flags,
            existing: stored.account_table.len(),
            table: stored.account_table,
            table_flags: stored.table_flags,
            positions,
            instructions: Vec::new(),
            controller_chain: Vec::new(),
        })
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Encode one instruction. On error the encoder is left unchanged.
    pub fn push(&mut self, ix: &Instruction) -> Result<(), EncodingError> {
        self.check_capacity(ix)?;

        let program_index = self.reference(ix.program_id, AccessFlags::default())?;
        let mut accounts = Vec::with_capacity(ix.accounts.len());
        for meta in &ix.accounts {
            let index = self.reference(meta.pubkey, AccessFlags::of(meta))?;
            accounts.push(AbbreviatedAccountMeta {
                index,
                is_signer: meta.is_signer,
                is_writable: meta.is_writable,
            });
        }

        self.instructions.push(AbbreviatedInstructionData {
            program_index,
            accounts,
            data: ix.data.clone(),
        });
        Ok(())
    }

    pub fn push_all<'a>(
        &mut self,
        instructions: impl IntoIterator<Item = &'a Instruction>,
    ) -> Result<(), EncodingError> {
        for ix in instructions {
            self.push(ix)?;
        }
        Ok(())
    }

    /// Place controller DID accounts after the instruction accounts.
    ///
    /// A controller already in the table is reused as is; its flags are not
    /// widened.
    pub fn append_controllers(
        &mut self,
        controllers: &[Pubkey],
    ) -> Result<Vec<ControllerReference>, EncodingError> {
        let mut references = Vec::with_capacity(controllers.len());
        for key in controllers {
            if self.named.lookup(key).is_some() {
                return Err(EncodingError::NamedController { pubkey: *key });
            }
            let table_index = match self.positions.get(key) {
                Some(index) => *index,
                None => self.insert(*key, AccessFlags::default())?,
            };
            self.controller_chain.push(table_index);
            references.push(ControllerReference {
                table_index,
                authority_key: *key,
            });
        }
        Ok(references)
    }

    pub fn finish(self) -> EncodedTransaction {
        EncodedTransaction {
            named: self.named,
            named_flags: self.named_flags,
            account_table: self.table,
            table_flags: self.table_flags,
            instructions: self.instructions,
            controller_chain: self.controller_chain,
            existing: self.existing,
        }
    }

    fn check_capacity(&self, ix: &Instruction) -> Result<(), EncodingError> {
        let mut seen = HashSet::new();
        let fresh: Vec<Pubkey> = std::iter::once(ix.program_id)
            .chain(ix.accounts.iter().map(|meta| meta.pubkey))
            .filter(|key| self.named.lookup(key).is_none() && !self.positions.contains_key(key))
            .filter(|key| seen.insert(*key))
            .collect();

        let room = MAX_ACCOUNT_TABLE_ENTRIES.saturating_sub(self.table.len());
        match fresh.get(room) {
            Some(pubkey) => Err(EncodingError::TableOverflow {
                pubkey: *pubkey,
                max: MAX_ACCOUNT_TABLE_ENTRIES,
            }),
            None => Ok(()),
        }
    }

    fn reference(
        &mut self,
        key: Pubkey,
        flags: AccessFlags,
    ) -> Result<AccountIndex, EncodingError> {
        if let Some(account) = self.named.lookup(&key) {
            merge_named(&mut self.named_flags, account, flags);
            return Ok(AccountIndex::Named(account));
        }

        if let Some(index) = self.positions.get(&key) {
            let slot = *index as usize;
            self.table_flags[slot] = self.table_flags[slot].merge(flags);
            return Ok(AccountIndex::Table(*index));
        }

        self.insert(key, flags).map(AccountIndex::Table)
    }

    fn insert(&mut self, key: Pubkey, flags: AccessFlags) -> Result<u8, EncodingError> {
        if self.table.len() >= MAX_ACCOUNT_TABLE_ENTRIES {
            return Err(EncodingError::TableOverflow {
                pubkey: key,
                max: MAX_ACCOUNT_TABLE_ENTRIES,
            });
        }
        let index = self.table.len() as u8;
        self.table.push(key);
        self.table_flags.push(flags);
        self.positions.insert(key, index);
        Ok(index)
    }
}

/// Output of the encoder, or a stored proposal ready to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTransaction {
    pub named: NamedAccounts,
    /// Merged flags of the named slots, in slot order
    pub named_flags: [AccessFlags; 4],
    pub account_table: Vec<Pubkey>,
    /// Merged flags of the table entries, parallel to `account_table`
    pub table_flags: Vec<AccessFlags>,
    pub instructions: Vec<AbbreviatedInstructionData>,
    /// Table indices of the controller DID accounts, outermost first
    pub controller_chain: Vec<u8>,
    /// Number of leading table entries that were already stored
    pub existing: usize,
}

impl EncodedTransaction {
    /// Rebuild from a stored table. Fails on tables past the one-byte bound
    /// and on references past the table end.
    pub fn from_stored(
        named: NamedAccounts,
        account_table: Vec<Pubkey>,
        instructions: Vec<AbbreviatedInstructionData>,
    ) -> Result<Self, EncodingError> {
        if account_table.len() > MAX_ACCOUNT_TABLE_ENTRIES {
            return Err(EncodingError::StoredTableTooLarge {
                len: account_table.len(),
                max: MAX_ACCOUNT_TABLE_ENTRIES,
            });
        }

        let mut named_flags = NAMED_BASE_FLAGS;
        let mut table_flags = vec![AccessFlags::default(); account_table.len()];

        for ix in &instructions {
            let flags = std::iter::once(AccessFlags::default()).chain(
                ix.accounts
                    .iter()
                    .map(|meta| AccessFlags::new(meta.is_signer, meta.is_writable)),
            );
            for (index, flags) in ix.references().zip(flags) {
                match index {
                    AccountIndex::Named(account) => merge_named(&mut named_flags, account, flags),
                    AccountIndex::Table(i) => {
                        let slot = table_flags.get_mut(i as usize).ok_or(
                            EncodingError::UnresolvedIndex {
                                index: i,
                                len: account_table.len(),
                            },
                        )?;
                        *slot = slot.merge(flags);
                    },
                }
            }
        }

        Ok(Self {
            named,
            named_flags,
            existing: account_table.len(),
            account_table,
            table_flags,
            instructions,
            controller_chain: Vec::new(),
        })
    }

    /// Named slot metas with merged flags. Requires a concrete signer.
    pub fn named_metas(&self) -> Result<Vec<AccountMeta>, EncodingError> {
        NamedAccount::ALL
            .into_iter()
            .map(|account| {
                let key = self.named.resolve(account)?;
                Ok(meta(key, self.named_flags[account.slot()]))
            })
            .collect()
    }

    pub fn table_metas(&self) -> Vec<AccountMeta> {
        self.account_table
            .iter()
            .zip(&self.table_flags)
            .map(|(key, flags)| meta(*key, *flags))
            .collect()
    }

    /// Named slots followed by the table: the account list the verifier walks
    pub fn account_metas(&self) -> Result<Vec<AccountMeta>, EncodingError> {
        let mut metas = self.named_metas()?;
        metas.extend(self.table_metas());
        Ok(metas)
    }

    /// Entries appended on top of the stored table
    pub fn new_entries(&self) -> &[Pubkey] {
        &self.account_table[self.existing..]
    }

    pub fn new_entry_metas(&self) -> Vec<AccountMeta> {
        self.table_metas().split_off(self.existing)
    }

    /// Expand the abbreviated instructions back into full instructions
    pub fn decode_instructions(&self) -> Result<Vec<Instruction>, EncodingError> {
        self.instructions
            .iter()
            .map(|ix| {
                let accounts = ix
                    .accounts
                    .iter()
                    .map(|m| {
                        Ok(AccountMeta {
                            pubkey: self.resolve(m.index)?,
                            is_signer: m.is_signer,
                            is_writable: m.is_writable,
                        })
                    })
                    .collect::<Result<Vec<_>, EncodingError>>()?;
                Ok(Instruction {
                    program_id: self.resolve(ix.program_index)?,
                    accounts,
                    data: ix.data.clone(),
                })
            })
            .collect()
    }

    pub fn resolve(&self, index: AccountIndex) -> Result<Pubkey, EncodingError> {
        match index {
            AccountIndex::Named(account) => self.named.resolve(account),
            AccountIndex::Table(i) => self.account_table.get(i as usize).copied().ok_or(
                EncodingError::UnresolvedIndex {
                    index: i,
                    len: self.account_table.len(),
                },
            ),
        }
    }
}

/// Encode `instructions` in order, then place `controllers`.
pub fn encode(
    named: NamedAccounts,
    instructions: &[Instruction],
    controllers: &[Pubkey],
) -> Result<EncodedTransaction, EncodingError> {
    let mut encoder = InstructionEncoder::new(named);
    encoder.push_all(instructions)?;
    encoder.append_controllers(controllers)?;
    Ok(encoder.finish())
}

/// Add an execute-time account: widen the flags of an existing entry for the
/// same key, otherwise append.
pub fn layer_account(metas: &mut Vec<AccountMeta>, account: AccountMeta) {
    match metas.iter_mut().find(|m| m.pubkey == account.pubkey) {
        Some(existing) => {
            existing.is_signer |= account.is_signer;
            existing.is_writable |= account.is_writable;
        },
        None => metas.push(account),
    }
}

fn meta(pubkey: Pubkey, flags: AccessFlags) -> AccountMeta {
    AccountMeta {
        pubkey,
        is_signer: flags.is_signer,
        is_writable: flags.is_writable,
    }
}
