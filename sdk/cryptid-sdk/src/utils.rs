use cryptid_state::{
    CryptidAccount, CryptidStateError, TransactionAccount, CRYPTID_ACCOUNT_SEED,
    CRYPTID_PROGRAM_ID, DID_ACCOUNT_SEED, DID_PROGRAM_ID,
};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::basic::middleware::MiddlewareRegistry;
use crate::core::connection::SolConnection;
use crate::error::{CryptidSdkError, Result, Stage};
use crate::types::{CryptidAccountDetails, Middleware};

const DID_PREFIX: &str = "did:sol:";
const CLUSTERS: [&str; 4] = ["devnet", "testnet", "localnet", "mainnet-beta"];

//=============================================================================
// DID and PDA Derivation Helpers
//=============================================================================

/// Authority key of a `did:sol:[<cluster>:]<base58>` identifier
pub fn parse_did(did: &str) -> Result<Pubkey> {
    let invalid = |reason: &str| CryptidSdkError::AddressDerivation {
        input: did.to_string(),
        reason: reason.to_string(),
    };

    let rest = did
        .strip_prefix(DID_PREFIX)
        .ok_or_else(|| invalid("expected a did:sol identifier"))?;

    let identifier = match rest.split_once(':') {
        Some((cluster, identifier)) => {
            if !CLUSTERS.contains(&cluster) {
                return Err(invalid("unknown cluster"));
            }
            identifier
        },
        None => rest,
    };

    Pubkey::from_str(identifier).map_err(|e| invalid(&e.to_string()))
}

/// `did:sol` identifier of a bare key
pub fn did_for_authority(authority: &Pubkey) -> String {
    format!("{DID_PREFIX}{authority}")
}

/// Derive the DID account PDA under the DID program
pub fn derive_did_account(did: &str) -> Result<(Pubkey, u8)> {
    let authority = parse_did(did)?;
    Ok(Pubkey::find_program_address(
        &[DID_ACCOUNT_SEED, authority.as_ref()],
        &DID_PROGRAM_ID,
    ))
}

/// Derive the Cryptid account PDA for a DID account and index
pub fn derive_cryptid_account(
    did_program: &Pubkey,
    did_account: &Pubkey,
    index: u32,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[
            CRYPTID_ACCOUNT_SEED,
            did_program.as_ref(),
            did_account.as_ref(),
            &index.to_le_bytes(),
        ],
        &CRYPTID_PROGRAM_ID,
    )
}

/// Generative (index 0) Cryptid account of a DID
pub fn default_cryptid_account(did: &str) -> Result<(Pubkey, u8)> {
    let (did_account, _) = derive_did_account(did)?;
    Ok(derive_cryptid_account(&DID_PROGRAM_ID, &did_account, 0))
}

//=============================================================================
// Account Fetching & Parsing
//=============================================================================

pub async fn fetch_transaction_account(
    connection: &dyn SolConnection,
    address: &Pubkey,
    stage: Stage,
) -> Result<Option<TransactionAccount>> {
    let account = connection
        .get_account(address)
        .await
        .map_err(|e| CryptidSdkError::transport(stage, e))?;

    match account {
        Some(account) => Ok(Some(TransactionAccount::load(address, &account.data)?)),
        None => Ok(None),
    }
}

pub async fn fetch_cryptid_account(
    connection: &dyn SolConnection,
    address: &Pubkey,
    stage: Stage,
) -> Result<Option<CryptidAccount>> {
    let account = connection
        .get_account(address)
        .await
        .map_err(|e| CryptidSdkError::transport(stage, e))?;

    match account {
        Some(account) => Ok(Some(CryptidAccount::load(address, &account.data)?)),
        None => Ok(None),
    }
}

/// Read a Cryptid account and resolve its middleware
pub async fn fetch_account_details(
    connection: &dyn SolConnection,
    did: &str,
    index: u32,
    registry: &MiddlewareRegistry,
) -> Result<CryptidAccountDetails> {
    let details = CryptidAccountDetails::derive(did, index, Vec::new())?;

    let Some(stored) = fetch_cryptid_account(connection, &details.address, Stage::Encode).await?
    else {
        if details.is_generative() {
            return Ok(details);
        }
        return Err(CryptidSdkError::AccountNotFound {
            stage: Stage::Encode,
            account: details.address,
        });
    };

    if stored.did != details.did_account || stored.index != index {
        return Err(CryptidStateError::InvalidAccountData {
            account: details.address,
            reason: format!("account belongs to DID account {} index {}", stored.did, stored.index),
        }
        .into());
    }

    let mut middlewares = Vec::with_capacity(stored.middlewares.len());
    for address in stored.middlewares {
        let account = connection
            .get_account(&address)
            .await
            .map_err(|e| CryptidSdkError::transport(Stage::Encode, e))?
            .ok_or(CryptidSdkError::AccountNotFound {
                stage: Stage::Encode,
                account: address,
            })?;

        let is_superuser = registry
            .get(&account.owner)
            .map(|client| client.is_superuser())
            .unwrap_or(false);

        middlewares.push(Middleware {
            address,
            owning_program: account.owner,
            is_superuser,
        });
    }

    Ok(details.with_middlewares(middlewares))
}
