use cryptid_state::{CryptidSeeds, DID_PROGRAM_ID};
use solana_sdk::pubkey::Pubkey;

use crate::advanced::encoder::{NamedAccounts, TableEntry};
use crate::basic::middleware::MiddlewareRegistry;
use crate::core::connection::SolConnection;
use crate::error::{CryptidSdkError, Result};
use crate::utils;

/// A middleware attached to a Cryptid account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Middleware {
    /// Middleware state account
    pub address: Pubkey,

    /// Program that owns the state account; selects the client in the registry
    pub owning_program: Pubkey,

    /// May approve transactions for signers that are not keys on the DID
    pub is_superuser: bool,
}

/// Everything needed to address one Cryptid account.
///
/// A value object: "changing" it means building a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptidAccountDetails {
    /// Cryptid account PDA
    pub address: Pubkey,

    /// Cryptid account PDA bump seed
    pub bump: u8,

    /// Account index; 0 is the generative default account
    pub index: u32,

    /// DID string (`did:sol:...`)
    pub owner_did: String,

    /// DID account PDA
    pub did_account: Pubkey,

    /// DID account PDA bump seed
    pub did_account_bump: u8,

    /// Attached middleware in execution order
    pub middlewares: Vec<Middleware>,
}

impl CryptidAccountDetails {
    /// Derive the addresses for `did` at `index`
    pub fn derive(did: &str, index: u32, middlewares: Vec<Middleware>) -> Result<Self> {
        let (did_account, did_account_bump) = utils::derive_did_account(did)?;
        let (address, bump) = utils::derive_cryptid_account(&DID_PROGRAM_ID, &did_account, index);

        Ok(Self {
            address,
            bump,
            index,
            owner_did: did.to_string(),
            did_account,
            did_account_bump,
            middlewares,
        })
    }

    /// The default account at index 0, usable before any initialization
    pub fn generative(did: &str) -> Result<Self> {
        Self::derive(did, 0, Vec::new())
    }

    /// Read the account from the ledger, resolving each middleware's owner.
    /// An absent index-0 account is the generative default.
    pub async fn fetch(
        connection: &dyn SolConnection,
        did: &str,
        index: u32,
        registry: &MiddlewareRegistry,
    ) -> Result<Self> {
        utils::fetch_account_details(connection, did, index, registry).await
    }

    pub fn is_generative(&self) -> bool {
        self.index == 0
    }

    pub fn with_middlewares(&self, middlewares: Vec<Middleware>) -> Self {
        Self {
            middlewares,
            ..self.clone()
        }
    }

    pub fn seeds(&self) -> CryptidSeeds {
        CryptidSeeds {
            cryptid_account_bump: self.bump,
            cryptid_account_index: self.index,
            did_account_bump: self.did_account_bump,
        }
    }

    pub fn named_accounts(&self, signer: TableEntry) -> NamedAccounts {
        NamedAccounts {
            cryptid_account: self.address,
            did_account: self.did_account,
            did_program: DID_PROGRAM_ID,
            signer,
        }
    }

    /// Index must be non-zero for an explicitly created account
    pub fn ensure_creatable(&self) -> Result<()> {
        if self.is_generative() {
            return Err(CryptidSdkError::AddressDerivation {
                input: self.owner_did.clone(),
                reason: "index 0 is the generative account and cannot be created".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_middlewares_builds_new_value() {
        let did = utils::did_for_authority(&Pubkey::new_unique());
        let details = CryptidAccountDetails::derive(&did, 2, Vec::new()).unwrap();
        let middleware = Middleware {
            address: Pubkey::new_unique(),
            owning_program: Pubkey::new_unique(),
            is_superuser: false,
        };

        let updated = details.with_middlewares(vec![middleware]);
        assert!(details.middlewares.is_empty());
        assert_eq!(updated.middlewares, vec![middleware]);
        assert_eq!(updated.address, details.address);
    }

    #[test]
    fn test_seeds() {
        let did = utils::did_for_authority(&Pubkey::new_unique());
        let details = CryptidAccountDetails::derive(&did, 7, Vec::new()).unwrap();
        let seeds = details.seeds();
        assert_eq!(seeds.cryptid_account_index, 7);
        assert_eq!(seeds.cryptid_account_bump, details.bump);
        assert_eq!(seeds.did_account_bump, details.did_account_bump);
    }

    #[test]
    fn test_generative_cannot_be_created() {
        let did = utils::did_for_authority(&Pubkey::new_unique());
        let details = CryptidAccountDetails::generative(&did).unwrap();
        assert!(details.ensure_creatable().is_err());
    }
}
