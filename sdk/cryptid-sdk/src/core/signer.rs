use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;

use crate::error::{CryptidSdkError, Result, Stage};

/// Abstraction for an entity that can sign messages/transactions.
/// This allows the SDK to work with:
/// 1. Local Keypairs (Backend/CLI)
/// 2. Remote or hardware signers that only expose message signing
#[async_trait]
pub trait CryptidSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Sign a message.
    /// Returns Err if not supported or failed.
    async fn sign_message(&self, message: &[u8]) -> std::result::Result<Signature, String>;
}

#[async_trait]
impl CryptidSigner for Keypair {
    fn pubkey(&self) -> Pubkey {
        Signer::pubkey(self)
    }

    async fn sign_message(&self, message: &[u8]) -> std::result::Result<Signature, String> {
        Signer::try_sign_message(self, message).map_err(|e| e.to_string())
    }
}

/// Fill every required signature slot of `tx` from `signers`.
///
/// Signers whose key is not a required signer are ignored. Fails if a
/// required slot is left empty.
pub async fn sign_transaction(
    tx: &mut Transaction,
    signers: &[Arc<dyn CryptidSigner>],
    stage: Stage,
) -> Result<()> {
    let message = tx.message_data();
    let required = tx.message.header.num_required_signatures as usize;

    for signer in signers {
        let key = CryptidSigner::pubkey(signer.as_ref());
        let Some(position) = tx.message.account_keys[..required]
            .iter()
            .position(|k| *k == key)
        else {
            continue;
        };
        let signature = CryptidSigner::sign_message(signer.as_ref(), &message)
            .await
            .map_err(|reason| CryptidSdkError::Signing {
                stage,
                signer: key,
                reason,
            })?;
        tx.signatures[position] = signature;
    }

    if let Some(position) = tx.signatures[..required]
        .iter()
        .position(|s| *s == Signature::default())
    {
        return Err(CryptidSdkError::Signing {
            stage,
            signer: tx.message.account_keys[position],
            reason: "missing signature".to_string(),
        });
    }

    Ok(())
}
