// Example: Acting for a DID through its controller
//
// This example demonstrates how to:
// 1. Start from the Cryptid account of a controller DID
// 2. Delegate to a DID that lists the controller
// 3. Propose a transaction on the controlled DID's account

use cryptid_sdk::state::TransactionState;
use cryptid_sdk::{
    did_for_authority, Cryptid, CryptidConfig, CryptidSigner, RpcConnection, SolConnection,
};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::system_instruction;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = CryptidConfig::from_env()?;
    let connection: Arc<dyn SolConnection> = Arc::new(RpcConnection::from_config(&config));

    // 1. Controller DID, signed for by a key on it
    let authority = Arc::new(Keypair::new());
    let controller_did = did_for_authority(&CryptidSigner::pubkey(authority.as_ref()));
    let controller =
        Cryptid::builder(controller_did, authority as Arc<dyn CryptidSigner>, connection)
            .with_config(config)
            .build()?;

    // 2. The controlled DID; replace with one that lists the controller
    let controlled_did = did_for_authority(&Pubkey::new_unique());
    let controlled = controller.control_with(&controlled_did)?;

    println!("Delegation:");
    println!("  Controller chain: {:?}", controlled.capabilities().controller_chain);
    println!("  Controlled account: {}", controlled.address());
    println!("  Controller DID accounts: {:?}", controlled.additional_keys());

    // 3. Build the proposal instruction without sending it
    let transfer = system_instruction::transfer(&controlled.address(), &Pubkey::new_unique(), 42);
    let (_, encoded) = controlled.transaction_builder().propose(
        &controlled.signer_key(),
        &Pubkey::new_unique(),
        &[transfer],
        TransactionState::Ready,
        &controlled.additional_keys(),
    )?;

    println!("Proposal encoded successfully!");
    println!("  Table entries: {}", encoded.account_table.len());
    println!("  Controller indices: {:?}", encoded.controller_chain);

    // In a real application:
    // let proposal = controlled.propose(&[transfer], TransactionState::Ready).await?;
    // controlled.execute(&proposal.transaction_account).await?;

    Ok(())
}
