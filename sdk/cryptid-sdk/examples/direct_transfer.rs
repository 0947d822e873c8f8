// Example: Moving funds out of a DID's default Cryptid account
//
// This example demonstrates how to:
// 1. Load client configuration from CRYPTID_* environment variables
// 2. Address the generative Cryptid account of a did:sol identifier
// 3. Wrap a transfer into a direct-execute transaction and check its size
//
// Run with RUST_LOG=cryptid_sdk=debug to see the encoder at work.

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

    // 1. Configuration and transport
    let config = CryptidConfig::from_env()?;
    let connection: Arc<dyn SolConnection> = Arc::new(RpcConnection::from_config(&config));

    // 2. A key on the DID; here the DID is the key's own generative DID
    let authority = Arc::new(Keypair::new());
    let did = did_for_authority(&CryptidSigner::pubkey(authority.as_ref()));
    let cryptid = Cryptid::builder(did.clone(), authority as Arc<dyn CryptidSigner>, connection)
        .with_config(config)
        .build()?;

    println!("Cryptid account:");
    println!("  DID: {}", cryptid.did());
    println!("  Address: {}", cryptid.address());

    // 3. Wrap a transfer out of the Cryptid account
    let recipient = Pubkey::new_unique();
    let transfer = system_instruction::transfer(&cryptid.address(), &recipient, 1_000_000);
    let composed = cryptid.compose_direct_execute(&[transfer])?;

    println!("Direct execute built successfully!");
    println!("  Size: {} bytes", composed.size());

    // In a real application, fund the Cryptid account first, then:
    // let signature = cryptid.send(&[transfer]).await?;

    Ok(())
}
