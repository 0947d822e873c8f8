pub mod connection;
pub mod signer;
