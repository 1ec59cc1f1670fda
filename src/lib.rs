//! Passkey-signed ERC-4337 (EntryPoint v0.6) user operations.
//!
//! Build a `UserOperation` for a passkey wallet, have the passkey sign the
//! WebAuthn challenge derived from its hash, re-encode the assertion for the
//! on-chain verifier, then sponsor, submit and confirm it.

pub mod bindings;
pub mod builder;
pub mod bundler;
pub mod calldata;
pub mod chain;
pub mod challenge;
pub mod encoding;
pub mod error;
pub mod gas;
pub mod orchestrator;
pub mod passkey;
pub mod paymaster;
pub mod rpc;
pub mod signature;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{PipelineError, Stage, WalletError};
pub use orchestrator::{PipelineConfig, SmartWalletOrchestrator, UserOpOutcome, WalletContracts};
pub use types::{PasskeyCredential, PasskeyPublicKey, Transfer, UserOperation, WalletRef};
