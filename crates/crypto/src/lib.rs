//! Key handling and transfer signing for the drip faucet.

pub mod ecdsa;
pub mod transfer;

pub use ecdsa::{EcdsaError, KeyPair, RecoverableSignature};
pub use transfer::{verify_transfer, SignedTransfer, TransferError, TransferSigner};
