//! Shared types and utilities for the drip faucet workspace.

pub mod error;
pub mod types;
pub mod utils;

pub use error::{CommonError, Result};
pub use types::{Address, Hash, ADDRESS_LENGTH, HASH_LENGTH};
