use drip_common::types::Address;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EcdsaError {
    #[error("Invalid Hex String")]
    HexError(#[from] hex::FromHexError),
    #[error("Invalid Key")]
    KeyError,
    #[error("Invalid Signature")]
    SignatureError,
    #[error("Signing Failed")]
    SigningFailed,
}

/// Recoverable secp256k1 signature split into its wire components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn random() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self { signing_key }
    }

    /// Accepts a 32-byte secret as hex, with or without a `0x` prefix.
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self, EcdsaError> {
        let hex_str = hex_str.trim();
        let bytes = hex::decode(hex_str.strip_prefix("0x").unwrap_or(hex_str))?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|_| EcdsaError::KeyError)?;
        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    pub fn address(&self) -> Address {
        public_key_to_address(&self.public_key())
    }

    /// Signs a 32-byte digest, returning a low-s signature with its recovery id.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, EcdsaError> {
        let (signature, recovery_id): (Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|_| EcdsaError::SigningFailed)?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(RecoverableSignature {
            v: recovery_id.to_byte(),
            r,
            s,
        })
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

/// Recovers the signer's address from a digest and its recoverable signature.
pub fn recover_address(
    digest: &[u8; 32],
    sig: &RecoverableSignature,
) -> Result<Address, EcdsaError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&sig.r);
    bytes[32..].copy_from_slice(&sig.s);

    let signature = Signature::from_slice(&bytes).map_err(|_| EcdsaError::SignatureError)?;
    let recovery_id = RecoveryId::from_byte(sig.v).ok_or(EcdsaError::SignatureError)?;
    let public_key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| EcdsaError::SignatureError)?;

    Ok(public_key_to_address(&public_key))
}

/// Address = last 20 bytes of keccak256 over the uncompressed public key.
pub fn public_key_to_address(public_key: &VerifyingKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    let hash = keccak_hash::keccak(&encoded.as_bytes()[1..]); // Skip the 0x04 tag
    let mut addr_bytes = [0u8; 20];
    addr_bytes.copy_from_slice(&hash.0[12..]);
    Address(addr_bytes)
}
