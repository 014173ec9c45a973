use crate::ecdsa::{recover_address, EcdsaError, KeyPair, RecoverableSignature};
use drip_common::types::{Address, Hash};
use rlp::{Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type tag carried by transfers the faucet issues.
pub const FAUCET_TRANSFER_TYPE: u8 = 0x01;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Sender does not match signing key: expected {expected}, got {actual}")]
    SenderMismatch { expected: Address, actual: Address },
    #[error("Zero address not allowed for {0}")]
    ZeroAddress(&'static str),
    #[error("Chain id mismatch: expected {expected}, got {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    #[error("Invalid nonce")]
    InvalidNonce,
    #[error("Value overflow")]
    ValueOverflow,
    #[error("Signature verification failed")]
    VerificationFailed,
    #[error("Signing failed: {0}")]
    Signing(#[from] EcdsaError),
    #[error("Invalid transfer encoding: {0}")]
    Decode(#[from] rlp::DecoderError),
}

/// A signed value transfer ready for the authority's intake queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub chain_id: u64,
    /// Minimal big-endian nonce bytes
    pub nonce: Vec<u8>,
    pub from: Address,
    pub to: Address,
    /// Reward plus network fee
    pub value: u128,
    pub payload: Vec<u8>,
    pub tx_type: u8,
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignedTransfer {
    /// Keccak digest over the unsigned fields; this is what gets signed.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new();
        stream.begin_list(7);
        self.append_unsigned(&mut stream);
        keccak_hash::keccak(stream.out()).0
    }

    fn append_unsigned(&self, stream: &mut RlpStream) {
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.from.0.to_vec());
        stream.append(&self.to.0.to_vec());
        stream.append(&minimal_be_bytes(self.value));
        stream.append(&self.payload);
        stream.append(&self.tx_type);
    }

    /// RLP encoding of the full signed transfer.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        stream.begin_list(10);
        self.append_unsigned(&mut stream);
        stream.append(&self.v);
        stream.append(&self.r.to_vec());
        stream.append(&self.s.to_vec());
        stream.out().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransferError> {
        let rlp = Rlp::new(bytes);
        if rlp.item_count()? != 10 {
            return Err(TransferError::Decode(rlp::DecoderError::RlpIncorrectListLen));
        }

        let from: Vec<u8> = rlp.val_at(2)?;
        let to: Vec<u8> = rlp.val_at(3)?;
        let value: Vec<u8> = rlp.val_at(4)?;
        let r: Vec<u8> = rlp.val_at(8)?;
        let s: Vec<u8> = rlp.val_at(9)?;

        Ok(Self {
            chain_id: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            from: Address::from_slice(&from)
                .map_err(|_| rlp::DecoderError::RlpInvalidLength)?,
            to: Address::from_slice(&to).map_err(|_| rlp::DecoderError::RlpInvalidLength)?,
            value: u128_from_be_bytes(&value).ok_or(TransferError::ValueOverflow)?,
            payload: rlp.val_at(5)?,
            tx_type: rlp.val_at(6)?,
            v: rlp.val_at(7)?,
            r: to_array32(&r)?,
            s: to_array32(&s)?,
        })
    }

    /// Transfer hash as reported to callers and the authority.
    pub fn hash(&self) -> Hash {
        Hash(keccak_hash::keccak(self.encode()).0)
    }

    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(self.encode()))
    }

    fn signature(&self) -> RecoverableSignature {
        RecoverableSignature {
            v: self.v,
            r: self.r,
            s: self.s,
        }
    }
}

/// Builds and signs faucet transfers for one chain.
pub struct TransferSigner {
    keypair: KeyPair,
    address: Address,
    chain_id: u64,
}

impl TransferSigner {
    pub fn new(keypair: KeyPair, chain_id: u64) -> Self {
        let address = keypair.address();
        Self {
            keypair,
            address,
            chain_id,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Builds a transfer of `amount + fee` from `from` to `to`, signs it and
    /// self-validates the result. Nothing that fails validation is returned.
    pub fn build_and_sign(
        &self,
        from: Address,
        to: Address,
        amount: u128,
        fee: u128,
        nonce: u64,
    ) -> Result<SignedTransfer, TransferError> {
        if from != self.address {
            return Err(TransferError::SenderMismatch {
                expected: self.address,
                actual: from,
            });
        }

        let value = amount.checked_add(fee).ok_or(TransferError::ValueOverflow)?;

        let mut transfer = SignedTransfer {
            chain_id: self.chain_id,
            nonce: nonce_bytes(nonce),
            from,
            to,
            value,
            payload: Vec::new(),
            tx_type: FAUCET_TRANSFER_TYPE,
            v: 0,
            r: [0u8; 32],
            s: [0u8; 32],
        };

        let signature = self.keypair.sign_digest(&transfer.signing_hash())?;
        transfer.v = signature.v;
        transfer.r = signature.r;
        transfer.s = signature.s;

        verify_transfer(&transfer, self.chain_id)?;
        Ok(transfer)
    }
}

/// Checks a signed transfer before it leaves the process.
pub fn verify_transfer(
    transfer: &SignedTransfer,
    expected_chain_id: u64,
) -> Result<(), TransferError> {
    if transfer.chain_id != expected_chain_id {
        return Err(TransferError::ChainIdMismatch {
            expected: expected_chain_id,
            actual: transfer.chain_id,
        });
    }

    if transfer.from.is_zero() {
        return Err(TransferError::ZeroAddress("sender"));
    }
    if transfer.to.is_zero() {
        return Err(TransferError::ZeroAddress("recipient"));
    }

    // Minimal encoding: non-empty, no leading zero byte
    if transfer.nonce.first().map_or(true, |b| *b == 0) {
        return Err(TransferError::InvalidNonce);
    }

    let signer = recover_address(&transfer.signing_hash(), &transfer.signature())
        .map_err(|_| TransferError::VerificationFailed)?;
    if signer != transfer.from {
        return Err(TransferError::VerificationFailed);
    }

    Ok(())
}

/// Minimal big-endian representation of a nonce (zero encodes as empty).
pub fn nonce_bytes(nonce: u64) -> Vec<u8> {
    let bytes = nonce.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn minimal_be_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn u128_from_be_bytes(bytes: &[u8]) -> Option<u128> {
    if bytes.len() > 16 {
        return None;
    }
    let mut buf = [0u8; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Some(u128::from_be_bytes(buf))
}

fn to_array32(bytes: &[u8]) -> Result<[u8; 32], rlp::DecoderError> {
    bytes.try_into().map_err(|_| rlp::DecoderError::RlpInvalidLength)
}
