//! # Local Signer
//!
//! Holds one secp256k1 key and signs every protocol message on its behalf.

use crate::domain::ecdsa::{address_from_private_key, sign_hash};
use crate::domain::errors::SignatureError;
use crate::domain::messages::{balance_proof_hash, closing_message_hash, eth_message_hash};
use crate::domain::transaction::{sign_transaction, Transaction};
use k256::ecdsa::SigningKey;
use primitive_types::U256;
use shared_types::{decode_hex, Address, Signature, H256};
use std::fmt;

/// A private key together with the address it controls.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    /// Wrap an existing signing key.
    pub fn new(key: SigningKey) -> Self {
        let address = address_from_private_key(&key);
        Self { key, address }
    }

    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> Result<Self, SignatureError> {
        let mut bytes = decode_hex(private_key).map_err(|_| SignatureError::InvalidPrivateKey)?;
        let key = SigningKey::from_slice(&bytes);
        zeroize::Zeroize::zeroize(&mut bytes);
        Ok(Self::new(key.map_err(|_| SignatureError::InvalidPrivateKey)?))
    }

    /// Generate a fresh random key.
    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Address controlled by this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Underlying signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// Sign an arbitrary 32-byte hash (`v` in {27, 28}).
    pub fn sign_hash(&self, hash: &H256) -> Result<Signature, SignatureError> {
        sign_hash(hash, &self.key)
    }

    /// Sign a balance proof as the channel's sender.
    pub fn sign_balance_proof(
        &self,
        receiver: Address,
        open_block_number: u32,
        balance: U256,
        contract_address: Address,
    ) -> Result<Signature, SignatureError> {
        let hash = balance_proof_hash(receiver, open_block_number, balance, contract_address)?;
        self.sign_hash(&hash)
    }

    /// Sign a closing message as the channel's receiver.
    pub fn sign_close(
        &self,
        sender: Address,
        open_block_number: u32,
        balance: U256,
        contract_address: Address,
    ) -> Result<Signature, SignatureError> {
        let hash = closing_message_hash(sender, open_block_number, balance, contract_address)?;
        self.sign_hash(&hash)
    }

    /// Sign a personal message (`eth_sign`).
    pub fn eth_sign(&self, message: &str) -> Result<Signature, SignatureError> {
        self.sign_hash(&eth_message_hash(message))
    }

    /// Sign a transaction for `chain_id` and return the raw bytes.
    pub fn sign_transaction(
        &self,
        transaction: &Transaction,
        chain_id: u64,
    ) -> Result<Vec<u8>, SignatureError> {
        sign_transaction(transaction, &self.key, chain_id)
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
