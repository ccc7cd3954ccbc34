//! # Legacy Transactions (EIP-155)
//!
//! Signing payload: `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`.
//! Signed form: `rlp([nonce, gasPrice, gas, to, value, data, v, r, s])` with
//! `v = recovery_id + 35 + 2 * chainId`.

use super::ecdsa::{keccak256, parse_recovery_id, recover_with_id, sign_prehash};
use super::errors::SignatureError;
use k256::ecdsa::{RecoveryId, SigningKey};
use primitive_types::U256;
use rlp::{DecoderError, Rlp, RlpStream};
use shared_types::{Address, TxHash, H256};

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
}

/// A raw signed transaction decoded back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub transaction: Transaction,
    pub sender: Address,
    /// `None` for pre-EIP-155 signatures
    pub chain_id: Option<u64>,
    pub hash: TxHash,
}

impl Transaction {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        match &self.to {
            Some(to) => {
                stream.append(to);
            }
            None => {
                stream.append_empty_data();
            }
        }
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// Hash that is signed for the given chain id.
    pub fn signing_hash(&self, chain_id: Option<u64>) -> H256 {
        let stream = match chain_id {
            Some(id) => {
                let mut s = RlpStream::new_list(9);
                self.append_fields(&mut s);
                s.append(&id);
                s.append(&0u8);
                s.append(&0u8);
                s
            }
            None => {
                let mut s = RlpStream::new_list(6);
                self.append_fields(&mut s);
                s
            }
        };
        keccak256(&stream.out())
    }
}

/// Sign a transaction for `chain_id`, returning the raw RLP bytes to submit.
pub fn sign_transaction(
    transaction: &Transaction,
    private_key: &SigningKey,
    chain_id: u64,
) -> Result<Vec<u8>, SignatureError> {
    let hash = transaction.signing_hash(Some(chain_id));
    let (r, s, recid) = sign_prehash(&hash, private_key)?;
    let v = u64::from(recid) + 35 + 2 * chain_id;

    let mut stream = RlpStream::new_list(9);
    transaction.append_fields(&mut stream);
    stream.append(&v);
    stream.append(&U256::from_big_endian(&r));
    stream.append(&U256::from_big_endian(&s));
    Ok(stream.out().to_vec())
}

fn malformed(e: DecoderError) -> SignatureError {
    SignatureError::MalformedTransaction(e.to_string())
}

/// Decode a raw signed transaction and recover its sender.
///
/// Accepts both EIP-155 (`v >= 35`) and legacy (`v` in {27, 28}) signatures.
pub fn recover_transaction_sender(raw: &[u8]) -> Result<DecodedTransaction, SignatureError> {
    let rlp = Rlp::new(raw);
    if rlp.item_count().map_err(malformed)? != 9 {
        return Err(SignatureError::MalformedTransaction(
            "expected 9 list items".to_string(),
        ));
    }

    let to_item = rlp.at(3).map_err(malformed)?;
    let to = if to_item.is_empty() {
        None
    } else {
        Some(to_item.as_val::<Address>().map_err(malformed)?)
    };

    let transaction = Transaction {
        nonce: rlp.val_at(0).map_err(malformed)?,
        gas_price: rlp.val_at(1).map_err(malformed)?,
        gas_limit: rlp.val_at(2).map_err(malformed)?,
        to,
        value: rlp.val_at(4).map_err(malformed)?,
        data: rlp.val_at(5).map_err(malformed)?,
    };
    let v: u64 = rlp.val_at(6).map_err(malformed)?;
    let r: U256 = rlp.val_at(7).map_err(malformed)?;
    let s: U256 = rlp.val_at(8).map_err(malformed)?;

    let (chain_id, recovery_id) = split_v(v)?;
    let hash = transaction.signing_hash(chain_id);

    let mut r_bytes = [0u8; 32];
    let mut s_bytes = [0u8; 32];
    r.to_big_endian(&mut r_bytes);
    s.to_big_endian(&mut s_bytes);
    let sender = recover_with_id(&hash, &r_bytes, &s_bytes, recovery_id)?;

    Ok(DecodedTransaction {
        transaction,
        sender,
        chain_id,
        hash: keccak256(raw),
    })
}

/// Split a transaction `v` into its chain id and raw recovery id.
fn split_v(v: u64) -> Result<(Option<u64>, RecoveryId), SignatureError> {
    if v >= 35 {
        let chain_id = (v - 35) / 2;
        let id = v - 35 - 2 * chain_id;
        Ok((Some(chain_id), parse_recovery_id(id)?))
    } else {
        Ok((None, parse_recovery_id(v)?))
    }
}
