//! # Protocol Messages
//!
//! Typed-data hashes for balance proofs and closing signatures, plus the
//! personal-message (`eth_sign`) scheme.

use super::ecdsa::{keccak256, recover_address};
use super::errors::SignatureError;
use primitive_types::U256;
use shared_types::{max_uint192, Address, Signature, H256};

/// Message id signed by the sender of a balance proof.
pub const BALANCE_PROOF_MESSAGE_ID: &str = "Sender balance proof signature";

/// Message id signed by the receiver when agreeing to a cooperative close.
pub const CLOSING_MESSAGE_ID: &str = "Receiver closing signature";

/// Prefix used by `eth_sign` personal messages.
const ETH_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// A single typed-data value with its tightly packed encoding.
#[derive(Debug, Clone, Copy)]
enum TypedValue<'a> {
    String(&'a str),
    Address(Address),
    /// Unsigned integer packed big-endian into `bits / 8` bytes
    Uint { value: U256, bits: usize },
}

impl TypedValue<'_> {
    fn pack_into(&self, out: &mut Vec<u8>) {
        match self {
            TypedValue::String(s) => out.extend_from_slice(s.as_bytes()),
            TypedValue::Address(a) => out.extend_from_slice(a.as_bytes()),
            TypedValue::Uint { value, bits } => {
                let mut word = [0u8; 32];
                value.to_big_endian(&mut word);
                out.extend_from_slice(&word[32 - bits / 8..]);
            }
        }
    }
}

/// `keccak256(keccak256(schema...) || keccak256(data...))`
fn typed_data_hash(fields: &[(&str, &str, TypedValue<'_>)]) -> H256 {
    let mut schema = Vec::new();
    let mut data = Vec::new();
    for (ty, name, value) in fields {
        schema.extend_from_slice(ty.as_bytes());
        schema.push(b' ');
        schema.extend_from_slice(name.as_bytes());
        value.pack_into(&mut data);
    }

    let mut outer = Vec::with_capacity(64);
    outer.extend_from_slice(keccak256(&schema).as_bytes());
    outer.extend_from_slice(keccak256(&data).as_bytes());
    keccak256(&outer)
}

fn check_balance(balance: U256) -> Result<(), SignatureError> {
    if balance > max_uint192() {
        return Err(SignatureError::ValueOutOfRange { field: "balance" });
    }
    Ok(())
}

fn channel_message_hash(
    message_id: &str,
    counterparty_label: &str,
    counterparty: Address,
    open_block_number: u32,
    balance: U256,
    contract_address: Address,
) -> Result<H256, SignatureError> {
    check_balance(balance)?;
    Ok(typed_data_hash(&[
        ("string", "message_id", TypedValue::String(message_id)),
        ("address", counterparty_label, TypedValue::Address(counterparty)),
        (
            "uint32",
            "block_created",
            TypedValue::Uint {
                value: U256::from(open_block_number),
                bits: 32,
            },
        ),
        (
            "uint192",
            "balance",
            TypedValue::Uint {
                value: balance,
                bits: 192,
            },
        ),
        ("address", "contract", TypedValue::Address(contract_address)),
    ]))
}

// =============================================================================
// BALANCE PROOFS
// =============================================================================

/// Hash signed by the sender to authorize a payout of `balance` to `receiver`.
pub fn balance_proof_hash(
    receiver: Address,
    open_block_number: u32,
    balance: U256,
    contract_address: Address,
) -> Result<H256, SignatureError> {
    channel_message_hash(
        BALANCE_PROOF_MESSAGE_ID,
        "receiver",
        receiver,
        open_block_number,
        balance,
        contract_address,
    )
}

/// Hash signed by the receiver to acknowledge `balance` for a cooperative close.
pub fn closing_message_hash(
    sender: Address,
    open_block_number: u32,
    balance: U256,
    contract_address: Address,
) -> Result<H256, SignatureError> {
    channel_message_hash(
        CLOSING_MESSAGE_ID,
        "sender",
        sender,
        open_block_number,
        balance,
        contract_address,
    )
}

/// Recover the sender that signed a balance proof.
pub fn verify_balance_proof(
    receiver: Address,
    open_block_number: u32,
    balance: U256,
    signature: &Signature,
    contract_address: Address,
) -> Result<Address, SignatureError> {
    let hash = balance_proof_hash(receiver, open_block_number, balance, contract_address)?;
    recover_address(&hash, signature)
}

/// Recover the receiver that signed a closing message.
pub fn verify_closing_signature(
    sender: Address,
    open_block_number: u32,
    balance: U256,
    signature: &Signature,
    contract_address: Address,
) -> Result<Address, SignatureError> {
    let hash = closing_message_hash(sender, open_block_number, balance, contract_address)?;
    recover_address(&hash, signature)
}

// =============================================================================
// PERSONAL MESSAGES
// =============================================================================

/// `keccak256("\x19Ethereum Signed Message:\n" || len(msg) || msg)`
pub fn eth_message_hash(message: &str) -> H256 {
    let mut buf = Vec::with_capacity(ETH_MESSAGE_PREFIX.len() + 8 + message.len());
    buf.extend_from_slice(ETH_MESSAGE_PREFIX.as_bytes());
    buf.extend_from_slice(message.len().to_string().as_bytes());
    buf.extend_from_slice(message.as_bytes());
    keccak256(&buf)
}

/// Recover the signer of a personal message.
pub fn eth_verify(signature: &Signature, message: &str) -> Result<Address, SignatureError> {
    recover_address(&eth_message_hash(message), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecdsa::{address_from_private_key, sign_hash, test_helpers::generate_key};

    fn contract() -> Address {
        Address::repeat_byte(0xCC)
    }

    #[test]
    fn test_balance_proof_round_trip() {
        let sender = generate_key();
        let receiver = Address::repeat_byte(0x11);
        let balance = U256::from(15u64);

        let hash = balance_proof_hash(receiver, 37, balance, contract()).unwrap();
        let sig = sign_hash(&hash, &sender).unwrap();

        assert_eq!(
            verify_balance_proof(receiver, 37, balance, &sig, contract()).unwrap(),
            address_from_private_key(&sender)
        );
    }

    #[test]
    fn test_balance_proof_binds_every_field() {
        let receiver = Address::repeat_byte(0x11);
        let base = balance_proof_hash(receiver, 37, U256::from(15u64), contract()).unwrap();

        let other_receiver =
            balance_proof_hash(Address::repeat_byte(0x12), 37, U256::from(15u64), contract());
        let other_block = balance_proof_hash(receiver, 38, U256::from(15u64), contract());
        let other_balance = balance_proof_hash(receiver, 37, U256::from(16u64), contract());
        let other_contract =
            balance_proof_hash(receiver, 37, U256::from(15u64), Address::repeat_byte(0xCD));

        for h in [other_receiver, other_block, other_balance, other_contract] {
            assert_ne!(h.unwrap(), base);
        }
    }

    #[test]
    fn test_typed_data_known_vectors() {
        let balance_proof =
            balance_proof_hash(Address::repeat_byte(0x11), 37, U256::from(15u64), contract()).unwrap();
        assert_eq!(
            balance_proof,
            shared_types::parse_h256("0xc523018584459e696757d417b63c24ff713549416e098e74dadebc2576f5cb75")
                .unwrap()
        );

        let closing =
            closing_message_hash(Address::repeat_byte(0x22), 37, U256::from(15u64), contract()).unwrap();
        assert_eq!(
            closing,
            shared_types::parse_h256("0x7dce1ae2f6dfd24853790e39e4ed2d024c81008c40a78a758a2ccbc7d35ad8b1")
                .unwrap()
        );
    }

    #[test]
    fn test_closing_hash_is_domain_separated() {
        let party = Address::repeat_byte(0x11);
        let balance = U256::from(8u64);
        assert_ne!(
            balance_proof_hash(party, 1, balance, contract()).unwrap(),
            closing_message_hash(party, 1, balance, contract()).unwrap()
        );
    }

    #[test]
    fn test_balance_out_of_range_rejected() {
        let too_big = max_uint192() + U256::one();
        assert_eq!(
            balance_proof_hash(Address::zero(), 1, too_big, contract()),
            Err(SignatureError::ValueOutOfRange { field: "balance" })
        );
        assert!(balance_proof_hash(Address::zero(), 1, max_uint192(), contract()).is_ok());
    }

    #[test]
    fn test_uint_packing_widths() {
        let mut out = Vec::new();
        TypedValue::Uint {
            value: U256::from(0x0102_0304u64),
            bits: 32,
        }
        .pack_into(&mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);

        out.clear();
        TypedValue::Uint {
            value: U256::one(),
            bits: 192,
        }
        .pack_into(&mut out);
        assert_eq!(out.len(), 24);
        assert_eq!(out[23], 1);
    }

    #[test]
    fn test_eth_message_hash_prefix() {
        let expected = keccak256(b"\x19Ethereum Signed Message:\n5hello");
        assert_eq!(eth_message_hash("hello"), expected);
    }

    #[test]
    fn test_eth_sign_known_vector() {
        let key = k256::ecdsa::SigningKey::from_slice(&[0xa0u8; 32]).unwrap();
        let sig = sign_hash(&eth_message_hash("is it wednesday, my dudes?"), &key).unwrap();
        assert_eq!(
            sig.to_hex(),
            "0xcc7b4e6cde6ace1d99995661250e52388aae17ebd66dcf52e634a6dd51bf286a2\
             e9757967b7baff8b549da7d8c3340701abf8560430b7a0bdf34f42b19bbf1861b"
        );
        assert_eq!(
            eth_verify(&sig, "is it wednesday, my dudes?").unwrap(),
            address_from_private_key(&key)
        );
    }
}
