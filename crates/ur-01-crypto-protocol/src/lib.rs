//! # Crypto Protocol (UR-01)
//!
//! Signature primitives shared by the receiver and the payer.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): pure hashing and ECDSA logic, no I/O
//! - **Service Layer** (`service.rs`): `LocalSigner`, a key holder that signs
//!   balance proofs, closing messages and transactions
//!
//! ## Message Layout
//!
//! Balance proofs and closing signatures are typed-data messages:
//!
//! ```text
//! keccak256(
//!     keccak256("string message_id" || "address receiver" || "uint32 block_created"
//!               || "uint192 balance" || "address contract")
//!  || keccak256(message_id || receiver || u32_be(block) || u192_be(balance) || contract)
//! )
//! ```
//!
//! The closing message swaps `receiver` for `sender`. Both must match the
//! settlement contract's verifier byte for byte.
//!
//! ## Security Notes
//!
//! - Signatures are always produced with low S (EIP-2) and `v` in {27, 28}
//! - Recovery accepts `v` in {0, 1, 27, 28}; EIP-155 `v` values are only
//!   accepted when recovering the sender of a signed transaction

pub mod domain;
pub mod service;

pub use domain::ecdsa::{
    address_from_private_key, address_from_pubkey, keccak256, recover_address,
    recover_address_from_slice, sign_hash,
};
pub use domain::errors::SignatureError;
pub use domain::messages::{
    balance_proof_hash, closing_message_hash, eth_message_hash, eth_verify,
    verify_balance_proof, verify_closing_signature, BALANCE_PROOF_MESSAGE_ID,
    CLOSING_MESSAGE_ID,
};
pub use domain::transaction::{
    recover_transaction_sender, sign_transaction, DecodedTransaction, Transaction,
};
pub use service::LocalSigner;
