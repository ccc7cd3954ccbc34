//! # ECDSA (secp256k1)
//!
//! Recoverable signing and address recovery over 32-byte prehashes.
//!
//! ## Security Notes
//!
//! - **Malleability Prevention (EIP-2)**: produced signatures always carry a low S
//! - **Constant-Time Comparison**: the low-S check uses `subtle`
//! - Uses k256 crate for cryptographic operations

use super::errors::SignatureError;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use shared_types::{Address, Signature, H256};
use subtle::Choice;
use zeroize::Zeroize;

/// secp256k1 curve order n
const SECP256K1_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

/// Half of the secp256k1 curve order.
const SECP256K1_HALF_ORDER: [u8; 32] = [
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
];

/// Offset added to the raw recovery id in Ethereum-style signatures.
pub const ETH_V_OFFSET: u8 = 27;

// =============================================================================
// HASHING AND ADDRESSES
// =============================================================================

/// Keccak256 hash function.
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

/// Derive Ethereum address from public key.
pub fn address_from_pubkey(public_key: &VerifyingKey) -> Address {
    let pubkey_bytes = public_key.to_encoded_point(false);
    // Keccak256 of the public key without the 0x04 prefix
    let hash = keccak256(&pubkey_bytes.as_bytes()[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

/// Derive the Ethereum address controlled by a private key.
pub fn address_from_private_key(private_key: &SigningKey) -> Address {
    address_from_pubkey(private_key.verifying_key())
}

// =============================================================================
// SIGN / RECOVER
// =============================================================================

/// Sign a 32-byte prehash, returning `(r, s, recovery_id)` with low S.
///
/// `recovery_id` is the raw parity bit (0 or 1); callers add their own offset.
pub(crate) fn sign_prehash(
    message_hash: &H256,
    private_key: &SigningKey,
) -> Result<([u8; 32], [u8; 32], u8), SignatureError> {
    let (sig, recid) = private_key
        .sign_prehash_recoverable(message_hash.as_bytes())
        .map_err(|_| SignatureError::SigningFailed)?;

    let mut sig_bytes: [u8; 64] = sig.to_bytes().into();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&sig_bytes[..32]);
    s.copy_from_slice(&sig_bytes[32..]);
    sig_bytes.zeroize();

    if is_low_s(&s) {
        return Ok((r, s, recid.to_byte()));
    }

    // Normalizing S flips the parity of the recovered point
    Ok((r, invert_s(&s), recid.to_byte() ^ 1))
}

/// Sign a message hash, producing an Ethereum-style signature with `v` in {27, 28}.
pub fn sign_hash(message_hash: &H256, private_key: &SigningKey) -> Result<Signature, SignatureError> {
    let (r, s, recid) = sign_prehash(message_hash, private_key)?;
    Ok(Signature {
        r,
        s,
        v: recid + ETH_V_OFFSET,
    })
}

/// Recover the signer's Ethereum address from a message signature.
///
/// Accepts `v` in {0, 1, 27, 28}. Never returns the zero address: any
/// failure is a typed error.
pub fn recover_address(message_hash: &H256, signature: &Signature) -> Result<Address, SignatureError> {
    let recovery_id = parse_recovery_id(u64::from(signature.v))?;
    recover_with_id(message_hash, &signature.r, &signature.s, recovery_id)
}

/// Recover the signer from a serialized `r || s || v` signature.
pub fn recover_address_from_slice(message_hash: &H256, signature: &[u8]) -> Result<Address, SignatureError> {
    let signature = Signature::from_slice(signature)?;
    recover_address(message_hash, &signature)
}

/// Recover the signer from raw components and an already-parsed recovery id.
pub(crate) fn recover_with_id(
    message_hash: &H256,
    r: &[u8; 32],
    s: &[u8; 32],
    recovery_id: RecoveryId,
) -> Result<Address, SignatureError> {
    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(r);
    sig_bytes[32..].copy_from_slice(s);

    let sig = K256Signature::from_slice(&sig_bytes);
    sig_bytes.zeroize();
    let sig = sig.map_err(|_| SignatureError::InvalidFormat)?;

    let recovered_key =
        VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &sig, recovery_id)
            .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(address_from_pubkey(&recovered_key))
}

/// Parse recovery ID from a message signature's v value.
///
/// Valid v values: 0, 1, 27, 28
pub(crate) fn parse_recovery_id(v: u64) -> Result<RecoveryId, SignatureError> {
    let id = match v {
        0 | 27 => 0u8,
        1 | 28 => 1u8,
        _ => return Err(SignatureError::InvalidRecoveryId(v)),
    };

    RecoveryId::try_from(id).map_err(|_| SignatureError::InvalidRecoveryId(v))
}

// =============================================================================
// MALLEABILITY HELPERS
// =============================================================================

/// Check if S value is strictly below half the curve order (EIP-2).
///
/// Runs in constant time regardless of input.
pub(crate) fn is_low_s(s: &[u8; 32]) -> bool {
    let mut less = Choice::from(0u8);
    let mut greater = Choice::from(0u8);

    for i in 0..32 {
        let not_decided = !(less | greater);
        let byte_less = Choice::from((s[i] < SECP256K1_HALF_ORDER[i]) as u8);
        let byte_greater = Choice::from((s[i] > SECP256K1_HALF_ORDER[i]) as u8);

        less |= not_decided & byte_less;
        greater |= not_decided & byte_greater;
    }

    less.into()
}

/// Invert S value: s' = n - s
pub(crate) fn invert_s(s: &[u8; 32]) -> [u8; 32] {
    let mut result = [0u8; 32];
    let mut borrow: i32 = 0;

    for i in (0..32).rev() {
        let diff = (SECP256K1_ORDER[i] as i32) - (s[i] as i32) - borrow;
        if diff < 0 {
            result[i] = (diff + 256) as u8;
            borrow = 1;
        } else {
            result[i] = diff as u8;
            borrow = 0;
        }
    }

    result
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// Generate a new random signing key.
    pub fn generate_key() -> SigningKey {
        SigningKey::random(&mut rand::thread_rng())
    }
}
