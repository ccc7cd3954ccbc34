//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Chain**: `Address`, `H256`, `BlockNumber`, `U256`
//! - **Channels**: `ChannelKey`
//! - **Signatures**: `Signature` (recoverable secp256k1, 65 bytes)

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::errors::ParseError;

// Re-export the fixed-width primitives for use across all subsystems
pub use primitive_types::{H160, H256, U256};

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A 20-byte Ethereum address.
pub type Address = H160;

/// Hash of a transaction.
pub type TxHash = H256;

/// Hash of a block.
pub type BlockHash = H256;

/// Height of a block in the chain.
pub type BlockNumber = u64;

/// Largest value the contract stores for balances and deposits (uint192).
pub fn max_uint192() -> U256 {
    (U256::one() << 192) - U256::one()
}

/// Strip an optional `0x` prefix and decode hex.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, ParseError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(body).map_err(|e| ParseError::InvalidHex(e.to_string()))
}

/// Encode bytes as `0x`-prefixed lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a `0x`-prefixed (or bare) 20-byte address.
pub fn parse_address(input: &str) -> Result<Address, ParseError> {
    let bytes = decode_hex(input)?;
    if bytes.len() != 20 {
        return Err(ParseError::InvalidLength {
            expected: 20,
            actual: bytes.len(),
        });
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse a `0x`-prefixed (or bare) 32-byte hash.
pub fn parse_h256(input: &str) -> Result<H256, ParseError> {
    let bytes = decode_hex(input)?;
    if bytes.len() != 32 {
        return Err(ParseError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    Ok(H256::from_slice(&bytes))
}

/// Parse a decimal token amount.
pub fn parse_amount(input: &str) -> Result<U256, ParseError> {
    U256::from_dec_str(input.trim()).map_err(|e| ParseError::InvalidQuantity(format!("{e:?}")))
}

/// EIP-55 mixed-case checksum encoding of an address.
pub fn to_checksum(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let digest = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// CLUSTER B: CHANNELS
// =============================================================================

/// Identity of a channel from the receiver's point of view.
///
/// The contract keys channels by `(sender, receiver, open_block_number)`; a
/// receiver only ever sees its own channels, so the pair below is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    /// The payer.
    pub sender: Address,
    /// Block in which the channel was created.
    pub open_block_number: u32,
}

impl ChannelKey {
    /// Create a channel key.
    pub fn new(sender: Address, open_block_number: u32) -> Self {
        Self {
            sender,
            open_block_number,
        }
    }

    /// Fixed-width byte form: 20-byte sender followed by big-endian block.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..20].copy_from_slice(self.sender.as_bytes());
        out[20..].copy_from_slice(&self.open_block_number.to_be_bytes());
        out
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            to_checksum(&self.sender),
            self.open_block_number
        )
    }
}

// =============================================================================
// CLUSTER C: SIGNATURES
// =============================================================================

/// Recoverable secp256k1 signature in Ethereum layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    /// R component (32 bytes)
    pub r: [u8; 32],
    /// S component (32 bytes)
    pub s: [u8; 32],
    /// Recovery ID (0/1, 27/28, or EIP-155 encoded)
    pub v: u8,
}

impl Signature {
    /// Serialized length: r (32) || s (32) || v (1).
    pub const LENGTH: usize = 65;

    /// Parse a 65-byte signature.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != Self::LENGTH {
            return Err(ParseError::InvalidLength {
                expected: Self::LENGTH,
                actual: bytes.len(),
            });
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, v: bytes[64] })
    }

    /// Serialize to the 65-byte wire form.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// `0x`-prefixed hex of the wire form.
    pub fn to_hex(&self) -> String {
        encode_hex(&self.to_bytes())
    }
}

impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(&decode_hex(s)?)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_matches_eip55_vectors() {
        let addr = parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(
            to_checksum(&addr),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        let addr = parse_address("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359").unwrap();
        assert_eq!(
            to_checksum(&addr),
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359"
        );
    }

    #[test]
    fn test_parse_address_rejects_wrong_length() {
        assert_eq!(
            parse_address("0x1234"),
            Err(ParseError::InvalidLength {
                expected: 20,
                actual: 2
            })
        );
        assert!(matches!(parse_address("0xzz"), Err(ParseError::InvalidHex(_))));
    }

    #[test]
    fn test_signature_rejects_wrong_length() {
        let err = Signature::from_slice(&[0u8; 64]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidLength {
                expected: 65,
                actual: 64
            }
        );
    }

    #[test]
    fn test_signature_serde_is_hex_string() {
        let sig = Signature {
            r: [0x11; 32],
            s: [0x22; 32],
            v: 27,
        };
        let json = serde_json::to_string(&sig).unwrap();
        assert!(json.starts_with("\"0x1111"));
        assert!(json.ends_with("1b\""));
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_channel_key_bytes_layout() {
        let key = ChannelKey::new(Address::repeat_byte(0xAB), 0x0102_0304);
        let bytes = key.to_bytes();
        assert_eq!(&bytes[..20], &[0xAB; 20]);
        assert_eq!(&bytes[20..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_max_uint192() {
        let max = max_uint192();
        assert_eq!(max.bits(), 192);
        assert_eq!(max + U256::one(), U256::one() << 192);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000").unwrap(), U256::from(1000u64));
        assert!(parse_amount("12a").is_err());
    }
}
