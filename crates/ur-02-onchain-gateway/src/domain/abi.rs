//! # ABI Codec
//!
//! Solidity ABI encoding for the settlement contract and its token. Only the
//! shapes the contract uses are supported: `address`, unsigned integers and
//! dynamic `bytes`.

use super::entities::ChannelInfo;
use super::errors::GatewayError;
use shared_types::{Address, Signature, H256, U256};
use ur_01_crypto_protocol::keccak256;

/// First four bytes of keccak256 of the canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.as_bytes()[..4]);
    out
}

/// keccak256 of the canonical event signature.
pub fn event_topic(signature: &str) -> H256 {
    keccak256(signature.as_bytes())
}

// =============================================================================
// ENCODING
// =============================================================================

/// A single ABI argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    Bytes(Vec<u8>),
}

fn word_from_uint(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Encode arguments with head/tail layout.
pub fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Address(a) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(a.as_bytes());
                head.extend_from_slice(&word);
            }
            Token::Uint(v) => head.extend_from_slice(&word_from_uint(*v)),
            Token::Bytes(bytes) => {
                head.extend_from_slice(&word_from_uint(U256::from(head_len + tail.len())));
                tail.extend_from_slice(&word_from_uint(U256::from(bytes.len())));
                tail.extend_from_slice(bytes);
                let padding = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat(0u8).take(padding));
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Encode a function call: selector followed by the arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode_tokens(tokens));
    out
}

// =============================================================================
// DECODING
// =============================================================================

/// Random-access reader over ABI-encoded arguments.
#[derive(Debug, Clone, Copy)]
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], GatewayError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| GatewayError::Abi("offset overflow".into()))?;
        self.data
            .get(offset..end)
            .ok_or_else(|| GatewayError::Abi(format!("need {end} bytes, have {}", self.data.len())))
    }

    fn word(&self, index: usize) -> Result<&'a [u8], GatewayError> {
        self.slice(index * 32, 32)
    }

    pub fn uint(&self, index: usize) -> Result<U256, GatewayError> {
        Ok(U256::from_big_endian(self.word(index)?))
    }

    /// Unsigned integer that must fit in `bits`.
    pub fn uint_bits(&self, index: usize, bits: usize) -> Result<U256, GatewayError> {
        let value = self.uint(index)?;
        if bits < 256 && value >= (U256::one() << bits) {
            return Err(GatewayError::Abi(format!("argument {index} exceeds uint{bits}")));
        }
        Ok(value)
    }

    pub fn u32(&self, index: usize) -> Result<u32, GatewayError> {
        Ok(self.uint_bits(index, 32)?.low_u32())
    }

    pub fn address(&self, index: usize) -> Result<Address, GatewayError> {
        let word = self.word(index)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(GatewayError::Abi(format!("argument {index} is not an address")));
        }
        Ok(Address::from_slice(&word[12..]))
    }

    pub fn bytes32(&self, index: usize) -> Result<H256, GatewayError> {
        Ok(H256::from_slice(self.word(index)?))
    }

    /// Dynamic `bytes` argument whose offset is stored at `index`.
    pub fn bytes(&self, index: usize) -> Result<Vec<u8>, GatewayError> {
        let offset = self.uint(index)?;
        if offset > U256::from(self.data.len()) {
            return Err(GatewayError::Abi("bytes offset out of range".into()));
        }
        let offset = offset.as_usize();
        let len = U256::from_big_endian(self.slice(offset, 32)?);
        if len > U256::from(self.data.len()) {
            return Err(GatewayError::Abi("bytes length out of range".into()));
        }
        Ok(self.slice(offset + 32, len.as_usize())?.to_vec())
    }

    pub fn signature(&self, index: usize) -> Result<Signature, GatewayError> {
        let bytes = self.bytes(index)?;
        Signature::from_slice(&bytes).map_err(|e| GatewayError::Abi(e.to_string()))
    }
}

fn split_selector(data: &[u8]) -> Result<([u8; 4], AbiReader<'_>), GatewayError> {
    if data.len() < 4 {
        return Err(GatewayError::Abi("call data shorter than a selector".into()));
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    Ok((sel, AbiReader::new(&data[4..])))
}

// =============================================================================
// SETTLEMENT CONTRACT CALLS
// =============================================================================

const CREATE_CHANNEL: &str = "createChannel(address,uint192)";
const TOP_UP: &str = "topUpERC20(address,uint32,uint192)";
const UNCOOPERATIVE_CLOSE: &str = "uncooperativeClose(address,uint32,uint192)";
const COOPERATIVE_CLOSE: &str = "cooperativeClose(address,uint32,uint192,bytes,bytes)";
const SETTLE: &str = "settle(address,uint32)";
const WITHDRAW: &str = "withdraw(uint32,uint192,bytes)";
const GET_CHANNEL_INFO: &str = "getChannelInfo(address,address,uint32)";

/// A call to the settlement contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    CreateChannel {
        receiver: Address,
        deposit: U256,
    },
    TopUp {
        receiver: Address,
        open_block_number: u32,
        added_deposit: U256,
    },
    UncooperativeClose {
        receiver: Address,
        open_block_number: u32,
        balance: U256,
    },
    CooperativeClose {
        receiver: Address,
        open_block_number: u32,
        balance: U256,
        balance_signature: Signature,
        closing_signature: Signature,
    },
    Settle {
        receiver: Address,
        open_block_number: u32,
    },
    Withdraw {
        open_block_number: u32,
        balance: U256,
        balance_signature: Signature,
    },
    GetChannelInfo {
        sender: Address,
        receiver: Address,
        open_block_number: u32,
    },
}

fn block_token(block: u32) -> Token {
    Token::Uint(U256::from(block))
}

fn sig_token(sig: &Signature) -> Token {
    Token::Bytes(sig.to_bytes().to_vec())
}

impl ContractCall {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ContractCall::CreateChannel { receiver, deposit } => encode_call(
                CREATE_CHANNEL,
                &[Token::Address(*receiver), Token::Uint(*deposit)],
            ),
            ContractCall::TopUp {
                receiver,
                open_block_number,
                added_deposit,
            } => encode_call(
                TOP_UP,
                &[
                    Token::Address(*receiver),
                    block_token(*open_block_number),
                    Token::Uint(*added_deposit),
                ],
            ),
            ContractCall::UncooperativeClose {
                receiver,
                open_block_number,
                balance,
            } => encode_call(
                UNCOOPERATIVE_CLOSE,
                &[
                    Token::Address(*receiver),
                    block_token(*open_block_number),
                    Token::Uint(*balance),
                ],
            ),
            ContractCall::CooperativeClose {
                receiver,
                open_block_number,
                balance,
                balance_signature,
                closing_signature,
            } => encode_call(
                COOPERATIVE_CLOSE,
                &[
                    Token::Address(*receiver),
                    block_token(*open_block_number),
                    Token::Uint(*balance),
                    sig_token(balance_signature),
                    sig_token(closing_signature),
                ],
            ),
            ContractCall::Settle {
                receiver,
                open_block_number,
            } => encode_call(
                SETTLE,
                &[Token::Address(*receiver), block_token(*open_block_number)],
            ),
            ContractCall::Withdraw {
                open_block_number,
                balance,
                balance_signature,
            } => encode_call(
                WITHDRAW,
                &[
                    block_token(*open_block_number),
                    Token::Uint(*balance),
                    sig_token(balance_signature),
                ],
            ),
            ContractCall::GetChannelInfo {
                sender,
                receiver,
                open_block_number,
            } => encode_call(
                GET_CHANNEL_INFO,
                &[
                    Token::Address(*sender),
                    Token::Address(*receiver),
                    block_token(*open_block_number),
                ],
            ),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, GatewayError> {
        let (sel, args) = split_selector(data)?;

        let call = if sel == selector(CREATE_CHANNEL) {
            ContractCall::CreateChannel {
                receiver: args.address(0)?,
                deposit: args.uint_bits(1, 192)?,
            }
        } else if sel == selector(TOP_UP) {
            ContractCall::TopUp {
                receiver: args.address(0)?,
                open_block_number: args.u32(1)?,
                added_deposit: args.uint_bits(2, 192)?,
            }
        } else if sel == selector(UNCOOPERATIVE_CLOSE) {
            ContractCall::UncooperativeClose {
                receiver: args.address(0)?,
                open_block_number: args.u32(1)?,
                balance: args.uint_bits(2, 192)?,
            }
        } else if sel == selector(COOPERATIVE_CLOSE) {
            ContractCall::CooperativeClose {
                receiver: args.address(0)?,
                open_block_number: args.u32(1)?,
                balance: args.uint_bits(2, 192)?,
                balance_signature: args.signature(3)?,
                closing_signature: args.signature(4)?,
            }
        } else if sel == selector(SETTLE) {
            ContractCall::Settle {
                receiver: args.address(0)?,
                open_block_number: args.u32(1)?,
            }
        } else if sel == selector(WITHDRAW) {
            ContractCall::Withdraw {
                open_block_number: args.u32(0)?,
                balance: args.uint_bits(1, 192)?,
                balance_signature: args.signature(2)?,
            }
        } else if sel == selector(GET_CHANNEL_INFO) {
            ContractCall::GetChannelInfo {
                sender: args.address(0)?,
                receiver: args.address(1)?,
                open_block_number: args.u32(2)?,
            }
        } else {
            return Err(GatewayError::Abi(format!(
                "unknown contract selector 0x{}",
                hex::encode(sel)
            )));
        };
        Ok(call)
    }
}

// =============================================================================
// TOKEN CALLS
// =============================================================================

const TRANSFER_WITH_DATA: &str = "transfer(address,uint256,bytes)";
const TRANSFER: &str = "transfer(address,uint256)";
const TRANSFER_FROM: &str = "transferFrom(address,address,uint256)";
const APPROVE: &str = "approve(address,uint256)";
const BALANCE_OF: &str = "balanceOf(address)";

/// A call to the ERC20/ERC223 token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCall {
    /// ERC223 transfer carrying a payload for the recipient contract
    TransferWithData {
        to: Address,
        value: U256,
        data: Vec<u8>,
    },
    Transfer {
        to: Address,
        value: U256,
    },
    TransferFrom {
        from: Address,
        to: Address,
        value: U256,
    },
    Approve {
        spender: Address,
        value: U256,
    },
    BalanceOf {
        owner: Address,
    },
}

impl TokenCall {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TokenCall::TransferWithData { to, value, data } => encode_call(
                TRANSFER_WITH_DATA,
                &[
                    Token::Address(*to),
                    Token::Uint(*value),
                    Token::Bytes(data.clone()),
                ],
            ),
            TokenCall::Transfer { to, value } => {
                encode_call(TRANSFER, &[Token::Address(*to), Token::Uint(*value)])
            }
            TokenCall::TransferFrom { from, to, value } => encode_call(
                TRANSFER_FROM,
                &[
                    Token::Address(*from),
                    Token::Address(*to),
                    Token::Uint(*value),
                ],
            ),
            TokenCall::Approve { spender, value } => {
                encode_call(APPROVE, &[Token::Address(*spender), Token::Uint(*value)])
            }
            TokenCall::BalanceOf { owner } => encode_call(BALANCE_OF, &[Token::Address(*owner)]),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, GatewayError> {
        let (sel, args) = split_selector(data)?;

        let call = if sel == selector(TRANSFER_WITH_DATA) {
            TokenCall::TransferWithData {
                to: args.address(0)?,
                value: args.uint(1)?,
                data: args.bytes(2)?,
            }
        } else if sel == selector(TRANSFER) {
            TokenCall::Transfer {
                to: args.address(0)?,
                value: args.uint(1)?,
            }
        } else if sel == selector(TRANSFER_FROM) {
            TokenCall::TransferFrom {
                from: args.address(0)?,
                to: args.address(1)?,
                value: args.uint(2)?,
            }
        } else if sel == selector(APPROVE) {
            TokenCall::Approve {
                spender: args.address(0)?,
                value: args.uint(1)?,
            }
        } else if sel == selector(BALANCE_OF) {
            TokenCall::BalanceOf {
                owner: args.address(0)?,
            }
        } else {
            return Err(GatewayError::Abi(format!(
                "unknown token selector 0x{}",
                hex::encode(sel)
            )));
        };
        Ok(call)
    }
}

/// Payload that opens a channel through an ERC223 transfer: the receiver.
pub fn open_payload(receiver: Address) -> Vec<u8> {
    receiver.as_bytes().to_vec()
}

/// Payload that tops up a channel: receiver followed by big-endian open block.
pub fn topup_payload(receiver: Address, open_block_number: u32) -> Vec<u8> {
    let mut out = receiver.as_bytes().to_vec();
    out.extend_from_slice(&open_block_number.to_be_bytes());
    out
}

/// Decode the five-word `getChannelInfo` return value.
pub fn decode_channel_info(data: &[u8]) -> Result<ChannelInfo, GatewayError> {
    let r = AbiReader::new(data);
    Ok(ChannelInfo {
        key: r.bytes32(0)?,
        deposit: r.uint(1)?,
        settle_block_number: r.u32(2)?,
        closing_balance: r.uint(3)?,
        transferred_tokens: r.uint(4)?,
    })
}

/// Encode a `getChannelInfo` return value.
pub fn encode_channel_info(info: &ChannelInfo) -> Vec<u8> {
    let mut out = info.key.as_bytes().to_vec();
    out.extend_from_slice(&encode_tokens(&[
        Token::Uint(info.deposit),
        Token::Uint(U256::from(info.settle_block_number)),
        Token::Uint(info.closing_balance),
        Token::Uint(info.transferred_tokens),
    ]));
    out
}
