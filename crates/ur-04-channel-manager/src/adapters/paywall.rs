//! # Paywall Header Boundary
//!
//! Maps the `RDN-*` payment headers of a request onto the channel manager
//! and its verdict back onto an HTTP status plus response headers. The
//! serving layer (proxy, router) stays outside this crate; it only forwards
//! the request's `HeaderMap` and copies the decision into its response.

use crate::domain::errors::ManagerError;
use crate::service::ChannelManager;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use shared_types::{parse_address, parse_amount, to_checksum, Address, Signature, U256};
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Payment protocol header names.
///
/// `http` stores header names lowercased; peers may send any casing.
pub mod header {
    // Offer
    pub const PRICE: &str = "rdn-price";
    pub const CONTRACT_ADDRESS: &str = "rdn-contract-address";
    pub const RECEIVER_ADDRESS: &str = "rdn-receiver-address";
    pub const TOKEN_ADDRESS: &str = "rdn-token-address";

    // Balance proof
    pub const SENDER_ADDRESS: &str = "rdn-sender-address";
    pub const OPEN_BLOCK: &str = "rdn-open-block";
    pub const BALANCE: &str = "rdn-balance";
    pub const BALANCE_SIGNATURE: &str = "rdn-balance-signature";

    // Channel state echoed back
    pub const SENDER_BALANCE: &str = "rdn-sender-balance";
    pub const COST: &str = "rdn-cost";

    // Rejections
    pub const INSUFFICIENT_CONFIRMATIONS: &str = "rdn-insufficient-confirmations";
    pub const NONEXISTING_CHANNEL: &str = "rdn-nonexisting-channel";
    pub const INVALID_BALANCE_PROOF: &str = "rdn-invalid-balance-proof";
    pub const INVALID_AMOUNT: &str = "rdn-invalid-amount";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("missing header {0}")]
    Missing(&'static str),

    #[error("malformed header {name}: {reason}")]
    Malformed { name: &'static str, reason: String },
}

fn put(headers: &mut HeaderMap, name: &'static str, value: impl Display) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn get<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, HeaderError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str().map(str::trim).map_err(|e| HeaderError::Malformed {
                name,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn require<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, HeaderError> {
    get(headers, name)?.ok_or(HeaderError::Missing(name))
}

fn malformed(name: &'static str) -> impl Fn(shared_types::ParseError) -> HeaderError {
    move |e| HeaderError::Malformed {
        name,
        reason: e.to_string(),
    }
}

/// A balance proof as carried in request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentHeaders {
    pub sender: Address,
    pub open_block_number: u32,
    pub balance: U256,
    pub signature: Signature,
}

impl PaymentHeaders {
    /// Decode the proof headers.
    ///
    /// `Ok(None)` when the request carries no signature at all; any other
    /// missing or unparsable field is an error.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, HeaderError> {
        let Some(signature) = get(headers, header::BALANCE_SIGNATURE)? else {
            return Ok(None);
        };
        let signature = signature
            .parse::<Signature>()
            .map_err(malformed(header::BALANCE_SIGNATURE))?;
        let sender =
            parse_address(require(headers, header::SENDER_ADDRESS)?).map_err(malformed(header::SENDER_ADDRESS))?;
        let balance = parse_amount(require(headers, header::BALANCE)?).map_err(malformed(header::BALANCE))?;
        let open_block_number = require(headers, header::OPEN_BLOCK)?
            .parse::<u32>()
            .map_err(|e| HeaderError::Malformed {
                name: header::OPEN_BLOCK,
                reason: e.to_string(),
            })?;

        Ok(Some(Self {
            sender,
            open_block_number,
            balance,
            signature,
        }))
    }

    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.write_to(&mut headers);
        headers
    }

    pub fn write_to(&self, headers: &mut HeaderMap) {
        put(headers, header::SENDER_ADDRESS, to_checksum(&self.sender));
        put(headers, header::OPEN_BLOCK, self.open_block_number);
        put(headers, header::BALANCE, self.balance);
        put(headers, header::BALANCE_SIGNATURE, self.signature.to_hex());
    }
}

/// Outcome of a paywall check.
#[derive(Debug, Clone)]
pub struct PaywallDecision {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl PaywallDecision {
    fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// Whether the resource may be served.
    pub fn is_paid(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Whether the given rejection header is set.
    pub fn has_flag(&self, name: &'static str) -> bool {
        self.headers.contains_key(name)
    }
}

/// Per-request payment gate in front of a priced resource.
pub struct Paywall {
    manager: Arc<ChannelManager>,
    eth_balance_limit: Option<U256>,
}

impl Paywall {
    pub fn new(manager: Arc<ChannelManager>) -> Self {
        Self {
            manager,
            eth_balance_limit: None,
        }
    }

    /// Refuse service while the receiver cannot pay for closing transactions.
    pub fn with_eth_balance_limit(mut self, limit: U256) -> Self {
        self.eth_balance_limit = Some(limit);
        self
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    fn offer(&self, price: U256) -> HeaderMap {
        let mut headers = HeaderMap::new();
        put(&mut headers, header::PRICE, price);
        put(&mut headers, header::RECEIVER_ADDRESS, to_checksum(&self.manager.receiver_address()));
        put(&mut headers, header::CONTRACT_ADDRESS, to_checksum(&self.manager.contract_address()));
        put(&mut headers, header::TOKEN_ADDRESS, to_checksum(&self.manager.token_address()));
        headers
    }

    /// Decide whether a request for a resource costing `price` is paid for.
    pub async fn check(&self, price: U256, request: &HeaderMap) -> PaywallDecision {
        if !self.manager.node_online() {
            return PaywallDecision::new(StatusCode::BAD_GATEWAY, HeaderMap::new());
        }
        if let Some(limit) = self.eth_balance_limit {
            match self.manager.eth_balance().await {
                Ok(balance) if balance >= limit => {}
                Ok(balance) => {
                    debug!("[ur-04] Refusing service, receiver ether balance {} below {}", balance, limit);
                    return PaywallDecision::new(StatusCode::BAD_GATEWAY, HeaderMap::new());
                }
                Err(_) => return PaywallDecision::new(StatusCode::BAD_GATEWAY, HeaderMap::new()),
            }
        }
        if price.is_zero() {
            return PaywallDecision::new(StatusCode::OK, HeaderMap::new());
        }

        let mut headers = self.offer(price);
        let proof = match PaymentHeaders::from_headers(request) {
            Ok(Some(proof)) => proof,
            Ok(None) => return PaywallDecision::new(StatusCode::PAYMENT_REQUIRED, headers),
            Err(e) => {
                debug!("[ur-04] Refused payment: {}", e);
                put(&mut headers, header::INVALID_BALANCE_PROOF, 1);
                return PaywallDecision::new(StatusCode::PAYMENT_REQUIRED, headers);
            }
        };

        let channel = match self
            .manager
            .verify_balance_proof(proof.sender, proof.open_block_number, proof.balance, &proof.signature)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                reject(&mut headers, &e, &proof);
                return PaywallDecision::new(StatusCode::PAYMENT_REQUIRED, headers);
            }
        };

        put(&mut headers, header::SENDER_ADDRESS, to_checksum(&channel.sender));
        put(&mut headers, header::SENDER_BALANCE, channel.balance);

        // A zero delta is a replayed proof; register_payment rejects it
        let sent = proof.balance.saturating_sub(channel.balance);
        if proof.balance < channel.balance || (!sent.is_zero() && sent != price) {
            debug!(
                "[ur-04] Refused payment: sent {} for price {} (sender {:?}, block {})",
                sent, price, proof.sender, proof.open_block_number
            );
            put(&mut headers, header::INVALID_AMOUNT, 1);
            return PaywallDecision::new(StatusCode::PAYMENT_REQUIRED, headers);
        }

        match self
            .manager
            .register_payment(proof.sender, proof.open_block_number, proof.balance, proof.signature)
            .await
        {
            Ok(_) => {
                put(&mut headers, header::SENDER_BALANCE, proof.balance);
                put(&mut headers, header::COST, price);
                PaywallDecision::new(StatusCode::OK, headers)
            }
            Err(e) => {
                reject(&mut headers, &e, &proof);
                PaywallDecision::new(StatusCode::PAYMENT_REQUIRED, headers)
            }
        }
    }
}

fn reject(headers: &mut HeaderMap, error: &ManagerError, proof: &PaymentHeaders) {
    debug!(
        "[ur-04] Refused payment: {} (sender {:?}, block {})",
        error, proof.sender, proof.open_block_number
    );
    let flag = match error {
        ManagerError::InsufficientConfirmations { .. } => header::INSUFFICIENT_CONFIRMATIONS,
        ManagerError::NoOpenChannel { .. } => header::NONEXISTING_CHANNEL,
        ManagerError::InvalidBalanceAmount(_) => header::INVALID_AMOUNT,
        _ => header::INVALID_BALANCE_PROOF,
    };
    put(headers, flag, 1);
}
