//! # Simulated Chain
//!
//! In-process chain running the settlement contract and its ERC223 token.
//!
//! Every accepted transaction is mined into its own block (auto-mining).
//! Transactions are real EIP-155 signed payloads: the sender is recovered
//! from the signature, nonces and chain id are checked, and gas is paid
//! from the sender's ether balance. A reverted call is rejected at
//! submission and leaves no trace on the chain.
//!
//! ## Contract Rules
//!
//! - ERC223 transfer to the contract with a 20-byte payload opens a channel,
//!   a 24-byte payload (receiver + big-endian open block) tops one up;
//!   zero-value transfers revert
//! - `createChannel` / `topUpERC20` pull tokens through an allowance
//! - `uncooperativeClose` (sender only) starts the challenge period
//! - `settle` (sender only) succeeds from `settle_block_number` on
//! - `cooperativeClose` needs the sender's balance proof and the receiver's
//!   closing signature and settles immediately
//! - `withdraw` (receiver only) pays out the proven balance minus what was
//!   already withdrawn, without closing
//!
//! ## Test Controls
//!
//! `fund_ether`, `mint_tokens`, `mine`, `reorg` and `set_offline`. Funding
//! helpers rewrite every block's state, so allocations survive reorgs.

use crate::config::NetworkConfig;
use crate::domain::abi::{ContractCall, TokenCall};
use crate::domain::entities::{ChannelEvent, ChannelInfo, EventKind, EventLog, LogFilter, RawLog};
use crate::domain::errors::GatewayError;
use crate::ports::outbound::SettlementGateway;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{max_uint192, Address, BlockHash, BlockNumber, TxHash, H256, U256};
use std::collections::HashMap;
use tracing::debug;
use ur_01_crypto_protocol::{
    keccak256, recover_transaction_sender, verify_balance_proof, verify_closing_signature,
};

type ChannelId = (Address, Address, u32);

/// On-chain record of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SimChannel {
    deposit: U256,
    settle_block_number: u32,
    closing_balance: U256,
    withdrawn: U256,
}

/// World state after a block.
#[derive(Debug, Clone, Default)]
struct Ledger {
    ether: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    tokens: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    channels: HashMap<ChannelId, SimChannel>,
}

impl Ledger {
    fn tokens_of(&self, owner: &Address) -> U256 {
        self.tokens.get(owner).copied().unwrap_or_default()
    }

    fn ether_of(&self, owner: &Address) -> U256 {
        self.ether.get(owner).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct Block {
    number: BlockNumber,
    hash: BlockHash,
    logs: Vec<RawLog>,
    state: Ledger,
}

#[derive(Debug)]
struct ChainState {
    blocks: Vec<Block>,
    ledger: Ledger,
    /// Bumped on every reorg so replacement blocks get fresh hashes
    fork: u64,
    offline: bool,
}

impl ChainState {
    fn head(&self) -> &Block {
        // The genesis block is never removed
        &self.blocks[self.blocks.len() - 1]
    }

    fn seal(&mut self, logs: Vec<RawLog>) -> BlockNumber {
        let parent = self.head().hash;
        let number = self.head().number + 1;

        let mut preimage = parent.as_bytes().to_vec();
        preimage.extend_from_slice(&number.to_be_bytes());
        preimage.extend_from_slice(&self.fork.to_be_bytes());

        self.blocks.push(Block {
            number,
            hash: keccak256(&preimage),
            logs,
            state: self.ledger.clone(),
        });
        number
    }
}

/// Execution context for one transaction.
struct Exec<'a> {
    ledger: &'a mut Ledger,
    config: &'a NetworkConfig,
    block: BlockNumber,
    from: Address,
    events: Vec<ChannelEvent>,
}

fn revert<T>(reason: &str) -> Result<T, GatewayError> {
    Err(GatewayError::Reverted(reason.to_string()))
}

impl Exec<'_> {
    fn move_tokens(&mut self, from: Address, to: Address, value: U256) -> Result<(), GatewayError> {
        let balance = self.ledger.tokens_of(&from);
        if balance < value {
            return revert("insufficient token balance");
        }
        self.ledger.tokens.insert(from, balance - value);
        let to_balance = self.ledger.tokens_of(&to);
        self.ledger.tokens.insert(to, to_balance + value);
        Ok(())
    }

    fn pull_allowance(&mut self, owner: Address, spender: Address, value: U256) -> Result<(), GatewayError> {
        let allowance = self
            .ledger
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default();
        if allowance < value {
            return revert("allowance exceeded");
        }
        self.ledger.allowances.insert((owner, spender), allowance - value);
        self.move_tokens(owner, self.config.contract_address, value)
    }

    fn current_block_u32(&self) -> Result<u32, GatewayError> {
        u32::try_from(self.block).or_else(|_| revert("block number exceeds uint32"))
    }

    fn channel_mut(&mut self, id: &ChannelId) -> Result<&mut SimChannel, GatewayError> {
        match self.ledger.channels.get_mut(id) {
            Some(c) => Ok(c),
            None => revert("channel does not exist"),
        }
    }

    // -------------------------------------------------------------------------
    // Token
    // -------------------------------------------------------------------------

    fn token_call(&mut self, call: TokenCall) -> Result<(), GatewayError> {
        match call {
            TokenCall::TransferWithData { to, value, data } => {
                self.move_tokens(self.from, to, value)?;
                if to == self.config.contract_address {
                    self.token_fallback(self.from, value, &data)?;
                }
                Ok(())
            }
            TokenCall::Transfer { to, value } => {
                self.move_tokens(self.from, to, value)?;
                if to == self.config.contract_address {
                    // ERC223 invokes the fallback with an empty payload
                    self.token_fallback(self.from, value, &[])?;
                }
                Ok(())
            }
            TokenCall::TransferFrom { from, to, value } => {
                let allowance = self
                    .ledger
                    .allowances
                    .get(&(from, self.from))
                    .copied()
                    .unwrap_or_default();
                if allowance < value {
                    return revert("allowance exceeded");
                }
                self.ledger.allowances.insert((from, self.from), allowance - value);
                self.move_tokens(from, to, value)
            }
            TokenCall::Approve { spender, value } => {
                self.ledger.allowances.insert((self.from, spender), value);
                Ok(())
            }
            TokenCall::BalanceOf { .. } => Ok(()),
        }
    }

    fn token_fallback(&mut self, sender: Address, value: U256, data: &[u8]) -> Result<(), GatewayError> {
        if value.is_zero() {
            return revert("zero-value transfer");
        }
        match data.len() {
            20 => self.create_channel(sender, Address::from_slice(data), value),
            24 => {
                let receiver = Address::from_slice(&data[..20]);
                let mut block = [0u8; 4];
                block.copy_from_slice(&data[20..]);
                self.top_up(sender, receiver, u32::from_be_bytes(block), value)
            }
            _ => revert("unexpected payload length"),
        }
    }

    // -------------------------------------------------------------------------
    // Settlement contract
    // -------------------------------------------------------------------------

    fn contract_call(&mut self, call: ContractCall) -> Result<(), GatewayError> {
        match call {
            ContractCall::CreateChannel { receiver, deposit } => {
                self.pull_allowance(self.from, self.config.contract_address, deposit)?;
                self.create_channel(self.from, receiver, deposit)
            }
            ContractCall::TopUp {
                receiver,
                open_block_number,
                added_deposit,
            } => {
                self.pull_allowance(self.from, self.config.contract_address, added_deposit)?;
                self.top_up(self.from, receiver, open_block_number, added_deposit)
            }
            ContractCall::UncooperativeClose {
                receiver,
                open_block_number,
                balance,
            } => self.uncooperative_close(receiver, open_block_number, balance),
            ContractCall::CooperativeClose {
                receiver,
                open_block_number,
                balance,
                balance_signature,
                closing_signature,
            } => {
                let contract = self.config.contract_address;
                let sender = verify_balance_proof(
                    receiver,
                    open_block_number,
                    balance,
                    &balance_signature,
                    contract,
                )
                .or_else(|_| revert("invalid balance proof"))?;
                let closer = verify_closing_signature(
                    sender,
                    open_block_number,
                    balance,
                    &closing_signature,
                    contract,
                )
                .or_else(|_| revert("invalid closing signature"))?;
                if closer != receiver {
                    return revert("closing signature is not the receiver's");
                }
                let id = (sender, receiver, open_block_number);
                if balance > self.channel_mut(&id)?.deposit {
                    return revert("balance exceeds deposit");
                }
                self.settle_channel(id, balance)
            }
            ContractCall::Settle {
                receiver,
                open_block_number,
            } => {
                let id = (self.from, receiver, open_block_number);
                let block = self.current_block_u32()?;
                let channel = self.channel_mut(&id)?;
                if channel.settle_block_number == 0 {
                    return revert("no close requested");
                }
                if block < channel.settle_block_number {
                    return revert("challenge period not over");
                }
                let balance = channel.closing_balance;
                self.settle_channel(id, balance)
            }
            ContractCall::Withdraw {
                open_block_number,
                balance,
                balance_signature,
            } => self.withdraw(open_block_number, balance, &balance_signature),
            ContractCall::GetChannelInfo { .. } => Ok(()),
        }
    }

    fn create_channel(&mut self, sender: Address, receiver: Address, deposit: U256) -> Result<(), GatewayError> {
        if deposit.is_zero() || deposit > max_uint192() {
            return revert("invalid deposit");
        }
        let id = (sender, receiver, self.current_block_u32()?);
        if self.ledger.channels.contains_key(&id) {
            return revert("channel already exists");
        }
        self.ledger.channels.insert(
            id,
            SimChannel {
                deposit,
                settle_block_number: 0,
                closing_balance: U256::zero(),
                withdrawn: U256::zero(),
            },
        );
        self.events.push(ChannelEvent::Created {
            sender,
            receiver,
            deposit,
        });
        Ok(())
    }

    fn top_up(
        &mut self,
        sender: Address,
        receiver: Address,
        open_block_number: u32,
        added_deposit: U256,
    ) -> Result<(), GatewayError> {
        if added_deposit.is_zero() {
            return revert("zero top up");
        }
        let channel = self.channel_mut(&(sender, receiver, open_block_number))?;
        if channel.settle_block_number != 0 {
            return revert("channel is closing");
        }
        let deposit = channel.deposit + added_deposit;
        if deposit > max_uint192() {
            return revert("deposit exceeds uint192");
        }
        channel.deposit = deposit;
        self.events.push(ChannelEvent::ToppedUp {
            sender,
            receiver,
            open_block_number,
            added_deposit,
            deposit,
        });
        Ok(())
    }

    fn uncooperative_close(
        &mut self,
        receiver: Address,
        open_block_number: u32,
        balance: U256,
    ) -> Result<(), GatewayError> {
        let settle_block = self
            .current_block_u32()?
            .checked_add(self.config.challenge_period)
            .ok_or_else(|| GatewayError::Reverted("settle block overflow".into()))?;
        let sender = self.from;
        let channel = self.channel_mut(&(sender, receiver, open_block_number))?;
        if channel.settle_block_number != 0 {
            return revert("close already requested");
        }
        if balance > channel.deposit {
            return revert("balance exceeds deposit");
        }
        channel.settle_block_number = settle_block;
        channel.closing_balance = balance;
        self.events.push(ChannelEvent::CloseRequested {
            sender,
            receiver,
            open_block_number,
            balance,
        });
        Ok(())
    }

    fn withdraw(
        &mut self,
        open_block_number: u32,
        balance: U256,
        balance_signature: &shared_types::Signature,
    ) -> Result<(), GatewayError> {
        let receiver = self.from;
        let sender = verify_balance_proof(
            receiver,
            open_block_number,
            balance,
            balance_signature,
            self.config.contract_address,
        )
        .or_else(|_| revert("invalid balance proof"))?;

        let channel = self.channel_mut(&(sender, receiver, open_block_number))?;
        if channel.settle_block_number != 0 {
            return revert("channel is closing");
        }
        if balance > channel.deposit {
            return revert("balance exceeds deposit");
        }
        if balance <= channel.withdrawn {
            return revert("nothing to withdraw");
        }
        let amount = balance - channel.withdrawn;
        channel.withdrawn = balance;

        self.move_tokens(self.config.contract_address, receiver, amount)?;
        self.events.push(ChannelEvent::Withdraw {
            sender,
            receiver,
            open_block_number,
            withdrawn_balance: amount,
        });
        Ok(())
    }

    fn settle_channel(&mut self, id: ChannelId, balance: U256) -> Result<(), GatewayError> {
        let channel = match self.ledger.channels.remove(&id) {
            Some(c) => c,
            None => return revert("channel does not exist"),
        };
        if balance < channel.withdrawn {
            return revert("balance below withdrawn amount");
        }
        let (sender, receiver, open_block_number) = id;
        let receiver_tokens = balance - channel.withdrawn;
        let contract = self.config.contract_address;

        self.move_tokens(contract, receiver, receiver_tokens)?;
        self.move_tokens(contract, sender, channel.deposit - balance)?;
        self.events.push(ChannelEvent::Settled {
            sender,
            receiver,
            open_block_number,
            balance,
            receiver_tokens,
        });
        Ok(())
    }
}

/// In-process chain with the settlement contract's rules.
#[derive(Debug)]
pub struct SimulatedChain {
    config: NetworkConfig,
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    /// Create a chain holding only the genesis block.
    pub fn new(config: NetworkConfig) -> Self {
        let genesis = Block {
            number: 0,
            hash: keccak256(b"uraiden simulated genesis"),
            logs: Vec::new(),
            state: Ledger::default(),
        };
        Self {
            config,
            state: Mutex::new(ChainState {
                blocks: vec![genesis],
                ledger: Ledger::default(),
                fork: 0,
                offline: false,
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn allocate(&self, apply: impl Fn(&mut Ledger)) {
        let mut state = self.state.lock();
        apply(&mut state.ledger);
        for block in state.blocks.iter_mut() {
            apply(&mut block.state);
        }
    }

    /// Credit ether to an account.
    pub fn fund_ether(&self, address: Address, amount: U256) {
        self.allocate(|ledger| {
            let balance = ledger.ether_of(&address);
            ledger.ether.insert(address, balance + amount);
        });
    }

    /// Mint channel tokens to an account.
    pub fn mint_tokens(&self, address: Address, amount: U256) {
        self.allocate(|ledger| {
            let balance = ledger.tokens_of(&address);
            ledger.tokens.insert(address, balance + amount);
        });
    }

    /// Mine `count` empty blocks.
    pub fn mine(&self, count: u64) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.seal(Vec::new());
        }
    }

    /// Drop the newest `depth` blocks and every transaction in them.
    pub fn reorg(&self, depth: u64) {
        let mut state = self.state.lock();
        let keep = state.blocks.len().saturating_sub(depth as usize).max(1);
        state.blocks.truncate(keep);
        state.ledger = state.head().state.clone();
        state.fork += 1;
        debug!("[ur-02] Simulated reorg: head now {}", state.head().number);
    }

    /// Make every gateway call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    fn check_online(state: &ChainState) -> Result<(), GatewayError> {
        if state.offline {
            return Err(GatewayError::Transport("simulated node offline".into()));
        }
        Ok(())
    }

    fn execute(&self, raw: &[u8]) -> Result<TxHash, GatewayError> {
        let decoded = recover_transaction_sender(raw)?;
        let tx = &decoded.transaction;
        let from = decoded.sender;

        let mut state = self.state.lock();
        Self::check_online(&state)?;

        if decoded.chain_id != Some(self.config.chain_id) {
            return Err(GatewayError::Rpc {
                code: -32000,
                message: format!("invalid chain id {:?}", decoded.chain_id),
            });
        }
        let expected_nonce = state.ledger.nonces.get(&from).copied().unwrap_or_default();
        if tx.nonce != expected_nonce {
            return Err(GatewayError::Rpc {
                code: -32000,
                message: format!("invalid nonce: expected {expected_nonce}, got {}", tx.nonce),
            });
        }
        let gas_cost = tx.gas_price * U256::from(tx.gas_limit);
        let available = state.ledger.ether_of(&from);
        if available < gas_cost + tx.value {
            return Err(GatewayError::InsufficientFunds(format!(
                "{from:?} has {available}, needs {}",
                gas_cost + tx.value
            )));
        }

        let block = state.head().number + 1;
        let mut scratch = state.ledger.clone();
        scratch.ether.insert(from, available - gas_cost - tx.value);
        scratch.nonces.insert(from, expected_nonce + 1);

        let mut exec = Exec {
            ledger: &mut scratch,
            config: &self.config,
            block,
            from,
            events: Vec::new(),
        };
        match tx.to {
            Some(to) if to == self.config.contract_address => {
                exec.contract_call(ContractCall::decode(&tx.data)?)?
            }
            Some(to) if to == self.config.token_address => exec.token_call(TokenCall::decode(&tx.data)?)?,
            Some(to) => {
                let balance = exec.ledger.ether_of(&to);
                exec.ledger.ether.insert(to, balance + tx.value);
            }
            None => return revert("contract creation is not supported"),
        }

        let logs = exec
            .events
            .iter()
            .enumerate()
            .map(|(i, event)| {
                let (topics, data) = event.encode();
                RawLog {
                    address: self.config.contract_address,
                    topics,
                    data,
                    block_number: block,
                    transaction_hash: decoded.hash,
                    log_index: i as u64,
                }
            })
            .collect();

        state.ledger = scratch;
        let mined = state.seal(logs);
        debug!("[ur-02] Mined tx {:?} from {:?} in block {}", decoded.hash, from, mined);
        Ok(decoded.hash)
    }
}

fn channel_key_hash(sender: Address, receiver: Address, open_block_number: u32) -> H256 {
    let mut preimage = Vec::with_capacity(44);
    preimage.extend_from_slice(sender.as_bytes());
    preimage.extend_from_slice(receiver.as_bytes());
    preimage.extend_from_slice(&open_block_number.to_be_bytes());
    keccak256(&preimage)
}

#[async_trait]
impl SettlementGateway for SimulatedChain {
    fn contract_address(&self) -> Address {
        self.config.contract_address
    }

    fn token_address(&self) -> Address {
        self.config.token_address
    }

    async fn block_number(&self) -> Result<BlockNumber, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.head().number)
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.blocks.get(number as usize).map(|b| b.hash))
    }

    async fn block_exists(&self, hash: BlockHash) -> Result<bool, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.blocks.iter().any(|b| b.hash == hash))
    }

    async fn network_id(&self) -> Result<u64, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(self.config.chain_id)
    }

    async fn channel_info(
        &self,
        sender: Address,
        receiver: Address,
        open_block_number: u32,
    ) -> Result<Option<ChannelInfo>, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state
            .ledger
            .channels
            .get(&(sender, receiver, open_block_number))
            .map(|c| ChannelInfo {
                key: channel_key_hash(sender, receiver, open_block_number),
                deposit: c.deposit,
                settle_block_number: c.settle_block_number,
                closing_balance: c.closing_balance,
                transferred_tokens: c.withdrawn,
            }))
    }

    async fn query_logs(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        to_block: BlockNumber,
        filter: &LogFilter,
    ) -> Result<Vec<EventLog>, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;

        let topic = kind.topic();
        let mut events = Vec::new();
        for block in state
            .blocks
            .iter()
            .filter(|b| b.number >= from_block && b.number <= to_block)
        {
            for raw in block.logs.iter().filter(|l| l.topics.first() == Some(&topic)) {
                let log = EventLog::decode(raw)?;
                if filter.matches(&log) {
                    events.push(log);
                }
            }
        }
        Ok(events)
    }

    async fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxHash, GatewayError> {
        self.execute(&raw)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.ledger.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.ledger.ether_of(&address))
    }

    async fn token_balance(&self, address: Address) -> Result<U256, GatewayError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.ledger.tokens_of(&address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mine_and_hashes() {
        let chain = SimulatedChain::new(NetworkConfig::for_testing());
        chain.mine(3);
        assert_eq!(chain.block_number().await.unwrap(), 3);

        let h2 = chain.block_hash(2).await.unwrap().unwrap();
        assert!(chain.block_exists(h2).await.unwrap());
        assert_eq!(chain.block_hash(4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reorg_replaces_hashes() {
        let chain = SimulatedChain::new(NetworkConfig::for_testing());
        chain.mine(5);
        let old = chain.block_hash(4).await.unwrap().unwrap();

        chain.reorg(2);
        assert_eq!(chain.block_number().await.unwrap(), 3);
        assert!(!chain.block_exists(old).await.unwrap());

        chain.mine(2);
        let new = chain.block_hash(4).await.unwrap().unwrap();
        assert_ne!(old, new);
    }

    #[tokio::test]
    async fn test_reorg_never_drops_genesis() {
        let chain = SimulatedChain::new(NetworkConfig::for_testing());
        chain.mine(1);
        chain.reorg(10);
        assert_eq!(chain.block_number().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let chain = SimulatedChain::new(NetworkConfig::for_testing());
        chain.set_offline(true);
        assert!(chain.block_number().await.unwrap_err().is_transient());
        chain.set_offline(false);
        assert!(chain.block_number().await.is_ok());
    }

    #[tokio::test]
    async fn test_funding_survives_reorg() {
        let chain = SimulatedChain::new(NetworkConfig::for_testing());
        chain.mine(2);
        let who = Address::repeat_byte(0x42);
        chain.fund_ether(who, U256::from(5u64));
        chain.reorg(2);
        assert_eq!(chain.balance(who).await.unwrap(), U256::from(5u64));
    }

    #[tokio::test]
    async fn test_garbage_transaction_rejected() {
        let chain = SimulatedChain::new(NetworkConfig::for_testing());
        let err = chain.submit_transaction(vec![0x01, 0x02]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Signature(_)));
    }
}
