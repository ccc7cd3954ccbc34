//! # Network Configuration
//!
//! Per-network contract addresses and transaction defaults, injected at
//! construction instead of living in a process-wide table.

use serde::{Deserialize, Serialize};
use shared_types::{parse_address, Address, BlockNumber, U256};

/// 1 gwei in wei.
const GWEI: u64 = 1_000_000_000;

/// Chain id used by in-process test chains.
pub const TEST_CHAIN_ID: u64 = 65536;

/// Settlement network configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// EIP-155 chain id, also used as the network id
    pub chain_id: u64,

    /// Address of the settlement contract.
    pub contract_address: Address,

    /// Address of the ERC223 token the channels are denominated in.
    pub token_address: Address,

    /// Gas price for every submitted transaction, in wei.
    pub gas_price: U256,

    /// Gas limit for contract calls.
    pub gas_limit: u64,

    /// Gas limit for plain value transfers.
    pub transfer_gas_limit: u64,

    /// First block worth scanning for contract events.
    pub start_block: BlockNumber,

    /// Blocks between an uncooperative close and the earliest settle.
    pub challenge_period: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            contract_address: Address::zero(),
            token_address: Address::zero(),
            gas_price: U256::from(20 * GWEI),
            gas_limit: 130_000,
            transfer_gas_limit: 21_000,
            start_block: 0,
            challenge_period: 500,
        }
    }
}

impl NetworkConfig {
    /// Known deployments of the settlement contract.
    ///
    /// Token addresses are not part of the preset and must be supplied.
    pub fn for_chain(chain_id: u64) -> Option<Self> {
        let (contract, start_block) = match chain_id {
            1 => ("0x1440317CB15499083dEE3dDf49C2bD51D0d92e33", 4_958_602),
            3 => ("0x74434527b8E6C8296506D61d0faF3D18c9e4649A", 2_507_629),
            4 => ("0xbEc8fb898E6Da01152576d1A1ACdd2c957E56fb1", 1_642_336),
            42 => ("0xeD94E711e9DE1FF1E7dd34C39F0d4338A6A6ef92", 5_523_491),
            _ => return None,
        };
        Some(Self {
            chain_id,
            contract_address: parse_address(contract).ok()?,
            start_block,
            ..Self::default()
        })
    }

    /// Create a config for testing (short challenge period, cheap gas).
    pub fn for_testing() -> Self {
        Self {
            chain_id: TEST_CHAIN_ID,
            contract_address: Address::repeat_byte(0xC0),
            token_address: Address::repeat_byte(0x70),
            gas_price: U256::from(GWEI),
            gas_limit: 130_000,
            transfer_gas_limit: 21_000,
            start_block: 0,
            challenge_period: 10,
        }
    }

    /// Maximum gas cost of one contract transaction.
    pub fn max_transaction_cost(&self) -> U256 {
        self.gas_price * U256::from(self.gas_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.gas_limit, 130_000);
        assert_eq!(config.gas_price, U256::from(20_000_000_000u64));
    }

    #[test]
    fn test_known_networks() {
        let mainnet = NetworkConfig::for_chain(1).unwrap();
        assert_eq!(mainnet.start_block, 4_958_602);
        assert_ne!(mainnet.contract_address, Address::zero());
        assert!(NetworkConfig::for_chain(12345).is_none());
    }

    #[test]
    fn test_config_serde() {
        let config = NetworkConfig::for_testing();
        let json = serde_json::to_string(&config).unwrap();
        let back: NetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
