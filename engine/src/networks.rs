//! Static chain constants per supported network.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use ethers::types::{Address, H256, U256};
use lazy_static::lazy_static;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Mainnet,
	Hoodi,
	Gnosis,
	Chiado,
	Sepolia,
}

impl Network {
	pub fn supports_oseth_price(&self) -> bool {
		OSETH_PRICE_SUPPORTED_NETWORKS.contains(self)
	}

	pub fn supports_force_exits(&self) -> bool {
		FORCE_EXITS_SUPPORTED_NETWORKS.contains(self)
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Network::Mainnet => "mainnet",
			Network::Hoodi => "hoodi",
			Network::Gnosis => "gnosis",
			Network::Chiado => "chiado",
			Network::Sepolia => "sepolia",
		};
		write!(f, "{name}")
	}
}

impl FromStr for Network {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"mainnet" => Ok(Network::Mainnet),
			"hoodi" => Ok(Network::Hoodi),
			"gnosis" => Ok(Network::Gnosis),
			"chiado" => Ok(Network::Chiado),
			"sepolia" => Ok(Network::Sepolia),
			other => Err(format!("unknown network: {other}")),
		}
	}
}

pub const OSETH_PRICE_SUPPORTED_NETWORKS: [Network; 2] = [Network::Mainnet, Network::Sepolia];
pub const FORCE_EXITS_SUPPORTED_NETWORKS: [Network; 2] = [Network::Mainnet, Network::Hoodi];

/// Cross-chain price sync constants. Only present on networks where the
/// osETH price feed is mirrored to an L2.
#[derive(Debug, Clone)]
pub struct PriceNetworkConfig {
	pub price_feed_sender_contract_address: Address,
	/// PriceFeed contract on the target (L2) chain.
	pub target_price_feed_contract_address: Address,
	pub target_chain: u32,
	pub target_address: Address,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
	pub symbol: &'static str,
	pub chain_id: u64,
	pub seconds_per_block: u64,
	pub slots_per_epoch: u64,
	pub seconds_per_slot: u64,
	pub keeper_contract_address: Address,
	pub keeper_genesis_block: u64,
	pub merkle_distributor_contract_address: Address,
	pub multicall_contract_address: Address,
	pub vault_user_ltv_tracker_contract_address: Address,
	pub strategy_registry_contract_address: Address,
	pub ostoken_vault_escrow_contract_address: Address,
	pub leverage_strategy_id: H256,
	pub keeper_min_balance: U256,
	pub min_effective_priority_fee_per_gas: U256,
	pub price: Option<PriceNetworkConfig>,
}

impl NetworkConfig {
	pub fn block_period(&self) -> Duration {
		Duration::from_secs(self.seconds_per_block)
	}
}

fn addr(s: &str) -> Address {
	s.parse().expect("valid checksummed address literal")
}

fn strategy_id(s: &str) -> H256 {
	s.parse().expect("valid bytes32 literal")
}

fn gwei(n: u64) -> U256 {
	U256::from(n) * U256::exp10(9)
}

fn ether_milli(n: u64) -> U256 {
	U256::from(n) * U256::exp10(15)
}

lazy_static! {
	pub static ref NETWORKS: HashMap<Network, NetworkConfig> = HashMap::from([
		(
			Network::Mainnet,
			NetworkConfig {
				symbol: "ETH",
				chain_id: 1,
				seconds_per_block: 12,
				slots_per_epoch: 32,
				seconds_per_slot: 12,
				keeper_contract_address: addr("0x6B5815467da09DaA7DC83Db21c9239d98Bb487b5"),
				keeper_genesis_block: 18470089,
				merkle_distributor_contract_address: addr(
					"0x2f5bE310790f5FF0A22641Ab4d37aE0EdBD6a74f"
				),
				multicall_contract_address: addr("0xcA11bde05977b3631167028862bE2a173976CA11"),
				vault_user_ltv_tracker_contract_address: addr(
					"0xe0Ae8B04922d6e3fA06c2496A94EF2875EFcC7BB"
				),
				strategy_registry_contract_address: addr(
					"0x90b82E4b3aa385B4A02B7EBc1892a4BeD6B5c465"
				),
				ostoken_vault_escrow_contract_address: addr(
					"0x09e84205DF7c68907e619D07aFD90143c5763605"
				),
				leverage_strategy_id: strategy_id(
					"0x61696b68000000000000000000000000000000000000000000000000000000ff"
				),
				keeper_min_balance: ether_milli(10),
				min_effective_priority_fee_per_gas: gwei(0),
				price: Some(PriceNetworkConfig {
					price_feed_sender_contract_address: addr(
						"0x48c3399719B582dD63eB5AADf12A40B4C3f52FA2"
					),
					target_price_feed_contract_address: addr(
						"0xF3272CAfe65b190e76caAF483db13424a3e23dD2"
					),
					target_chain: 23,
					target_address: addr("0xF3272CAfe65b190e76caAF483db13424a3e23dD2"),
				}),
			}
		),
		(
			Network::Hoodi,
			NetworkConfig {
				symbol: "HoodiETH",
				chain_id: 560048,
				seconds_per_block: 12,
				slots_per_epoch: 32,
				seconds_per_slot: 12,
				keeper_contract_address: addr("0xA7D1Ac9D6F32B404C75626874BA56f7654c1dC0f"),
				keeper_genesis_block: 123456,
				merkle_distributor_contract_address: addr(
					"0x4c10E2636D84b4E1BbA3528Ae8C0E8690A9E45e3"
				),
				multicall_contract_address: addr("0xcA11bde05977b3631167028862bE2a173976CA11"),
				vault_user_ltv_tracker_contract_address: addr(
					"0x8f48130b9b96B58035b4A9389eCDaBC00d59d0c8"
				),
				strategy_registry_contract_address: addr(
					"0xf4bD63e7E34ba07dF2fF4A7B1ED1Bb4b4B43D199"
				),
				ostoken_vault_escrow_contract_address: addr(
					"0x7E57046e0a18a6dAFaEe5BdFf4d474cDa4a1dA25"
				),
				leverage_strategy_id: strategy_id(
					"0x61696b68000000000000000000000000000000000000000000000000000000ff"
				),
				keeper_min_balance: ether_milli(10),
				min_effective_priority_fee_per_gas: gwei(0),
				price: None,
			}
		),
		(
			Network::Gnosis,
			NetworkConfig {
				symbol: "xDAI",
				chain_id: 100,
				seconds_per_block: 5,
				slots_per_epoch: 16,
				seconds_per_slot: 5,
				keeper_contract_address: addr("0xcAC0e3E35d3BA271cd2aaBE688ac9DB1898C26aa"),
				keeper_genesis_block: 30275066,
				merkle_distributor_contract_address: addr(
					"0x9eE94e4B62A53b4AE402ae0Dc4F2b5C4E6E0a8d6"
				),
				multicall_contract_address: addr("0xcA11bde05977b3631167028862bE2a173976CA11"),
				vault_user_ltv_tracker_contract_address: addr(
					"0xdEa72c54f63470349CE2dC12f8232FE00241abE6"
				),
				strategy_registry_contract_address: addr(
					"0x4F171a5171c6E56DCd02d1e9B366Db2dAF21F248"
				),
				ostoken_vault_escrow_contract_address: addr(
					"0x28F325dD287a5984B754d34CfCA38af3A8429e71"
				),
				leverage_strategy_id: strategy_id(
					"0x61696b68000000000000000000000000000000000000000000000000000000ff"
				),
				// Gas on Gnosis is cheap; what matters is running out entirely.
				keeper_min_balance: ether_milli(1000),
				min_effective_priority_fee_per_gas: gwei(2),
				price: None,
			}
		),
		(
			Network::Chiado,
			NetworkConfig {
				symbol: "ChiadoxDAI",
				chain_id: 10200,
				seconds_per_block: 5,
				slots_per_epoch: 16,
				seconds_per_slot: 5,
				keeper_contract_address: addr("0x13Df9e7D25b7dc0E8a0AFdadE9E1aBD3a3bFAa1c"),
				keeper_genesis_block: 10627588,
				merkle_distributor_contract_address: addr(
					"0x11c0B03eD5f2f2B1eA5dDcBaC5DAB4a4c3F14bc9"
				),
				multicall_contract_address: addr("0xcA11bde05977b3631167028862bE2a173976CA11"),
				vault_user_ltv_tracker_contract_address: addr(
					"0x7742eD7a6C4BbB5d88a4603d6e19e69960F93115"
				),
				strategy_registry_contract_address: addr(
					"0x97A7e2F5cD00eCa5e37847C1c6a84AB0e0bBDc8f"
				),
				ostoken_vault_escrow_contract_address: addr(
					"0x5B0e5e8d1E0bF36FaE9E81E8E3c6EE0c4Ac4DA79"
				),
				leverage_strategy_id: strategy_id(
					"0x61696b68000000000000000000000000000000000000000000000000000000ff"
				),
				keeper_min_balance: ether_milli(1000),
				min_effective_priority_fee_per_gas: gwei(2),
				price: None,
			}
		),
		(
			Network::Sepolia,
			NetworkConfig {
				symbol: "SepoliaETH",
				chain_id: 11155111,
				seconds_per_block: 12,
				slots_per_epoch: 32,
				seconds_per_slot: 12,
				keeper_contract_address: addr("0xE4e34f54cFc31D52c4D6E2A40e2eF9a5e3cC94aD"),
				keeper_genesis_block: 4615000,
				merkle_distributor_contract_address: addr(
					"0xAd371a655E4aBf6b96Ba5E2d2a0E1C9cD0cd9F57"
				),
				multicall_contract_address: addr("0xcA11bde05977b3631167028862bE2a173976CA11"),
				vault_user_ltv_tracker_contract_address: addr(
					"0xDBa16b026BBF26A4C7bDfA2cBf1eAE83f09cE2dA"
				),
				strategy_registry_contract_address: addr(
					"0x6EcFDD05F43aCD9f280bBfAd0Df92b4a26fa4f9B"
				),
				ostoken_vault_escrow_contract_address: addr(
					"0x1Bb2Bd7E4fDE46f2a1Ff5AF40Cd6aB2F6e8Bf87D"
				),
				leverage_strategy_id: strategy_id(
					"0x61696b68000000000000000000000000000000000000000000000000000000ff"
				),
				keeper_min_balance: ether_milli(10),
				min_effective_priority_fee_per_gas: gwei(0),
				price: Some(PriceNetworkConfig {
					price_feed_sender_contract_address: addr(
						"0xE3E26Ff53B42a67d6A1E65d9a0Fa8Aa9c1a54E90"
					),
					target_price_feed_contract_address: addr(
						"0x4026afFABab35b0A24cA10DA44cC9F6E36bD85dA"
					),
					target_chain: 10003,
					target_address: addr("0x4026afFABab35b0A24cA10DA44cC9F6E36bD85dA"),
				}),
			}
		),
	]);
}

pub fn network_config(network: Network) -> &'static NetworkConfig {
	NETWORKS.get(&network).expect("every Network variant has a config entry")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_network_has_a_config() {
		for network in
			[Network::Mainnet, Network::Hoodi, Network::Gnosis, Network::Chiado, Network::Sepolia]
		{
			let config = network_config(network);
			assert!(config.seconds_per_block > 0);
			assert!(config.slots_per_epoch > 0);
		}
	}

	#[test]
	fn price_config_only_on_supported_networks() {
		for network in OSETH_PRICE_SUPPORTED_NETWORKS {
			assert!(network_config(network).price.is_some());
		}
		assert!(network_config(Network::Gnosis).price.is_none());
	}

	#[test]
	fn network_parses_case_insensitively() {
		assert_eq!("Mainnet".parse::<Network>().unwrap(), Network::Mainnet);
		assert!("ropsten".parse::<Network>().is_err());
	}
}
