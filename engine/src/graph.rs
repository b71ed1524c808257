//! Indexed-graph (subgraph) client.
//!
//! Plain GraphQL-over-HTTP: every query is a JSON POST carrying `query` and
//! `variables`. Pagination injects `first`/`skip` variables and stops when a
//! page comes back short. Graph-backed duties refuse to run when the graph
//! node has not indexed up to the block they anchor their reads at.

use std::time::Duration;

use ethers::types::{Address, H256, I256, U256};
use serde_json::{json, Value};

use crate::{
	contracts::HarvestParams,
	errors::GraphError,
	retrier::{retry, RetryPolicy},
};

/// `osTokenConfig.liqThresholdPercent` value marking liquidation as disabled.
pub const DISABLED_LIQ_THRESHOLD: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct GraphVault {
	pub address: Address,
	pub can_harvest: bool,
	pub harvest_params: Option<HarvestParams>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitRequest {
	pub id: String,
	pub vault: Address,
	pub position_ticket: U256,
	pub timestamp: u64,
	pub exit_queue_index: Option<U256>,
	pub is_claimed: bool,
	pub is_claimable: bool,
	pub exited_assets: U256,
	pub total_assets: U256,
}

impl ExitRequest {
	pub fn is_fully_claimable(&self) -> bool {
		self.is_claimable && self.exited_assets == self.total_assets
	}
}

#[derive(Debug, Clone)]
pub struct LeveragePosition {
	pub user: Address,
	pub vault: Address,
	pub proxy: Address,
	pub borrow_ltv: f64,
	pub exit_request: Option<ExitRequest>,
}

impl LeveragePosition {
	/// Dedup key across the borrow- and vault-selected position sets.
	pub fn id(&self) -> (Address, Address) {
		(self.vault, self.user)
	}
}

#[derive(Debug, Clone)]
pub struct OsTokenExitRequest {
	pub id: String,
	pub vault: Address,
	pub owner: Address,
	pub ltv: f64,
	pub exit_request: ExitRequest,
}

pub struct GraphClient {
	http: reqwest::Client,
	endpoint: String,
	page_size: u64,
	retry_window: Duration,
}

impl GraphClient {
	pub fn new(
		endpoint: &str,
		request_timeout: Duration,
		retry_window: Duration,
		page_size: u64,
	) -> anyhow::Result<Self> {
		Ok(Self {
			http: reqwest::Client::builder().timeout(request_timeout).build()?,
			endpoint: endpoint.to_string(),
			page_size,
			retry_window,
		})
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	pub async fn run_query(&self, query: &str, variables: Value) -> Result<Value, GraphError> {
		retry(
			RetryPolicy::with_max_elapsed(self.retry_window),
			"graph_query",
			|| self.run_query_once(query, variables.clone()),
		)
		.await
	}

	async fn run_query_once(&self, query: &str, variables: Value) -> Result<Value, GraphError> {
		let response = self
			.http
			.post(&self.endpoint)
			.json(&json!({ "query": query, "variables": variables }))
			.send()
			.await?;
		let body: Value = response.json().await?;
		if let Some(errors) = body.get("errors") {
			if !errors.is_null() {
				return Err(GraphError::Query(errors.to_string()));
			}
		}
		body.get("data")
			.cloned()
			.ok_or_else(|| GraphError::Query("response carries no data".to_string()))
	}

	/// Pages through `root` by injecting `first`/`skip` until a page returns
	/// fewer than `first` items.
	pub async fn fetch_pages(
		&self,
		query: &str,
		mut variables: Value,
		root: &str,
	) -> Result<Vec<Value>, GraphError> {
		let mut items = Vec::new();
		let mut skip: u64 = 0;
		loop {
			variables["first"] = json!(self.page_size);
			variables["skip"] = json!(skip);
			let data = self.run_query(query, variables.clone()).await?;
			let page = data
				.get(root)
				.and_then(Value::as_array)
				.cloned()
				.ok_or_else(|| GraphError::Query(format!("missing field {root}")))?;
			let page_len = page.len() as u64;
			items.extend(page);
			if page_len < self.page_size {
				return Ok(items);
			}
			skip += self.page_size;
		}
	}

	pub async fn latest_synced_block(&self) -> Result<u64, GraphError> {
		let data = self
			.run_query("query Meta { _meta { block { number } } }", json!({}))
			.await?;
		data.pointer("/_meta/block/number")
			.and_then(Value::as_u64)
			.ok_or_else(|| GraphError::Query("missing _meta.block.number".to_string()))
	}

	/// Fails with [`GraphError::Behind`] when the graph node has not indexed
	/// up to `required_block`.
	pub async fn check_synced_to(&self, required_block: u64) -> Result<(), GraphError> {
		let graph_block = self.latest_synced_block().await?;
		if graph_block < required_block {
			return Err(GraphError::Behind { graph_block, required_block });
		}
		Ok(())
	}

	/// All leverage positions at `block`, riskiest first.
	pub async fn leverage_positions(
		&self,
		block: u64,
	) -> Result<Vec<LeveragePosition>, GraphError> {
		const QUERY: &str = r#"
			query PositionsQuery($block: Int, $first: Int, $skip: Int) {
			  leverageStrategyPositions(
			    block: { number: $block },
			    orderBy: borrowLtv,
			    orderDirection: desc,
			    first: $first,
			    skip: $skip
			  ) {
			    user
			    proxy
			    borrowLtv
			    vault { id }
			    exitRequest {
			      id
			      positionTicket
			      timestamp
			      exitQueueIndex
			      isClaimed
			      isClaimable
			      exitedAssets
			      totalAssets
			      vault { id }
			    }
			  }
			}
		"#;
		let items = self
			.fetch_pages(QUERY, json!({ "block": block }), "leverageStrategyPositions")
			.await?;
		items
			.iter()
			.map(|item| {
				Ok(LeveragePosition {
					vault: parse_address(item.pointer("/vault/id"), "vault.id")?,
					user: parse_address(item.get("user"), "user")?,
					proxy: parse_address(item.get("proxy"), "proxy")?,
					borrow_ltv: parse_f64(item.get("borrowLtv"), "borrowLtv")?,
					exit_request: match item.get("exitRequest") {
						Some(Value::Null) | None => None,
						Some(value) => Some(parse_exit_request(value)?),
					},
				})
			})
			.collect()
	}

	/// Allocator addresses with `ltv` above the threshold, restricted to the
	/// given addresses. Vaults with liquidation disabled are dropped here.
	pub async fn allocators_above_ltv(
		&self,
		ltv: f64,
		addresses: &[Address],
		block: u64,
	) -> Result<Vec<Address>, GraphError> {
		const QUERY: &str = r#"
			query AllocatorsQuery($ltv: String, $addresses: [String], $block: Int, $first: Int, $skip: Int) {
			  allocators(
			    block: { number: $block },
			    where: { ltv_gt: $ltv, address_in: $addresses },
			    orderBy: ltv,
			    orderDirection: desc,
			    first: $first,
			    skip: $skip
			  ) {
			    address
			    vault { osTokenConfig { liqThresholdPercent } }
			  }
			}
		"#;
		let variables = json!({
			"ltv": ltv.to_string(),
			"addresses": addresses.iter().map(lowercase_address).collect::<Vec<_>>(),
			"block": block,
		});
		let items = self.fetch_pages(QUERY, variables, "allocators").await?;
		let mut result = Vec::new();
		for item in &items {
			let liq_threshold = item
				.pointer("/vault/osTokenConfig/liqThresholdPercent")
				.and_then(Value::as_str)
				.and_then(|s| s.parse::<u128>().ok())
				.ok_or_else(|| GraphError::Query("missing liqThresholdPercent".to_string()))?;
			if liq_threshold != DISABLED_LIQ_THRESHOLD as u128 {
				result.push(parse_address(item.get("address"), "address")?);
			}
		}
		Ok(result)
	}

	pub async fn ostoken_exit_requests(
		&self,
		ltv: f64,
		block: u64,
	) -> Result<Vec<OsTokenExitRequest>, GraphError> {
		const QUERY: &str = r#"
			query ExitRequestsQuery($ltv: String, $block: Int, $first: Int, $skip: Int) {
			  osTokenExitRequests(
			    block: { number: $block },
			    where: { ltv_gt: $ltv },
			    first: $first,
			    skip: $skip
			  ) {
			    id
			    owner
			    ltv
			    vault { id }
			  }
			}
		"#;
		let items = self
			.fetch_pages(
				QUERY,
				json!({ "ltv": ltv.to_string(), "block": block }),
				"osTokenExitRequests",
			)
			.await?;
		if items.is_empty() {
			return Ok(Vec::new());
		}

		let ids: Vec<String> = items
			.iter()
			.filter_map(|item| item.get("id").and_then(Value::as_str).map(str::to_string))
			.collect();
		let exit_requests = self.exit_requests_by_ids(&ids, block).await?;

		let mut result = Vec::new();
		for item in &items {
			let id = item
				.get("id")
				.and_then(Value::as_str)
				.ok_or_else(|| GraphError::Query("missing exit request id".to_string()))?;
			let exit_request = match exit_requests.iter().find(|request| request.id == id) {
				Some(request) if !request.is_claimed => request.clone(),
				_ => continue,
			};
			result.push(OsTokenExitRequest {
				id: id.to_string(),
				vault: parse_address(item.pointer("/vault/id"), "vault.id")?,
				owner: parse_address(item.get("owner"), "owner")?,
				ltv: parse_f64(item.get("ltv"), "ltv")?,
				exit_request,
			});
		}
		Ok(result)
	}

	async fn exit_requests_by_ids(
		&self,
		ids: &[String],
		block: u64,
	) -> Result<Vec<ExitRequest>, GraphError> {
		const QUERY: &str = r#"
			query exitRequestQuery($ids: [String], $block: Int, $first: Int, $skip: Int) {
			  exitRequests(
			    block: { number: $block },
			    where: { id_in: $ids },
			    orderBy: id,
			    first: $first,
			    skip: $skip
			  ) {
			    id
			    positionTicket
			    timestamp
			    exitQueueIndex
			    isClaimed
			    isClaimable
			    exitedAssets
			    totalAssets
			    vault { id }
			  }
			}
		"#;
		let items = self
			.fetch_pages(QUERY, json!({ "ids": ids, "block": block }), "exitRequests")
			.await?;
		items.iter().map(parse_exit_request).collect()
	}

	pub async fn leverage_position_owner(&self, proxy: Address) -> Result<Address, GraphError> {
		const QUERY: &str = r#"
			query PositionsQuery($proxy: Bytes) {
			  leverageStrategyPositions(where: { proxy: $proxy }) {
			    user
			  }
			}
		"#;
		let data = self
			.run_query(QUERY, json!({ "proxy": lowercase_address(&proxy) }))
			.await?;
		let user = data
			.pointer("/leverageStrategyPositions/0/user")
			.ok_or_else(|| {
				GraphError::Query(format!("no leverage position for proxy {proxy:?}"))
			})?;
		parse_address(Some(user), "user")
	}

	pub async fn ostoken_vaults(&self) -> Result<Vec<Address>, GraphError> {
		const QUERY: &str = "query OsTokenVaultsIds { networks { osTokenVaultIds } }";
		let data = self.run_query(QUERY, json!({})).await?;
		let vaults = data
			.pointer("/networks/0/osTokenVaultIds")
			.and_then(Value::as_array)
			.cloned()
			.unwrap_or_default();
		vaults
			.iter()
			.map(|vault| parse_address(Some(vault), "osTokenVaultIds"))
			.collect()
	}

	/// The allocator with the highest LTV in `vault`, if the vault has any.
	pub async fn vault_max_ltv_allocator(
		&self,
		vault: Address,
	) -> Result<Option<Address>, GraphError> {
		const QUERY: &str = r#"
			query AllocatorsQuery($vault: String) {
			  allocators(first: 1, orderBy: ltv, orderDirection: desc, where: { vault: $vault }) {
			    address
			  }
			}
		"#;
		let data = self
			.run_query(QUERY, json!({ "vault": lowercase_address(&vault) }))
			.await?;
		match data.pointer("/allocators/0/address") {
			Some(address) => Ok(Some(parse_address(Some(address), "address")?)),
			None => Ok(None),
		}
	}

	/// Vault harvest data keyed by vault address.
	pub async fn vaults(&self, vaults: &[Address]) -> Result<Vec<GraphVault>, GraphError> {
		if vaults.is_empty() {
			return Ok(Vec::new());
		}
		const QUERY: &str = r#"
			query VaultQuery($vaults: [String], $first: Int, $skip: Int) {
			  vaults(first: $first, skip: $skip, where: { id_in: $vaults }) {
			    id
			    canHarvest
			    proof
			    proofReward
			    proofUnlockedMevReward
			    rewardsRoot
			  }
			}
		"#;
		let variables =
			json!({ "vaults": vaults.iter().map(lowercase_address).collect::<Vec<_>>() });
		let items = self.fetch_pages(QUERY, variables, "vaults").await?;
		items
			.iter()
			.map(|item| {
				Ok(GraphVault {
					address: parse_address(item.get("id"), "vault id")?,
					can_harvest: item
						.get("canHarvest")
						.and_then(Value::as_bool)
						.unwrap_or(false),
					harvest_params: parse_harvest_params(item)?,
				})
			})
			.collect()
	}
}

fn lowercase_address(address: &Address) -> String {
	format!("{address:#x}")
}

fn parse_address(value: Option<&Value>, what: &str) -> Result<Address, GraphError> {
	value
		.and_then(Value::as_str)
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| GraphError::Query(format!("invalid address in field {what}")))
}

fn parse_f64(value: Option<&Value>, what: &str) -> Result<f64, GraphError> {
	value
		.and_then(|v| match v {
			Value::String(s) => s.parse().ok(),
			Value::Number(n) => n.as_f64(),
			_ => None,
		})
		.ok_or_else(|| GraphError::Query(format!("invalid number in field {what}")))
}

fn parse_u256_dec(value: Option<&Value>, what: &str) -> Result<U256, GraphError> {
	value
		.and_then(Value::as_str)
		.and_then(|s| U256::from_dec_str(s).ok())
		.ok_or_else(|| GraphError::Query(format!("invalid integer in field {what}")))
}

fn parse_exit_request(value: &Value) -> Result<ExitRequest, GraphError> {
	let exit_queue_index = match value.get("exitQueueIndex") {
		Some(Value::Null) | None => None,
		Some(index) => Some(parse_u256_dec(Some(index), "exitQueueIndex")?),
	};
	Ok(ExitRequest {
		id: value
			.get("id")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string(),
		vault: parse_address(value.pointer("/vault/id"), "vault.id")?,
		position_ticket: parse_u256_dec(value.get("positionTicket"), "positionTicket")?,
		timestamp: value
			.get("timestamp")
			.and_then(Value::as_str)
			.and_then(|s| s.parse().ok())
			.ok_or_else(|| GraphError::Query("invalid timestamp".to_string()))?,
		exit_queue_index,
		is_claimed: value.get("isClaimed").and_then(Value::as_bool).unwrap_or(false),
		is_claimable: value.get("isClaimable").and_then(Value::as_bool).unwrap_or(false),
		exited_assets: parse_u256_dec(value.get("exitedAssets"), "exitedAssets")?,
		total_assets: parse_u256_dec(value.get("totalAssets"), "totalAssets")?,
	})
}

fn parse_harvest_params(item: &Value) -> Result<Option<HarvestParams>, GraphError> {
	let rewards_root = match item.get("rewardsRoot") {
		Some(Value::String(root)) => root.clone(),
		_ => return Ok(None),
	};
	let rewards_root: H256 = rewards_root
		.parse()
		.map_err(|_| GraphError::Query("invalid rewardsRoot".to_string()))?;
	let reward = item
		.get("proofReward")
		.and_then(Value::as_str)
		.and_then(|s| I256::from_dec_str(s).ok())
		.unwrap_or_default();
	let unlocked_mev_reward = item
		.get("proofUnlockedMevReward")
		.and_then(Value::as_str)
		.and_then(|s| U256::from_dec_str(s).ok())
		.unwrap_or_default();
	let proof = item
		.get("proof")
		.and_then(Value::as_array)
		.map(|proof| {
			proof
				.iter()
				.filter_map(Value::as_str)
				.filter_map(|s| s.parse().ok())
				.collect()
		})
		.unwrap_or_default();
	Ok(Some(HarvestParams { rewards_root, reward, unlocked_mev_reward, proof }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn exit_request_full_claimability() {
		let mut request = ExitRequest {
			id: "0x01".to_string(),
			vault: Address::zero(),
			position_ticket: U256::from(1),
			timestamp: 1700000000,
			exit_queue_index: Some(U256::zero()),
			is_claimed: false,
			is_claimable: true,
			exited_assets: U256::from(100),
			total_assets: U256::from(100),
		};
		assert!(request.is_fully_claimable());

		request.exited_assets = U256::from(50);
		assert!(!request.is_fully_claimable());

		request.exited_assets = U256::from(100);
		request.is_claimable = false;
		assert!(!request.is_fully_claimable());
	}

	#[test]
	fn exit_request_parses_from_graph_shape() {
		let value = json!({
			"id": "0xabc-1",
			"positionTicket": "12345",
			"timestamp": "1712000000",
			"exitQueueIndex": null,
			"isClaimed": false,
			"isClaimable": true,
			"exitedAssets": "1000000000000000000",
			"totalAssets": "1000000000000000000",
			"vault": { "id": "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf" }
		});
		let request = parse_exit_request(&value).unwrap();
		assert_eq!(request.exit_queue_index, None);
		assert!(request.is_fully_claimable());
		assert_eq!(request.timestamp, 1712000000);
	}

	#[test]
	fn harvest_params_absent_without_rewards_root() {
		let item = json!({ "rewardsRoot": null, "proof": [] });
		assert!(parse_harvest_params(&item).unwrap().is_none());
	}

	#[test]
	fn harvest_params_parse() {
		let item = json!({
			"rewardsRoot": "0x000000000000000000000000000000000000000000000000000000000000aaaa",
			"proofReward": "123",
			"proofUnlockedMevReward": "456",
			"proof": ["0x000000000000000000000000000000000000000000000000000000000000bbbb"],
		});
		let params = parse_harvest_params(&item).unwrap().unwrap();
		assert_eq!(params.reward, I256::from(123));
		assert_eq!(params.unlocked_mev_reward, U256::from(456));
		assert_eq!(params.proof.len(), 1);
	}

	#[test]
	fn lowercase_address_matches_graph_collation() {
		let address: Address = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse().unwrap();
		assert_eq!(lowercase_address(&address), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
	}
}
