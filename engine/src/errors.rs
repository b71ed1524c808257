//! Error taxonomy shared by the clients, the submission wrapper and the duties.
//!
//! Every client surfaces its own error enum; the scheduler only ever sees
//! `anyhow::Error` and logs it without aborting the tick.

use std::time::Duration;

use ethers::{
	contract::ContractError,
	providers::{Middleware, MiddlewareError},
	types::TxHash,
};

/// RPC error code returned by execution nodes when the offered fee is below
/// the node's floor. The submission wrapper retries on exactly this code.
pub const FEE_TOO_LOW_RPC_CODE: i64 = -32010;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
	#[error("all execution endpoints failed, last error: {0}")]
	EndpointUnavailable(String),

	#[error("transient rpc error {code}: {message}")]
	TransientRpc { code: i64, message: String },

	#[error("transaction {tx_hash:?} reverted")]
	Reverted { tx_hash: TxHash },

	#[error("no receipt for transaction {tx_hash:?} within {timeout:?}")]
	ReceiptTimeout { tx_hash: TxHash, timeout: Duration },

	#[error("no signing key configured for this execution client")]
	SignerUnavailable,

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl ExecutionError {
	pub fn is_fee_too_low(&self) -> bool {
		matches!(self, ExecutionError::TransientRpc { code: FEE_TOO_LOW_RPC_CODE, .. })
	}
}

/// Maps a typed contract error onto the taxonomy. Only the fee-too-low RPC
/// code becomes [`ExecutionError::TransientRpc`]; every other failure is
/// fatal to the duty that issued the call.
pub fn classify_contract_error<M: Middleware + 'static>(err: ContractError<M>) -> ExecutionError {
	if let Some(response) = err.as_middleware_error().and_then(MiddlewareError::as_error_response) {
		if response.code == FEE_TOO_LOW_RPC_CODE {
			return ExecutionError::TransientRpc {
				code: response.code,
				message: response.message.clone(),
			};
		}
	}
	ExecutionError::Other(anyhow::Error::new(err))
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
	#[error("all consensus endpoints failed, last error: {0}")]
	EndpointUnavailable(String),

	#[error("consensus request to {url} returned status {status}")]
	BadStatus { url: String, status: u16 },

	#[error("unexpected consensus response: {0}")]
	UnexpectedResponse(String),

	#[error(transparent)]
	Http(#[from] reqwest::Error),
}

impl ConsensusError {
	/// True for responses the beacon node itself rejected, as opposed to
	/// transport failures. Voluntary-exit submission retries at the previous
	/// fork epoch only for this class.
	pub fn is_client_response(&self) -> bool {
		matches!(self, ConsensusError::BadStatus { .. })
	}
}

#[derive(Debug, thiserror::Error)]
#[error("ipfs gateways unavailable after {elapsed:?}, last error: {last_error}")]
pub struct IpfsUnavailable {
	pub elapsed: Duration,
	pub last_error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
	#[error("graph node synced to block {graph_block}, required block {required_block}")]
	Behind { graph_block: u64, required_block: u64 },

	#[error("graph query failed: {0}")]
	Query(String),

	#[error(transparent)]
	Http(#[from] reqwest::Error),
}

/// Failure of a single oracle endpoint. Never fatal to the aggregation batch:
/// the caller logs it and keeps polling the oracle's sibling endpoints.
#[derive(Debug, thiserror::Error)]
pub enum OracleResponseError {
	#[error("endpoint {url} returned status {status}")]
	BadStatus { url: String, status: u16 },

	#[error("invalid response from {url}: {reason}")]
	Invalid { url: String, reason: String },

	#[error("request to {url} failed: {source}")]
	Request { url: String, source: reqwest::Error },
}

/// A whole oracle dropped out of a round: every configured endpoint failed.
#[derive(Debug, thiserror::Error)]
#[error("all endpoints are unavailable for oracle {public_key}")]
pub struct OracleUnavailable {
	pub public_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
	#[error("invalid G2 point for share index {share_index}")]
	InvalidSharePoint { share_index: u64 },

	#[error("duplicate share index {share_index}")]
	DuplicateShareIndex { share_index: u64 },

	#[error("cannot reconstruct a signature from zero shares")]
	NoShares,
}
