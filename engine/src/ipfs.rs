//! IPFS fetch client.
//!
//! Content-addressed fetches over a list of public gateways. Transient
//! failures are retried with exponential backoff until the configured retry
//! window runs out, then surface as `IpfsUnavailable`.

use std::time::{Duration, Instant};

use anyhow::anyhow;

use crate::{
	errors::IpfsUnavailable,
	retrier::{retry, RetryPolicy},
};

pub struct IpfsFetchClient {
	http: reqwest::Client,
	endpoints: Vec<String>,
	retry_window: Duration,
}

impl IpfsFetchClient {
	pub fn new(
		endpoints: &[String],
		timeout: Duration,
		retry_window: Duration,
	) -> anyhow::Result<Self> {
		if endpoints.is_empty() {
			return Err(anyhow!("at least one ipfs gateway is required"));
		}
		Ok(Self {
			http: reqwest::Client::builder().timeout(timeout).build()?,
			endpoints: endpoints
				.iter()
				.map(|endpoint| endpoint.trim_end_matches('/').to_string())
				.collect(),
			retry_window,
		})
	}

	pub async fn fetch_json(&self, cid: &str) -> Result<serde_json::Value, IpfsUnavailable> {
		let started = Instant::now();
		retry(
			RetryPolicy::with_max_elapsed(self.retry_window),
			"ipfs_fetch",
			|| self.fetch_json_once(cid),
		)
		.await
		.map_err(|last_error| IpfsUnavailable {
			elapsed: started.elapsed(),
			last_error: last_error.to_string(),
		})
	}

	async fn fetch_json_once(&self, cid: &str) -> anyhow::Result<serde_json::Value> {
		let mut last_error = None;
		for endpoint in &self.endpoints {
			let url = format!("{endpoint}/ipfs/{cid}");
			match self.fetch_from_gateway(&url).await {
				Ok(value) => return Ok(value),
				Err(error) => {
					tracing::warn!("ipfs fetch from {url} failed: {error}");
					last_error = Some(error);
				},
			}
		}
		Err(last_error.unwrap_or_else(|| anyhow!("no ipfs gateways configured")))
	}

	async fn fetch_from_gateway(&self, url: &str) -> anyhow::Result<serde_json::Value> {
		let response = self.http.get(url).send().await?;
		if !response.status().is_success() {
			return Err(anyhow!("gateway returned status {}", response.status()));
		}
		Ok(response.json().await?)
	}
}
