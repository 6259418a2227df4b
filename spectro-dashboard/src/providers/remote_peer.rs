//! Remote peer dashboard provider
//!
//! Another dashboard instance (typically next to a second spectrometer)
//! exposes the same HTTP API this service does. Its `/results` payload is
//! decoded as-is and re-slotted into the local display order.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use spectro_common::{ElementOrder, FurnaceQuery, SampleRecord};
use std::time::Duration;
use tracing::debug;

use super::{ProviderKind, SourceProvider};
use crate::error::SourceError;

const RESULTS_PATH: &str = "/results";
const FURNACE_RESULTS_PATH: &str = "/lastfurnaceresults";

/// Normalize a configured peer address into a base URL
///
/// Bare `host:port` gets an `http://` scheme; trailing slashes are dropped.
pub fn normalize_base_url(address: &str) -> String {
    let address = address.trim();
    let with_scheme = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    with_scheme.trim_end_matches('/').to_string()
}

pub struct RemotePeerProvider {
    name: String,
    base_url: String,
    source_id: u32,
    display_order: ElementOrder,
    http_client: reqwest::Client,
}

impl RemotePeerProvider {
    pub fn new(
        address: &str,
        source_id: u32,
        display_order: ElementOrder,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let base_url = normalize_base_url(address);
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("spectro-dashboard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        Ok(Self {
            name: format!("remote-peer:{}", base_url),
            base_url,
            source_id,
            display_order,
            http_client,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Querying remote peer");

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!(
                "{} returned {}: {}",
                url,
                status.as_u16(),
                body.trim()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(format!("{}: {}", url, e)))
    }

    /// Stamp a decoded peer record as ours and realign its display slots
    fn adopt(&self, mut record: SampleRecord) -> SampleRecord {
        record.source_id = self.source_id;
        record.fill_values_from_results();
        record.results = self.display_order.place(&record.element_values);
        record
    }
}

#[async_trait]
impl SourceProvider for RemotePeerProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RemotePeer
    }

    async fn fetch_batch(&self, limit: usize) -> Result<Vec<SampleRecord>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let records: Vec<SampleRecord> = self.get_json(RESULTS_PATH, &[]).await?;
        Ok(records
            .into_iter()
            .take(limit)
            .map(|r| self.adopt(r))
            .collect())
    }

    async fn fetch_furnace_latest(
        &self,
        query: &FurnaceQuery,
    ) -> Result<Vec<SampleRecord>, SourceError> {
        let keys = query.keys();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut params: Vec<(&str, &str)> = keys.iter().map(|k| ("f", k.as_str())).collect();
        if query.test_samples_only {
            params.push(("t", "true"));
        }

        let records: Vec<SampleRecord> = self.get_json(FURNACE_RESULTS_PATH, &params).await?;
        Ok(records.into_iter().map(|r| self.adopt(r)).collect())
    }
}
