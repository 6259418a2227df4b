//! Result source providers
//!
//! Each physical source (spectrometer database, XML export directory, peer
//! dashboard) implements `SourceProvider`. Providers are chosen once from
//! configuration by `build_providers` and shared behind `Arc` between the
//! merger, the furnace resolver and the refresh task.

use async_trait::async_trait;
use spectro_common::config::{DashboardConfig, SourceConfig};
use spectro_common::{ElementOrder, FurnaceQuery, SampleRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{DashError, SourceError};

pub mod local_db;
pub mod remote_peer;
pub mod xml_dir;

pub use local_db::LocalDbProvider;
pub use remote_peer::RemotePeerProvider;
pub use xml_dir::XmlDirProvider;

/// Source kind, used to pick the furnace resolver's primary and peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    LocalDatabase,
    XmlDirectory,
    RemotePeer,
}

/// Capability interface of one result source
///
/// Implementations bound their own I/O latency; a provider that never
/// returns stalls every caller waiting on a merge.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Label for logs
    fn name(&self) -> &str;

    /// Identifier stamped on every record this provider produces
    fn source_id(&self) -> u32;

    fn kind(&self) -> ProviderKind;

    /// Latest records, at most `limit`, in any order
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<SampleRecord>, SourceError>;

    /// Latest record of each requested furnace, at most one per furnace
    async fn fetch_furnace_latest(
        &self,
        query: &FurnaceQuery,
    ) -> Result<Vec<SampleRecord>, SourceError>;
}

/// Shared handle to a provider
pub type SharedProvider = Arc<dyn SourceProvider>;

/// Build every configured provider, in configuration order
///
/// Any failure here is a setup error and aborts startup.
pub async fn build_providers(config: &DashboardConfig) -> Result<Vec<SharedProvider>, DashError> {
    let display_order = config.display_order()?;
    let mut providers: Vec<SharedProvider> = Vec::with_capacity(config.sources.len());

    for source in &config.sources {
        providers.push(build_provider(source, &display_order).await?);
    }

    Ok(providers)
}

async fn build_provider(
    source: &SourceConfig,
    display_order: &ElementOrder,
) -> Result<SharedProvider, DashError> {
    let provider: SharedProvider = match source {
        SourceConfig::LocalDb { path, source_id } => {
            let provider = LocalDbProvider::open(path, *source_id, display_order.clone())
                .await
                .map_err(|e| {
                    DashError::Setup(format!(
                        "cannot open spectrometer database {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            Arc::new(provider)
        }
        SourceConfig::XmlDir { path, source_id } => {
            if !path.is_dir() {
                return Err(DashError::Setup(format!(
                    "XML result directory not found: {}",
                    path.display()
                )));
            }
            Arc::new(XmlDirProvider::new(path.clone(), *source_id, display_order.clone()))
        }
        SourceConfig::RemotePeer {
            address,
            source_id,
            timeout_secs,
        } => {
            let provider = RemotePeerProvider::new(
                address,
                *source_id,
                display_order.clone(),
                Duration::from_secs(*timeout_secs),
            )
            .map_err(|e| DashError::Setup(format!("remote peer {}: {}", address, e)))?;
            Arc::new(provider)
        }
    };

    info!(
        source_id = provider.source_id(),
        kind = ?provider.kind(),
        "Configured result source {}",
        provider.name()
    );
    Ok(provider)
}
