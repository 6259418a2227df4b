//! Latest sample per furnace
//!
//! Answers `GET /lastfurnaceresults`. The primary source is authoritative
//! for which furnaces have results; an optional peer dashboard can supply a
//! newer sample for a furnace the primary already knows.

use spectro_common::sample::furnace_key;
use spectro_common::{FurnaceQuery, SampleRecord};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::providers::{ProviderKind, SharedProvider};

pub struct FurnaceResolver {
    primary: SharedProvider,
    peer: Option<SharedProvider>,
}

impl FurnaceResolver {
    pub fn new(primary: SharedProvider, peer: Option<SharedProvider>) -> Self {
        Self { primary, peer }
    }

    /// Pick primary and override peer from the configured providers
    ///
    /// The primary is the first non-peer source and the peer the first
    /// remote peer. With only peers configured, the first peer is the
    /// primary and nothing overrides it.
    pub fn from_providers(providers: &[SharedProvider]) -> Option<Self> {
        let local = providers
            .iter()
            .find(|p| p.kind() != ProviderKind::RemotePeer);
        let peer = providers
            .iter()
            .find(|p| p.kind() == ProviderKind::RemotePeer);

        match (local, peer) {
            (Some(primary), peer) => Some(Self::new(primary.clone(), peer.cloned())),
            (None, Some(peer)) => Some(Self::new(peer.clone(), None)),
            (None, None) => None,
        }
    }

    pub async fn resolve_latest(&self, query: &FurnaceQuery) -> Result<Vec<SampleRecord>, SourceError> {
        let keys = query.keys();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let (primary, peer) = match &self.peer {
            Some(peer) => {
                let (primary, peer_result) = tokio::join!(
                    self.primary.fetch_furnace_latest(query),
                    peer.fetch_furnace_latest(query)
                );
                let peer_records = match peer_result {
                    Ok(records) => records,
                    Err(e) => {
                        warn!(source = peer.name(), "Peer furnace lookup failed: {}", e);
                        Vec::new()
                    }
                };
                (primary?, peer_records)
            }
            None => (self.primary.fetch_furnace_latest(query).await?, Vec::new()),
        };

        let mut newer_on_peer: HashMap<String, SampleRecord> = HashMap::new();
        for record in peer {
            let key = furnace_key(&record.furnace);
            let keep = match newer_on_peer.get(&key) {
                Some(existing) => record.time_stamp > existing.time_stamp,
                None => true,
            };
            if keep {
                newer_on_peer.insert(key, record);
            }
        }

        let mut by_furnace: HashMap<String, SampleRecord> = HashMap::new();
        for mut record in primary {
            let key = furnace_key(&record.furnace);
            if let Some(peer_record) = newer_on_peer.get(&key) {
                if peer_record.time_stamp > record.time_stamp {
                    debug!(furnace = %key, sample = %peer_record.sample_name, "Peer has newer furnace sample");
                    record.sample_name = peer_record.sample_name.clone();
                    record.time_stamp = peer_record.time_stamp;
                }
            }
            by_furnace.entry(key).or_insert(record);
        }

        Ok(keys.iter().filter_map(|key| by_furnace.remove(key)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::StaticProvider;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap())
    }

    fn furnace(furnace: &str, name: &str, time_stamp: Option<DateTime<Utc>>) -> SampleRecord {
        SampleRecord {
            sample_name: name.to_string(),
            furnace: furnace.to_string(),
            time_stamp,
            ..Default::default()
        }
    }

    fn provider(kind: ProviderKind, furnaces: Result<Vec<SampleRecord>, SourceError>) -> SharedProvider {
        Arc::new(StaticProvider::new("p", kind, Ok(Vec::new())).with_furnaces(furnaces))
    }

    fn query(furnaces: &[&str]) -> FurnaceQuery {
        FurnaceQuery::new(furnaces.iter().map(|f| f.to_string()).collect(), false)
    }

    #[tokio::test]
    async fn test_newer_peer_sample_overrides() {
        let primary = provider(
            ProviderKind::LocalDatabase,
            Ok(vec![furnace("F1", "A10", at(10)), furnace("F2", "A11", at(11))]),
        );
        let peer = provider(
            ProviderKind::RemotePeer,
            Ok(vec![furnace("f1", "B12", at(12)), furnace("F2", "B9", at(9))]),
        );
        let resolver = FurnaceResolver::new(primary, Some(peer));

        let records = resolver.resolve_latest(&query(&["F1", "F2"])).await.unwrap();
        assert_eq!(records[0].sample_name, "B12");
        assert_eq!(records[0].time_stamp, at(12));
        assert_eq!(records[0].furnace, "F1");
        assert_eq!(records[1].sample_name, "A11");
    }

    #[tokio::test]
    async fn test_equal_timestamp_keeps_primary() {
        let primary = provider(ProviderKind::LocalDatabase, Ok(vec![furnace("F1", "A", at(10))]));
        let peer = provider(ProviderKind::RemotePeer, Ok(vec![furnace("F1", "B", at(10))]));
        let resolver = FurnaceResolver::new(primary, Some(peer));

        let records = resolver.resolve_latest(&query(&["F1"])).await.unwrap();
        assert_eq!(records[0].sample_name, "A");
    }

    #[tokio::test]
    async fn test_output_follows_request_order() {
        let primary = provider(
            ProviderKind::LocalDatabase,
            Ok(vec![furnace("F1", "A1", at(1)), furnace("F3", "A3", at(3))]),
        );
        let resolver = FurnaceResolver::new(primary, None);

        let records = resolver.resolve_latest(&query(&["f3", "F2", "F1"])).await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.sample_name.as_str()).collect();
        assert_eq!(names, vec!["A3", "A1"]);
    }

    #[tokio::test]
    async fn test_peer_only_furnace_omitted() {
        let primary = provider(ProviderKind::LocalDatabase, Ok(vec![furnace("F1", "A", at(1))]));
        let peer = provider(ProviderKind::RemotePeer, Ok(vec![furnace("F9", "B", at(5))]));
        let resolver = FurnaceResolver::new(primary, Some(peer));

        let records = resolver.resolve_latest(&query(&["F1", "F9"])).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].furnace, "F1");
    }

    #[tokio::test]
    async fn test_peer_failure_ignored() {
        let primary = provider(ProviderKind::LocalDatabase, Ok(vec![furnace("F1", "A", at(1))]));
        let peer = provider(
            ProviderKind::RemotePeer,
            Err(SourceError::Unavailable("refused".to_string())),
        );
        let resolver = FurnaceResolver::new(primary, Some(peer));

        let records = resolver.resolve_latest(&query(&["F1"])).await.unwrap();
        assert_eq!(records[0].sample_name, "A");
    }

    #[tokio::test]
    async fn test_primary_failure_propagates() {
        let primary = provider(
            ProviderKind::LocalDatabase,
            Err(SourceError::Unavailable("locked".to_string())),
        );
        let peer = provider(ProviderKind::RemotePeer, Ok(vec![furnace("F1", "B", at(5))]));
        let resolver = FurnaceResolver::new(primary, Some(peer));

        let result = resolver.resolve_latest(&query(&["F1"])).await;
        assert_eq!(result, Err(SourceError::Unavailable("locked".to_string())));
    }

    #[tokio::test]
    async fn test_empty_query_does_no_io() {
        let primary = Arc::new(StaticProvider::new("p", ProviderKind::LocalDatabase, Ok(Vec::new())));
        let resolver = FurnaceResolver::new(primary.clone(), None);

        assert!(resolver.resolve_latest(&query(&[])).await.unwrap().is_empty());
        assert!(resolver.resolve_latest(&query(&["  "])).await.unwrap().is_empty());
        assert_eq!(primary.furnace_calls(), 0);
    }

    #[test]
    fn test_primary_selection() {
        let peer = provider(ProviderKind::RemotePeer, Ok(Vec::new()));
        let xml = provider(ProviderKind::XmlDirectory, Ok(Vec::new()));

        let resolver = FurnaceResolver::from_providers(&[peer.clone(), xml.clone()]).unwrap();
        assert!(Arc::ptr_eq(&resolver.primary, &xml));
        assert!(resolver.peer.is_some());

        let resolver = FurnaceResolver::from_providers(&[peer.clone()]).unwrap();
        assert!(Arc::ptr_eq(&resolver.primary, &peer));
        assert!(resolver.peer.is_none());

        assert!(FurnaceResolver::from_providers(&[]).is_none());
    }
}
