//! Append-only event storage.
//!
//! The store is a capability set, not a database binding: anything that can
//! append per-organization in arrival order and answer the query surface
//! satisfies [`EventStore`]. The in-memory implementation is the reference;
//! it linearizes appends per org and serves reads from a snapshot clone so
//! queries never block ingestion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Criticality, GovernanceEvent};

/// Storage failures. `NotFound` deliberately covers both "missing" and
/// "belongs to another org" so cross-org probes cannot enumerate ids.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("event not found")]
    NotFound,
    #[error("storage failure: {0}")]
    Internal(String),
}

/// Filters for event listing. All fields are optional except pagination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub asset_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub criticality: Option<Criticality>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Default and ceiling for page sizes.
pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1_000;

/// Per-asset rollup for the asset listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
    pub asset_id: String,
    pub last_event_at: DateTime<Utc>,
    pub event_count: usize,
    pub latest_type: String,
}

/// The persistence capability the ledger core consumes.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn store(&self, event: GovernanceEvent) -> Result<(), StoreError>;
    async fn store_many(&self, events: Vec<GovernanceEvent>) -> Result<(), StoreError>;
    async fn find_by_id(&self, org_id: &str, id: &str) -> Result<GovernanceEvent, StoreError>;
    async fn list_events(
        &self,
        org_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<GovernanceEvent>, StoreError>;
    async fn list_assets(&self, org_id: &str) -> Result<Vec<AssetSummary>, StoreError>;
    async fn asset_events(
        &self,
        org_id: &str,
        asset_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<GovernanceEvent>, StoreError>;
}

/// The ingestion interface the other components emit into. Submissions are
/// fire-and-forget so emitting a decision event never stalls a hot path.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: GovernanceEvent);
}

/// Sink that drops everything. For tests and for running components
/// without a ledger attached.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl EventSink for NullSink {
    fn submit(&self, _event: GovernanceEvent) {}
}

/// Sink that retains submissions in memory, in order. Test helper.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<RwLock<Vec<GovernanceEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.events.read().clone()
    }
}

impl EventSink for RecordingSink {
    fn submit(&self, event: GovernanceEvent) {
        self.events.write().push(event);
    }
}

/// In-memory reference store: per-org append-only vectors.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    orgs: RwLock<HashMap<String, Vec<GovernanceEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, event: GovernanceEvent) {
        let mut orgs = self.orgs.write();
        orgs.entry(event.org_id.clone()).or_default().push(event);
    }

    fn snapshot(&self, org_id: &str) -> Vec<GovernanceEvent> {
        self.orgs.read().get(org_id).cloned().unwrap_or_default()
    }

    /// Event hashes for one org in append order; Merkle leaf input.
    pub fn hashes(&self, org_id: &str) -> Vec<String> {
        self.orgs
            .read()
            .get(org_id)
            .map(|events| events.iter().map(|e| e.hash.clone()).collect())
            .unwrap_or_default()
    }
}

fn apply_filter(events: Vec<GovernanceEvent>, filter: &EventFilter) -> Vec<GovernanceEvent> {
    let limit = filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let offset = filter.offset.unwrap_or(0);
    events
        .into_iter()
        .filter(|e| {
            filter.asset_id.as_ref().is_none_or(|a| &e.asset_id == a)
                && filter.event_type.as_ref().is_none_or(|t| &e.event_type == t)
                && filter.criticality.is_none_or(|c| e.criticality == c)
                && filter.since.is_none_or(|s| e.produced_at >= s)
        })
        .skip(offset)
        .take(limit)
        .collect()
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn store(&self, event: GovernanceEvent) -> Result<(), StoreError> {
        self.append(event);
        Ok(())
    }

    async fn store_many(&self, events: Vec<GovernanceEvent>) -> Result<(), StoreError> {
        for event in events {
            self.append(event);
        }
        Ok(())
    }

    async fn find_by_id(&self, org_id: &str, id: &str) -> Result<GovernanceEvent, StoreError> {
        self.orgs
            .read()
            .get(org_id)
            .and_then(|events| events.iter().find(|e| e.id == id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_events(
        &self,
        org_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<GovernanceEvent>, StoreError> {
        Ok(apply_filter(self.snapshot(org_id), filter))
    }

    async fn list_assets(&self, org_id: &str) -> Result<Vec<AssetSummary>, StoreError> {
        let mut by_asset: HashMap<String, AssetSummary> = HashMap::new();
        for event in self.snapshot(org_id) {
            by_asset
                .entry(event.asset_id.clone())
                .and_modify(|summary| {
                    summary.event_count += 1;
                    if event.produced_at >= summary.last_event_at {
                        summary.last_event_at = event.produced_at;
                        summary.latest_type = event.event_type.clone();
                    }
                })
                .or_insert_with(|| AssetSummary {
                    asset_id: event.asset_id.clone(),
                    last_event_at: event.produced_at,
                    event_count: 1,
                    latest_type: event.event_type.clone(),
                });
        }
        let mut summaries: Vec<AssetSummary> = by_asset.into_values().collect();
        summaries.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        Ok(summaries)
    }

    async fn asset_events(
        &self,
        org_id: &str,
        asset_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<GovernanceEvent>, StoreError> {
        let mut scoped = filter.clone();
        scoped.asset_id = Some(asset_id.to_string());
        Ok(apply_filter(self.snapshot(org_id), &scoped))
    }
}

impl EventSink for MemoryEventStore {
    fn submit(&self, event: GovernanceEvent) {
        self.append(event);
    }
}

impl EventSink for Arc<MemoryEventStore> {
    fn submit(&self, event: GovernanceEvent) {
        self.as_ref().submit(event);
    }
}
