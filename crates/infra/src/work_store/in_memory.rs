use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use adprompt_core::WorkItemId;
use adprompt_products::{ClaimState, GenerationState, ItemFlags, WorkItem};

use super::r#trait::{ExhaustionPolicy, WorkItemStore, WorkStoreError};

/// A row as held by [`InMemoryWorkItemStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredWorkItem {
    pub item: WorkItem,
    pub upstream_ready: bool,
    pub claim: ClaimState,
    pub result: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredWorkItem {
    /// A fresh row: upstream-ready, unclaimed, no result.
    pub fn ready(item: WorkItem) -> Self {
        Self {
            item,
            upstream_ready: true,
            claim: ClaimState::Unclaimed,
            result: None,
            updated_at: None,
        }
    }

    pub fn flags(&self) -> ItemFlags {
        ItemFlags {
            generation: GenerationState::from_result(self.result.as_deref()),
            upstream_ready: self.upstream_ready,
            claim: self.claim,
        }
    }
}

/// Call counters, for asserting how often the coordinator touched the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkStoreStats {
    pub claim_calls: usize,
    pub persist_calls: usize,
}

/// In-memory work-item store.
///
/// Intended for tests/dev. Claims happen under a single write lock, which gives
/// the same disjointness guarantee as the Postgres row locks.
#[derive(Debug, Default)]
pub struct InMemoryWorkItemStore {
    rows: RwLock<BTreeMap<WorkItemId, StoredWorkItem>>,
    claim_calls: AtomicUsize,
    persist_calls: AtomicUsize,
    fail_claims: AtomicBool,
    fail_persist: RwLock<Vec<WorkItemId>>,
}

impl InMemoryWorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with upstream-ready, unclaimed rows.
    pub fn with_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let store = Self::new();
        for item in items {
            store.insert(StoredWorkItem::ready(item));
        }
        store
    }

    /// Insert or replace a row.
    pub fn insert(&self, row: StoredWorkItem) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(row.item.id_typed(), row);
        }
    }

    pub fn get(&self, id: WorkItemId) -> Option<StoredWorkItem> {
        self.rows.read().ok()?.get(&id).cloned()
    }

    pub fn stats(&self) -> WorkStoreStats {
        WorkStoreStats {
            claim_calls: self.claim_calls.load(Ordering::SeqCst),
            persist_calls: self.persist_calls.load(Ordering::SeqCst),
        }
    }

    /// Make every subsequent claim fail with a storage error.
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    /// Make persisting the given item fail with a storage error.
    pub fn fail_persist_for(&self, id: WorkItemId) {
        if let Ok(mut ids) = self.fail_persist.write() {
            ids.push(id);
        }
    }

    fn poisoned() -> WorkStoreError {
        WorkStoreError::Storage("lock poisoned".to_string())
    }
}

#[async_trait]
impl WorkItemStore for InMemoryWorkItemStore {
    async fn try_claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(WorkStoreError::Storage("claim rejected by store".to_string()));
        }

        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;

        // BTreeMap iteration is id-ascending.
        let mut claimed = Vec::new();
        for row in rows.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if row.flags().is_claimable() {
                row.claim = ClaimState::Claimed;
                claimed.push(row.item.clone());
            }
        }
        Ok(claimed)
    }

    async fn persist_result(&self, id: WorkItemId, payload: &str) -> Result<(), WorkStoreError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_persist
            .read()
            .map_err(|_| Self::poisoned())?
            .contains(&id)
        {
            return Err(WorkStoreError::Storage(format!("write of {id} rejected by store")));
        }

        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let row = rows.get_mut(&id).ok_or(WorkStoreError::NotFound(id))?;
        if row.result.is_some() {
            return Err(WorkStoreError::AlreadyCompleted(id));
        }
        row.result = Some(payload.to_string());
        row.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn settle_exhausted(
        &self,
        id: WorkItemId,
        policy: ExhaustionPolicy,
    ) -> Result<(), WorkStoreError> {
        let target = match policy {
            ExhaustionPolicy::LeaveClaimed => return Ok(()),
            ExhaustionPolicy::Release => ClaimState::Unclaimed,
            ExhaustionPolicy::MarkFailed => ClaimState::Failed,
        };

        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let row = rows.get_mut(&id).ok_or(WorkStoreError::NotFound(id))?;
        if row.claim == ClaimState::Claimed && row.result.is_none() {
            row.claim = target;
            row.updated_at = Some(Utc::now());
        }
        Ok(())
    }
}
