//! In-memory implementation of the store traits
//!
//! Mirrors the conditional-update semantics of the SQL implementation so the
//! pipeline can be exercised without a database.

use super::{
    AuthorizationStore, ErrorField, RecordOutcome, RetryQuery, SnapshotStore, StatusUpdate,
    SyncLogStore,
};
use crate::types::{
    AuthorizationRecord, NewAuthorization, NewSyncLogEntry, SyncLogEntry, SyncStatus,
    UserVersionSnapshot,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    auths: Vec<AuthorizationRecord>,
    logs: BTreeMap<i64, SyncLogEntry>,
    tx_index: HashMap<String, i64>,
    snapshots: HashMap<String, UserVersionSnapshot>,
    next_auth_id: i64,
    next_log_id: i64,
}

impl State {
    fn insert_log(&mut self, entry: &NewSyncLogEntry) -> RecordOutcome {
        if let Some(id) = self.tx_index.get(&entry.tx_id) {
            if let Some(existing) = self.logs.get(id) {
                return RecordOutcome::Duplicate(existing.clone());
            }
        }

        self.next_log_id += 1;
        let now = Utc::now();
        let row = SyncLogEntry {
            id: self.next_log_id,
            user_id: entry.user_id.clone(),
            block_height: entry.block_height,
            balance_after: entry.balance_after,
            change_value: entry.change_value,
            event_type: entry.event_type.clone(),
            tx_id: entry.tx_id.clone(),
            contract_name: entry.contract_name.clone(),
            chain_id: entry.chain_id.clone(),
            status: SyncStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.tx_index.insert(row.tx_id.clone(), row.id);
        self.logs.insert(row.id, row.clone());
        RecordOutcome::Inserted(row)
    }
}

/// Store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the database going away (`true`) or coming back (`false`)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of mutating statements that changed a row
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every sync-log row in id order
    pub async fn all_entries(&self) -> Vec<SyncLogEntry> {
        self.state.read().await.logs.values().cloned().collect()
    }

    /// Insert a baseline directly, bypassing the authorize flow
    pub async fn insert_authorization(
        &self,
        user_id: &str,
        address: &str,
        baseline_height: i64,
        baseline_balance: i64,
    ) -> AuthorizationRecord {
        let mut state = self.state.write().await;
        state.next_auth_id += 1;
        let record = AuthorizationRecord {
            id: state.next_auth_id,
            user_id: user_id.to_string(),
            address: address.to_string(),
            dcid: String::new(),
            baseline_height,
            baseline_balance,
            created_at: Utc::now(),
        };
        state.auths.push(record.clone());
        record
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Storage("database unavailable".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthorizationStore for MemoryStore {
    async fn find_by_address(&self, address: &str) -> Result<Option<AuthorizationRecord>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.auths.iter().find(|a| a.address == address).cloned())
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<AuthorizationRecord>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.auths.iter().find(|a| a.user_id == user_id).cloned())
    }

    async fn authorize(&self, new: NewAuthorization) -> Result<AuthorizationRecord> {
        self.check_available()?;
        let mut state = self.state.write().await;

        if state
            .auths
            .iter()
            .any(|a| a.user_id == new.user_id || a.address == new.address)
        {
            return Err(Error::Storage(format!(
                "duplicate key: user {} or address {} already authorized",
                new.user_id, new.address
            )));
        }

        state.next_auth_id += 1;
        let now = Utc::now();
        let record = AuthorizationRecord {
            id: state.next_auth_id,
            user_id: new.user_id.clone(),
            address: new.address.clone(),
            dcid: new.dcid.clone(),
            baseline_height: new.baseline_height,
            baseline_balance: new.baseline_balance,
            created_at: now,
        };
        state.auths.push(record.clone());

        // Baseline row only accompanies a freshly created snapshot
        if !state.snapshots.contains_key(&new.user_id) {
            state.snapshots.insert(
                new.user_id.clone(),
                UserVersionSnapshot {
                    user_id: new.user_id.clone(),
                    current_version: 0,
                    current_balance: new.baseline_balance,
                    block_height: new.baseline_height,
                    updated_at: now,
                },
            );
            state.insert_log(&new.init_entry);
        }
        self.record_write();

        Ok(record)
    }
}

#[async_trait]
impl SyncLogStore for MemoryStore {
    async fn insert_or_ignore(&self, entry: &NewSyncLogEntry) -> Result<RecordOutcome> {
        self.check_available()?;
        let outcome = self.state.write().await.insert_log(entry);
        if outcome.is_inserted() {
            self.record_write();
        }
        Ok(outcome)
    }

    async fn get(&self, id: i64) -> Result<Option<SyncLogEntry>> {
        self.check_available()?;
        Ok(self.state.read().await.logs.get(&id).cloned())
    }

    async fn max_height(&self, contract_name: &str, event_type: &str) -> Result<Option<i64>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .logs
            .values()
            .filter(|e| e.contract_name == contract_name && e.event_type == event_type)
            .map(|e| e.block_height)
            .max())
    }

    async fn claim(
        &self,
        id: i64,
        expected: SyncStatus,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<Option<SyncLogEntry>> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(row) = state.logs.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != expected || row.updated_at != seen_updated_at || row.status.is_terminal() {
            return Ok(None);
        }
        row.status = SyncStatus::Sent;
        row.updated_at = Utc::now();
        let claimed = row.clone();
        drop(state);
        self.record_write();
        Ok(Some(claimed))
    }

    async fn increment_retry_count(&self, id: i64) -> Result<i32> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let row = state
            .logs
            .get_mut(&id)
            .filter(|row| !row.status.is_terminal())
            .ok_or(Error::EntryNotFound(id))?;
        row.retry_count += 1;
        row.updated_at = Utc::now();
        let count = row.retry_count;
        drop(state);
        self.record_write();
        Ok(count)
    }

    async fn update_status(&self, id: i64, update: &StatusUpdate) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(row) = state.logs.get_mut(&id) else {
            return Ok(false);
        };
        if row.status.is_terminal() {
            return Ok(false);
        }
        row.status = update.status;
        if let Some(count) = update.retry_count {
            row.retry_count = count;
        }
        match &update.error {
            ErrorField::Clear => row.error_message = None,
            ErrorField::Set(message) => row.error_message = Some(message.clone()),
        }
        row.updated_at = Utc::now();
        drop(state);
        self.record_write();
        Ok(true)
    }

    async fn fetch_retryable(&self, query: &RetryQuery) -> Result<Vec<SyncLogEntry>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut rows: Vec<SyncLogEntry> = state
            .logs
            .values()
            .filter(|e| match e.status {
                SyncStatus::Pending | SyncStatus::Failed => true,
                SyncStatus::Sent => e.updated_at < query.sent_before,
                SyncStatus::Success | SyncStatus::Ignored => false,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.user_id.as_str(), a.block_height, a.id).cmp(&(b.user_id.as_str(), b.block_height, b.id))
        });
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_by_status(&self, status: SyncStatus, limit: i64) -> Result<Vec<SyncLogEntry>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .logs
            .values()
            .rev()
            .filter(|e| e.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get_snapshot(&self, user_id: &str) -> Result<Option<UserVersionSnapshot>> {
        self.check_available()?;
        Ok(self.state.read().await.snapshots.get(user_id).cloned())
    }

    async fn advance_snapshot(
        &self,
        user_id: &str,
        block_height: i64,
        balance: i64,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        let snapshot = state
            .snapshots
            .entry(user_id.to_string())
            .or_insert_with(|| UserVersionSnapshot {
                user_id: user_id.to_string(),
                current_version: 0,
                current_balance: balance,
                block_height,
                updated_at: now,
            });
        if snapshot.block_height > block_height {
            return Ok(false);
        }
        snapshot.current_version += 1;
        snapshot.current_balance = balance;
        snapshot.block_height = block_height;
        snapshot.updated_at = now;
        drop(state);
        self.record_write();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(tx_id: &str, user: &str, height: i64) -> NewSyncLogEntry {
        NewSyncLogEntry {
            user_id: user.to_string(),
            block_height: height,
            balance_after: 100,
            change_value: 10,
            event_type: "cic_topic".to_string(),
            tx_id: tx_id.to_string(),
            contract_name: "carbon_integral".to_string(),
            chain_id: "chain1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_or_ignore_deduplicates() {
        let store = MemoryStore::new();
        let first = store.insert_or_ignore(&new_entry("tx1", "u1", 10)).await.unwrap();
        let second = store.insert_or_ignore(&new_entry("tx1", "u1", 11)).await.unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(first.entry().id, second.entry().id);
        assert_eq!(second.entry().block_height, 10);
        assert_eq!(store.all_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let store = MemoryStore::new();
        let row = store
            .insert_or_ignore(&new_entry("tx1", "u1", 10))
            .await
            .unwrap()
            .entry()
            .clone();

        let claimed = store
            .claim(row.id, SyncStatus::Pending, row.updated_at)
            .await
            .unwrap();
        assert_eq!(claimed.unwrap().status, SyncStatus::Sent);

        // Second claim with the stale view loses
        let again = store
            .claim(row.id, SyncStatus::Pending, row.updated_at)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_terminal_rows_are_frozen() {
        let store = MemoryStore::new();
        let row = store
            .insert_or_ignore(&new_entry("tx1", "u1", 10))
            .await
            .unwrap()
            .entry()
            .clone();

        assert!(store.update_status(row.id, &StatusUpdate::success()).await.unwrap());
        assert!(!store
            .update_status(row.id, &StatusUpdate::with_error(SyncStatus::Failed, "late"))
            .await
            .unwrap());
        assert!(store.increment_retry_count(row.id).await.is_err());
        assert_eq!(store.get(row.id).await.unwrap().unwrap().status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn test_fetch_retryable_orders_by_user_then_height() {
        let store = MemoryStore::new();
        store.insert_or_ignore(&new_entry("a", "u2", 5)).await.unwrap();
        store.insert_or_ignore(&new_entry("b", "u1", 9)).await.unwrap();
        store.insert_or_ignore(&new_entry("c", "u1", 3)).await.unwrap();

        let rows = store
            .fetch_retryable(&RetryQuery {
                sent_before: Utc::now(),
                limit: 10,
            })
            .await
            .unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.tx_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.insert_or_ignore(&new_entry("tx1", "u1", 1)).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_snapshot_never_moves_backwards() {
        let store = MemoryStore::new();
        assert!(store.advance_snapshot("u1", 10, 100).await.unwrap());
        assert!(!store.advance_snapshot("u1", 5, 50).await.unwrap());

        let snapshot = store.get_snapshot("u1").await.unwrap().unwrap();
        assert_eq!(snapshot.current_version, 1);
        assert_eq!(snapshot.current_balance, 100);
    }
}
