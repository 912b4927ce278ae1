use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, Pool, Postgres};
use std::time::Duration;
use sync_core::store::{
    AuthorizationStore, ErrorField, RecordOutcome, RetryQuery, SnapshotStore, StatusUpdate,
    SyncLogStore,
};
use sync_core::{
    AuthorizationRecord, NewAuthorization, NewSyncLogEntry, SyncLogEntry, SyncStatus,
    UserVersionSnapshot,
};
use tracing::info;

pub struct Database {
    pool: Pool<Postgres>,
}

#[derive(Debug, FromRow)]
struct AuthRow {
    id: i64,
    user_id: String,
    addr: String,
    dcid: String,
    block_height: i64,
    balance: i64,
    created_at: DateTime<Utc>,
}

impl From<AuthRow> for AuthorizationRecord {
    fn from(row: AuthRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            address: row.addr,
            dcid: row.dcid,
            baseline_height: row.block_height,
            baseline_balance: row.balance,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SyncLogRow {
    id: i64,
    user_id: String,
    block_height: i64,
    balance_after: i64,
    change_value: i64,
    event_type: String,
    tx_id: String,
    contract_name: String,
    chain_id: String,
    sync_status: i16,
    retry_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SyncLogRow> for SyncLogEntry {
    type Error = sync_core::Error;

    fn try_from(row: SyncLogRow) -> sync_core::Result<Self> {
        let status = SyncStatus::from_code(row.sync_status).ok_or_else(|| {
            sync_core::Error::Storage(format!(
                "row {} has unknown sync status {}",
                row.id, row.sync_status
            ))
        })?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            block_height: row.block_height,
            balance_after: row.balance_after,
            change_value: row.change_value,
            event_type: row.event_type,
            tx_id: row.tx_id,
            contract_name: row.contract_name,
            chain_id: row.chain_id,
            status,
            retry_count: row.retry_count,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    user_id: String,
    current_version: i64,
    current_balance: i64,
    block_height: i64,
    updated_at: DateTime<Utc>,
}

impl From<SnapshotRow> for UserVersionSnapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            user_id: row.user_id,
            current_version: row.current_version,
            current_balance: row.current_balance,
            block_height: row.block_height,
            updated_at: row.updated_at,
        }
    }
}

fn storage(err: sqlx::Error) -> sync_core::Error {
    sync_core::Error::Storage(err.to_string())
}

fn to_entries(rows: Vec<SyncLogRow>) -> sync_core::Result<Vec<SyncLogEntry>> {
    rows.into_iter().map(SyncLogEntry::try_from).collect()
}

const INSERT_LOG_SQL: &str = r#"
    INSERT INTO sync_event_log
        (user_id, block_height, balance_after, change_value, event_type, tx_id, contract_name, chain_id, sync_status, retry_count)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0)
    ON CONFLICT (tx_id) DO NOTHING
    RETURNING *
"#;

impl Database {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Database { pool }
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl AuthorizationStore for Database {
    async fn find_by_address(&self, address: &str) -> sync_core::Result<Option<AuthorizationRecord>> {
        let row = sqlx::query_as::<_, AuthRow>("SELECT * FROM user_auth WHERE addr = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Ok(row.map(Into::into))
    }

    async fn find_by_user_id(&self, user_id: &str) -> sync_core::Result<Option<AuthorizationRecord>> {
        let row = sqlx::query_as::<_, AuthRow>("SELECT * FROM user_auth WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Ok(row.map(Into::into))
    }

    async fn authorize(&self, new: NewAuthorization) -> sync_core::Result<AuthorizationRecord> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let auth = sqlx::query_as::<_, AuthRow>(
            r#"
            INSERT INTO user_auth (user_id, addr, dcid, block_height, balance, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING *
            "#,
        )
        .bind(&new.user_id)
        .bind(&new.address)
        .bind(&new.dcid)
        .bind(new.baseline_height)
        .bind(new.baseline_balance)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let snapshot = sqlx::query(
            r#"
            INSERT INTO user_version_snapshot (user_id, current_version, current_balance, block_height, updated_at)
            VALUES ($1, 0, $2, $3, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&new.user_id)
        .bind(new.baseline_balance)
        .bind(new.baseline_height)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        // Baseline row only accompanies a freshly created snapshot
        if snapshot.rows_affected() > 0 {
            let init = &new.init_entry;
            sqlx::query(INSERT_LOG_SQL)
                .bind(&init.user_id)
                .bind(init.block_height)
                .bind(init.balance_after)
                .bind(init.change_value)
                .bind(&init.event_type)
                .bind(&init.tx_id)
                .bind(&init.contract_name)
                .bind(&init.chain_id)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;

        Ok(auth.into())
    }
}

#[async_trait]
impl SyncLogStore for Database {
    async fn insert_or_ignore(&self, entry: &NewSyncLogEntry) -> sync_core::Result<RecordOutcome> {
        let inserted = sqlx::query_as::<_, SyncLogRow>(INSERT_LOG_SQL)
            .bind(&entry.user_id)
            .bind(entry.block_height)
            .bind(entry.balance_after)
            .bind(entry.change_value)
            .bind(&entry.event_type)
            .bind(&entry.tx_id)
            .bind(&entry.contract_name)
            .bind(&entry.chain_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        if let Some(row) = inserted {
            return Ok(RecordOutcome::Inserted(row.try_into()?));
        }

        let existing = sqlx::query_as::<_, SyncLogRow>("SELECT * FROM sync_event_log WHERE tx_id = $1")
            .bind(&entry.tx_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        Ok(RecordOutcome::Duplicate(existing.try_into()?))
    }

    async fn get(&self, id: i64) -> sync_core::Result<Option<SyncLogEntry>> {
        let row = sqlx::query_as::<_, SyncLogRow>("SELECT * FROM sync_event_log WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(SyncLogEntry::try_from).transpose()
    }

    async fn max_height(&self, contract_name: &str, event_type: &str) -> sync_core::Result<Option<i64>> {
        sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MAX(block_height)
            FROM sync_event_log
            WHERE contract_name = $1 AND event_type = $2
            "#,
        )
        .bind(contract_name)
        .bind(event_type)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }

    async fn claim(
        &self,
        id: i64,
        expected: SyncStatus,
        seen_updated_at: DateTime<Utc>,
    ) -> sync_core::Result<Option<SyncLogEntry>> {
        let row = sqlx::query_as::<_, SyncLogRow>(
            r#"
            UPDATE sync_event_log
            SET sync_status = $1,
                updated_at = NOW()
            WHERE id = $2
                AND sync_status = $3
                AND updated_at = $4
                AND sync_status NOT IN ($5, $6)
            RETURNING *
            "#,
        )
        .bind(SyncStatus::Sent.code())
        .bind(id)
        .bind(expected.code())
        .bind(seen_updated_at)
        .bind(SyncStatus::Success.code())
        .bind(SyncStatus::Ignored.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(SyncLogEntry::try_from).transpose()
    }

    async fn increment_retry_count(&self, id: i64) -> sync_core::Result<i32> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE sync_event_log
            SET retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND sync_status NOT IN ($2, $3)
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .bind(SyncStatus::Success.code())
        .bind(SyncStatus::Ignored.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        count.ok_or(sync_core::Error::EntryNotFound(id))
    }

    async fn update_status(&self, id: i64, update: &StatusUpdate) -> sync_core::Result<bool> {
        let message = match &update.error {
            ErrorField::Clear => None,
            ErrorField::Set(message) => Some(message.as_str()),
        };

        let result = sqlx::query(
            r#"
            UPDATE sync_event_log
            SET sync_status = $1,
                retry_count = COALESCE($2, retry_count),
                error_message = $3,
                updated_at = NOW()
            WHERE id = $4 AND sync_status NOT IN ($5, $6)
            "#,
        )
        .bind(update.status.code())
        .bind(update.retry_count)
        .bind(message)
        .bind(id)
        .bind(SyncStatus::Success.code())
        .bind(SyncStatus::Ignored.code())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_retryable(&self, query: &RetryQuery) -> sync_core::Result<Vec<SyncLogEntry>> {
        let rows = sqlx::query_as::<_, SyncLogRow>(
            r#"
            SELECT *
            FROM sync_event_log
            WHERE sync_status IN ($1, $2)
                OR (sync_status = $3 AND updated_at < $4)
            ORDER BY user_id, block_height, id
            LIMIT $5
            "#,
        )
        .bind(SyncStatus::Pending.code())
        .bind(SyncStatus::Failed.code())
        .bind(SyncStatus::Sent.code())
        .bind(query.sent_before)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        to_entries(rows)
    }

    async fn list_by_status(&self, status: SyncStatus, limit: i64) -> sync_core::Result<Vec<SyncLogEntry>> {
        let rows = sqlx::query_as::<_, SyncLogRow>(
            r#"
            SELECT *
            FROM sync_event_log
            WHERE sync_status = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(status.code())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        to_entries(rows)
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn get_snapshot(&self, user_id: &str) -> sync_core::Result<Option<UserVersionSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM user_version_snapshot WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(Into::into))
    }

    async fn advance_snapshot(
        &self,
        user_id: &str,
        block_height: i64,
        balance: i64,
    ) -> sync_core::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_version_snapshot (user_id, current_version, current_balance, block_height, updated_at)
            VALUES ($1, 1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET current_version = user_version_snapshot.current_version + 1,
                current_balance = EXCLUDED.current_balance,
                block_height = EXCLUDED.block_height,
                updated_at = NOW()
            WHERE user_version_snapshot.block_height <= EXCLUDED.block_height
            "#,
        )
        .bind(user_id)
        .bind(balance)
        .bind(block_height)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }
}
