//! Postgres-backed work-item store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `WorkStoreError` as follows:
//!
//! | SQLx Error | WorkStoreError | Scenario |
//! |------------|----------------|----------|
//! | PoolClosed | `PoolClosed` | Pool closed while the job was shutting down |
//! | Database | `Storage` | Constraint, permission or syntax errors (e.g. wrong column override) |
//! | Other | `Storage` | Network errors, connection failures, decode failures |
//!
//! `NotFound` and `AlreadyCompleted` are never produced by SQLx directly; they
//! come from the follow-up lookup after an update that touched no row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Row};
use tracing::{Span, debug, instrument};

use adprompt_core::WorkItemId;
use adprompt_products::{ClaimState, WorkItem};

use super::r#trait::{ExhaustionPolicy, WorkItemStore, WorkStoreError};
use super::table::WorkTable;

/// Postgres-backed work-item store.
///
/// ## Atomic claim
///
/// The claim is one `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP LOCKED)
/// RETURNING ...` statement run inside a transaction. Rows locked by a
/// concurrent claimer are skipped rather than waited on, so two runs never
/// receive the same row. Any error rolls the transaction back.
#[derive(Debug, Clone)]
pub struct PostgresWorkItemStore {
    pool: Arc<PgPool>,
    table: WorkTable,
}

impl PostgresWorkItemStore {
    pub fn new(pool: PgPool, table: WorkTable) -> Self {
        Self {
            pool: Arc::new(pool),
            table,
        }
    }

    /// Open a small pool; the job issues one statement at a time.
    ///
    /// Gives up after `timeout` when no connection can be established.
    pub async fn connect(
        database_url: &str,
        table: WorkTable,
        timeout: Duration,
    ) -> Result<Self, WorkStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, table))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool and wait for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[instrument(skip(self), fields(table = %self.table.table(), claimed = tracing::field::Empty), err)]
    pub async fn claim(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError> {
        let limit = i64::try_from(limit)
            .map_err(|_| WorkStoreError::Storage(format!("claim limit {limit} out of range")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_claim", e))?;

        let rows = match sqlx::query(&self.table.claim_sql())
            .bind(limit)
            .fetch_all(&mut *tx)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                // Best-effort; dropping the transaction rolls back as well.
                let _ = tx.rollback().await;
                return Err(map_sqlx_error("claim", e));
            }
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let decoded = ClaimedRow::from_row(row).map_err(|e| {
                WorkStoreError::Storage(format!("failed to decode claimed row: {e}"))
            });
            match decoded {
                Ok(r) => items.push(r.into()),
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(e);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_claim", e))?;

        // RETURNING order is unspecified.
        items.sort_by_key(|item: &WorkItem| item.id_typed());
        Span::current().record("claimed", items.len());
        Ok(items)
    }

    #[instrument(skip(self, payload), fields(item_id = %id, payload_len = payload.len()), err)]
    pub async fn write_result(&self, id: WorkItemId, payload: &str) -> Result<(), WorkStoreError> {
        let updated = sqlx::query(&self.table.persist_sql())
            .bind(payload)
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("persist_result", e))?
            .rows_affected();

        if updated > 0 {
            return Ok(());
        }

        let completed: Option<bool> = sqlx::query(&self.table.lookup_sql())
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("lookup", e))?
            .map(|row| row.try_get::<bool, _>("completed"))
            .transpose()
            .map_err(|e| map_sqlx_error("lookup", e))?;

        match completed {
            None => Err(WorkStoreError::NotFound(id)),
            Some(_) => Err(WorkStoreError::AlreadyCompleted(id)),
        }
    }

    #[instrument(skip(self), fields(item_id = %id, policy = %policy), err)]
    pub async fn settle(&self, id: WorkItemId, policy: ExhaustionPolicy) -> Result<(), WorkStoreError> {
        let flag = match policy {
            ExhaustionPolicy::LeaveClaimed => return Ok(()),
            ExhaustionPolicy::Release => ClaimState::Unclaimed.as_flag(),
            ExhaustionPolicy::MarkFailed => ClaimState::Failed.as_flag(),
        };

        let updated = sqlx::query(&self.table.settle_sql())
            .bind(flag)
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("settle_exhausted", e))?
            .rows_affected();

        if updated == 0 {
            debug!("row no longer claimed without result; nothing to settle");
        }
        Ok(())
    }
}

#[async_trait]
impl WorkItemStore for PostgresWorkItemStore {
    async fn try_claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, WorkStoreError> {
        self.claim(limit).await
    }

    async fn persist_result(&self, id: WorkItemId, payload: &str) -> Result<(), WorkStoreError> {
        self.write_result(id, payload).await
    }

    async fn settle_exhausted(
        &self,
        id: WorkItemId,
        policy: ExhaustionPolicy,
    ) -> Result<(), WorkStoreError> {
        self.settle(id, policy).await
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> WorkStoreError {
    match err {
        sqlx::Error::PoolClosed => WorkStoreError::PoolClosed(operation.to_string()),
        sqlx::Error::Database(db_err) => {
            let code = db_err
                .code()
                .map(|c| c.into_owned())
                .unwrap_or_else(|| "-".to_string());
            WorkStoreError::Storage(format!(
                "database error in {operation} (code {code}): {}",
                db_err.message()
            ))
        }
        _ => WorkStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Row shape produced by the claim statement's `RETURNING` list.
#[derive(Debug)]
struct ClaimedRow {
    id: i64,
    title: Option<String>,
    payload: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for ClaimedRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ClaimedRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<ClaimedRow> for WorkItem {
    fn from(row: ClaimedRow) -> Self {
        WorkItem::new(WorkItemId::new(row.id), row.title, row.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_keeps_operation_name() {
        let err = map_sqlx_error("persist_result", sqlx::Error::PoolClosed);
        assert_eq!(err, WorkStoreError::PoolClosed("persist_result".into()));
    }

    #[test]
    fn other_errors_become_storage_errors() {
        let err = map_sqlx_error("claim", sqlx::Error::RowNotFound);
        match err {
            WorkStoreError::Storage(msg) => assert!(msg.contains("claim")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn claimed_row_converts_to_work_item() {
        let item: WorkItem = ClaimedRow {
            id: 7,
            title: Some("Áo khoác".into()),
            payload: None,
        }
        .into();
        assert_eq!(item.id_typed(), WorkItemId::new(7));
        assert_eq!(item.title(), Some("Áo khoác"));
    }
}
