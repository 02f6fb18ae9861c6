//! Postgres-backed Administration Store.
//!
//! Connection pooling follows `deadpool-postgres`'s standard setup; the CAS
//! primitive is a single `UPDATE ... WHERE version = $n RETURNING version`
//! so the read-check-write happens atomically inside Postgres rather than
//! racing two round-trips from this process.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use uuid::Uuid;

use lomas_error::StoreError;

use crate::traits::AdminStore;
use crate::types::{Archive, ArchiveStatus, Budget, BudgetEntry, User};

/// Postgres-backed `AdminStore`.
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connect with a default pool size.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Pool` if the pool cannot be created or the
    /// initial connection check fails.
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_pool_size(connection_string, 10).await
    }

    pub async fn with_pool_size(connection_string: &str, max_size: usize) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(format!("failed to create pool: {e}")))?;

        let client =
            pool.get().await.map_err(|e| StoreError::Pool(format!("failed to acquire connection: {e}")))?;
        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| StoreError::Query(format!("connectivity check failed: {e}")))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl AdminStore for PostgresStore {
    async fn get_user(&self, user: &str) -> Result<User, StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;

        let user_row = client
            .query_opt("SELECT may_query FROM users WHERE name = $1", &[&user])
            .await
            .map_err(|e| StoreError::Query(format!("user lookup failed: {e}")))?
            .ok_or_else(|| StoreError::UserNotFound(user.to_string()))?;
        let may_query: bool = user_row.get(0);

        let rows = client
            .query(
                "SELECT dataset_name, initial_epsilon, initial_delta, spent_epsilon, spent_delta, version \
                 FROM budget_entries WHERE user_name = $1 ORDER BY dataset_name",
                &[&user],
            )
            .await
            .map_err(|e| StoreError::Query(format!("budget lookup failed: {e}")))?;

        let datasets = rows
            .into_iter()
            .map(|row| BudgetEntry {
                dataset_name: row.get(0),
                initial: Budget::new(row.get(1), row.get(2)),
                spent: Budget::new(row.get(3), row.get(4)),
                version: row.get(5),
            })
            .collect();

        Ok(User { name: user.to_string(), may_query, datasets })
    }

    async fn get_budget(&self, user: &str, dataset: &str) -> Result<Budget, StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;
        let row = client
            .query_opt(
                "SELECT initial_epsilon - spent_epsilon, initial_delta - spent_delta \
                 FROM budget_entries WHERE user_name = $1 AND dataset_name = $2",
                &[&user, &dataset],
            )
            .await
            .map_err(|e| StoreError::Query(format!("budget lookup failed: {e}")))?
            .ok_or_else(|| StoreError::NoBudgetEntry {
                user: user.to_string(),
                dataset: dataset.to_string(),
            })?;
        Ok(Budget::new(row.get(0), row.get(1)))
    }

    async fn cas_debit(
        &self,
        user: &str,
        dataset: &str,
        cost: Budget,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;

        let updated = client
            .query_opt(
                "UPDATE budget_entries \
                 SET spent_epsilon = spent_epsilon + $1, spent_delta = spent_delta + $2, version = version + 1 \
                 WHERE user_name = $3 AND dataset_name = $4 AND version = $5 \
                 AND spent_epsilon + $1 <= initial_epsilon AND spent_delta + $2 <= initial_delta \
                 RETURNING version",
                &[&cost.epsilon, &cost.delta, &user, &dataset, &expected_version],
            )
            .await
            .map_err(|e| StoreError::Query(format!("debit failed: {e}")))?;

        match updated {
            Some(row) => Ok(row.get(0)),
            None => Err(StoreError::CasConflict {
                user: user.to_string(),
                dataset: dataset.to_string(),
                expected: expected_version,
            }),
        }
    }

    async fn cas_restore(
        &self,
        user: &str,
        dataset: &str,
        cost: Budget,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;

        let updated = client
            .query_opt(
                "UPDATE budget_entries \
                 SET spent_epsilon = spent_epsilon - $1, spent_delta = spent_delta - $2, version = version + 1 \
                 WHERE user_name = $3 AND dataset_name = $4 AND version = $5 \
                 RETURNING version",
                &[&cost.epsilon, &cost.delta, &user, &dataset, &expected_version],
            )
            .await
            .map_err(|e| StoreError::Query(format!("compensation failed: {e}")))?;

        updated.map(|_| ()).ok_or_else(|| StoreError::CasConflict {
            user: user.to_string(),
            dataset: dataset.to_string(),
            expected: expected_version,
        })
    }

    async fn append_archive(&self, archive: Archive) -> Result<(), StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;
        client
            .execute(
                "INSERT INTO queries_archives \
                 (job_id, user_name, dataset_name, library, payload_hash, measured_epsilon, \
                  measured_delta, status, submitted_at, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &archive.job_id,
                    &archive.user,
                    &archive.dataset,
                    &archive.library,
                    &archive.payload_hash,
                    &archive.measured_cost.epsilon,
                    &archive.measured_cost.delta,
                    &status_code(archive.status),
                    &archive.submitted_at,
                    &archive.completed_at,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("archive insert failed: {e}")))?;
        Ok(())
    }

    async fn get_archives(&self, user: &str) -> Result<Vec<Archive>, StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;
        let rows = client
            .query(
                "SELECT job_id, user_name, dataset_name, library, payload_hash, measured_epsilon, \
                 measured_delta, status, submitted_at, completed_at \
                 FROM queries_archives WHERE user_name = $1 ORDER BY submitted_at",
                &[&user],
            )
            .await
            .map_err(|e| StoreError::Query(format!("archive query failed: {e}")))?;
        rows.into_iter().map(row_to_archive).collect()
    }

    async fn get_archive(&self, job_id: Uuid) -> Result<Option<Archive>, StoreError> {
        let client =
            self.pool.get().await.map_err(|e| StoreError::Pool(format!("acquire failed: {e}")))?;
        let row = client
            .query_opt(
                "SELECT job_id, user_name, dataset_name, library, payload_hash, measured_epsilon, \
                 measured_delta, status, submitted_at, completed_at \
                 FROM queries_archives WHERE job_id = $1",
                &[&job_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("archive lookup failed: {e}")))?;
        row.map(row_to_archive).transpose()
    }
}

const fn status_code(status: ArchiveStatus) -> &'static str {
    match status {
        ArchiveStatus::Ok => "ok",
        ArchiveStatus::LibFail => "lib_fail",
        ArchiveStatus::InternalFail => "internal_fail",
        ArchiveStatus::Compensated => "compensated",
    }
}

fn row_to_archive(row: tokio_postgres::Row) -> Result<Archive, StoreError> {
    let status_str: String = row.get(7);
    let status = match status_str.as_str() {
        "ok" => ArchiveStatus::Ok,
        "lib_fail" => ArchiveStatus::LibFail,
        "internal_fail" => ArchiveStatus::InternalFail,
        "compensated" => ArchiveStatus::Compensated,
        other => return Err(StoreError::Query(format!("unrecognized archive status: {other}"))),
    };
    Ok(Archive {
        job_id: row.get(0),
        user: row.get(1),
        dataset: row.get(2),
        library: row.get(3),
        payload_hash: row.get(4),
        measured_cost: Budget::new(row.get(5), row.get(6)),
        status,
        submitted_at: row.get(8),
        completed_at: row.get(9),
    })
}
