/// Errors from the Administration Store and Metadata & Credentials Store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The user was not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The dataset was not found.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// No budget entry exists for the given user and dataset.
    #[error("no budget entry for ({user}, {dataset})")]
    NoBudgetEntry {
        /// User the lookup was for.
        user: String,
        /// Dataset the lookup was for.
        dataset: String,
    },

    /// A compare-and-swap write lost to a concurrent update.
    #[error("compare-and-swap conflict on ({user}, {dataset}): version {expected} does not match current version")]
    CasConflict {
        /// User the write was for.
        user: String,
        /// Dataset the write was for.
        dataset: String,
        /// Version the caller expected to be current.
        expected: i64,
    },

    /// All compare-and-swap retries were exhausted.
    #[error("compare-and-swap retries exhausted on ({user}, {dataset})")]
    CasRetriesExhausted {
        /// User the write was for.
        user: String,
        /// Dataset the write was for.
        dataset: String,
    },

    /// The connection pool returned an error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Query execution failed.
    #[error("query execution failed: {0}")]
    Query(String),

    /// The bulk-load source was invalid.
    #[error("bulk-load source invalid: {0}")]
    InvalidBulkLoad(String),
}

impl StoreError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "user_not_found",
            Self::DatasetNotFound(_) => "dataset_not_found",
            Self::NoBudgetEntry { .. } => "no_budget_entry",
            Self::CasConflict { .. } => "cas_conflict",
            Self::CasRetriesExhausted { .. } => "cas_retries_exhausted",
            Self::Pool(_) => "store_pool_error",
            Self::Query(_) => "store_query_error",
            Self::InvalidBulkLoad(_) => "invalid_bulk_load",
        }
    }
}
