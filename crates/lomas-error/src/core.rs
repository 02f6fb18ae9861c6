/// The four client-visible error kinds from the admission protocol.
///
/// Each variant documents its effect on the user's budget (see the
/// `ErrorKind`/budget-effect table): `InvalidQuery` and `Unauthorized`
/// never touch `spent`; `ExternalLib` is compensated when it fires after a
/// debit already happened; `InternalError` leaves the debit standing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// The query was rejected as malformed or inadmissible.
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected.
        reason: InvalidQueryReason,
    },

    /// The external differential-privacy backend failed.
    #[error("external DP backend failure: {message}")]
    ExternalLib {
        /// Message describing the backend failure.
        message: String,
    },

    /// The user was refused access.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Why the user was refused.
        reason: UnauthorizedReason,
    },

    /// An internal error occurred.
    #[error("internal error: {message}")]
    InternalError {
        /// Message describing the internal error.
        message: String,
    },
}

/// Why a query was rejected as malformed or inadmissible.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidQueryReason {
    /// The payload failed schema validation.
    #[error("payload failed schema validation: {0}")]
    SchemaViolation(String),

    /// The requested dataset is unknown.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// Spent plus measured cost would exceed the initial budget on the dataset.
    #[error(
        "budget exceeded: spent + measured cost would exceed initial budget on dataset {dataset}"
    )]
    BudgetExceeded {
        /// Dataset whose budget would be exceeded.
        dataset: String,
    },

    /// `fixed_delta` was supplied for a non-zCDP pipeline.
    #[error("fixed_delta supplied for a non-zCDP pipeline")]
    FixedDeltaNotApplicable,
}

/// Why a user was refused access.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UnauthorizedReason {
    /// The user is unknown.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The user is not permitted to query.
    #[error("user may not query")]
    MayNotQuery,

    /// The user lacks a grant on the dataset.
    #[error("user lacks a grant on dataset {0}")]
    NoGrant(String),
}

impl CoreError {
    /// Stable machine-readable code, mirroring the four-kind taxonomy.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidQuery { .. } => "invalid_query",
            Self::ExternalLib { .. } => "external_lib",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InternalError { .. } => "internal_error",
        }
    }

    /// Build an [`CoreError::InvalidQuery`] with the given reason.
    #[must_use]
    pub fn invalid_query(reason: InvalidQueryReason) -> Self {
        Self::InvalidQuery { reason }
    }

    /// Build a [`CoreError::Unauthorized`] with the given reason.
    #[must_use]
    pub fn unauthorized(reason: UnauthorizedReason) -> Self {
        Self::Unauthorized { reason }
    }

    /// Build a [`CoreError::ExternalLib`] with the given message.
    #[must_use]
    pub fn external_lib(message: impl Into<String>) -> Self {
        Self::ExternalLib { message: message.into() }
    }

    /// Build a [`CoreError::InternalError`] with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }
}
