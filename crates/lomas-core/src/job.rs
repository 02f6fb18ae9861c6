//! The concrete job payload and terminal outcome carried over a
//! `lomas_broker::TaskBroker`. Kept in this crate (not in `lomas-broker`,
//! which is generic over both) because only the admission engine knows
//! what a query job looks like.

use serde_json::Value;

use lomas_cache::TabularView;
use lomas_dbr::{LibraryTag, QueryOutcome};

/// A query accepted for execution, handed to a worker after the budget
/// debit has already happened. The broker assigns the job its id at
/// enqueue time; workers never need it to run the job itself.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub user: String,
    pub dataset: String,
    pub library: LibraryTag,
    pub payload: Value,
    pub view: TabularView,
}

/// What a worker reports back through the job's reply channel.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Ok(QueryOutcome),
    LibFail(String),
    InternalFail(String),
}
