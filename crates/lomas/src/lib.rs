//! Re-exports the public surface of every lomas crate for downstream
//! embedding and testing, the way `fraiseql`'s umbrella crate binds
//! `fraiseql-core`/`fraiseql-server`/`fraiseql-wire` behind one name.

/// Task Broker and worker pool.
pub use lomas_broker as broker;
/// Data Connector Cache.
pub use lomas_cache as cache;
/// Admission & Budget Engine and Timing Shaper.
pub use lomas_core as core;
/// DP Backend Registry and the four `Querier` adapters.
pub use lomas_dbr as dbr;
/// Dummy Generator.
pub use lomas_dummy as dummy;
/// Unified error types.
pub use lomas_error as error;
/// Secrets object.
pub use lomas_secrets as secrets;
/// Metadata & Credentials Store and Administration Store.
pub use lomas_store as store;

pub use lomas_core::{AdmissionConfig, AdmissionEngine, BudgetView, QueryResult};
pub use lomas_error::RuntimeError;
