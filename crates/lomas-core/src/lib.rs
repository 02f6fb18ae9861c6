//! Admission & Budget Engine (ABE) and Timing Shaper (TS): the two
//! components that sit directly behind the HTTP surface and own the
//! eight-step admission protocol.

mod engine;
mod job;
mod timing;

pub use engine::{AdmissionConfig, AdmissionEngine, BudgetView, QueryResult};
pub use job::{JobOutcome, QueryJob};
pub use timing::{TimeAttackMode, TimingShaper};
