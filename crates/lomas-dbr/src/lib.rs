//! DP Backend Registry (DBR): static mapping from library tag to a
//! `Querier` adapter. Four adapters are built in: `SQL`, `PIPELINE`,
//! `SYNTH`, `CLASSICAL`.

mod classical;
mod pipeline;
mod querier;
mod sql;
mod synth;

pub use classical::ClassicalQuerier;
pub use pipeline::PipelineQuerier;
pub use querier::{BackendRegistry, LibraryTag, QueryOutcome, Querier};
pub use sql::SqlQuerier;
pub use synth::SynthQuerier;
