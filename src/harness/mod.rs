//! The `harness` module runs the load test itself.
//!
//! - `counters`: one atomic message counter per client index.
//! - `engine`: the `Harness`, which owns every session for the whole run.
//! - `shutdown`: the external triggers that end the steady state.
//! - `summary`: the summary file and the aggregate run report.

pub mod counters;
pub mod engine;
pub mod shutdown;
pub mod summary;

pub use counters::CounterTable;
pub use engine::{Harness, InitOutcome, MessageTally};
pub use shutdown::{ShutdownReason, ShutdownSignals};
pub use summary::{RunReport, SummaryLine, SummaryRecord};
