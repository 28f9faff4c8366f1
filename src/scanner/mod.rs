//! Scan pipeline: discovery, incremental filtering, mode strategy, analysis
//! invocation, worker pool and aggregation.

pub mod aggregate;
pub mod cancel;
pub mod discovery;
pub mod engine;
pub mod incremental;
pub mod invoker;
pub mod mode;
pub mod model;
pub mod pool;
