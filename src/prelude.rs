//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use video_integrity_checker::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, VicError};

// History
#[cfg(feature = "sqlite")]
pub use crate::history::sqlite::SqliteHistoryStore;
pub use crate::history::{HistoryStats, HistoryStore, MemoryHistoryStore, ScanHistoryRecord};

// Scanner
pub use crate::scanner::aggregate::ScanReport;
pub use crate::scanner::cancel::CancelToken;
pub use crate::scanner::discovery::{DiscoveryOptions, FileDiscovery};
pub use crate::scanner::engine::{ScanEngine, ScanSettings};
pub use crate::scanner::incremental::{IncrementalFilter, IncrementalPolicy, ScanDecision};
pub use crate::scanner::invoker::{Analyzer, ErrorMarkers, PassParameters, ProcessAnalyzer};
pub use crate::scanner::mode::{ModeSelector, ScanMode, ToolProfile};
pub use crate::scanner::model::{
    OutcomeCounts, OutcomeKind, ScanOutcome, ScanResult, ScanSummary, ScanTask, VideoFile,
};
pub use crate::scanner::pool::{PoolEvent, WorkerPool};
