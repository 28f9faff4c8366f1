#![forbid(unsafe_code)]

//! Video Integrity Checker (vic) — finds corrupted video files by running an
//! external analysis tool (ffprobe/ffmpeg) over a directory tree.
//!
//! One scan run:
//! 1. **Discovery** — walk the root for files with a video extension
//! 2. **Incremental filter** — skip files that were healthy last time and have not changed
//! 3. **Worker pool** — analyse the rest concurrently, each in its own process group
//! 4. **Aggregation** — one report, one batched scan-history write
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use video_integrity_checker::prelude::*;
//!
//! # fn main() -> video_integrity_checker::core::errors::Result<()> {
//! let config = Config::load(None)?;
//! let engine = ScanEngine::new(config.scan_settings()?, Arc::new(config.analyzer()?))?;
//! let mut history = MemoryHistoryStore::new();
//! let report = engine.run("/srv/media".as_ref(), &mut history, &CancelToken::new())?;
//! println!("{} corrupt", report.summary.counts.corrupt);
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
pub mod history;
pub mod logger;
pub mod platform;
pub mod scanner;
