//! Activity logging: append-only JSONL record of every scan run.

pub mod jsonl;
