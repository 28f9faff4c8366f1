//! OS integration: analysis process groups and interrupt handling.

pub mod process;
#[cfg(feature = "cli")]
pub mod signals;
