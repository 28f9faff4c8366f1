#![forbid(unsafe_code)]

//! vic — Video Integrity Checker CLI entry point.

use std::io::{self, IsTerminal};
use std::panic::{self, AssertUnwindSafe};

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli_app;

use cli_app::{Cli, CliError};

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| cli_app::run(&cli)))
        .unwrap_or_else(|payload| Err(CliError::Internal(panic_message(payload.as_ref()))));
    if let Err(e) = outcome {
        eprintln!("vic: {e}");
        std::process::exit(e.exit_code());
    }
}

/// `VIC_LOG` wins over `-v`/`-q`. Diagnostics always go to stderr so stdout
/// stays machine-readable.
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_env("VIC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(!cli.no_color() && io::stderr().is_terminal())
        .init();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("internal error: {detail}")
}
