//! Revalidator.
//!
//! Command line access to the stale-while-revalidate result cache. The cache itself lives in the
//! `revalidator-cache` crate, this binary loads its configuration and exposes maintenance
//! operations on the configured store.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod config;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
