//! wordpage: paginated word streaming over TCP
//!
//! A server holds an ordered word list and answers `<p>,<k>` requests with
//! the comma-separated window `words[p..p + k]`, appending the `EOF`
//! sentinel once the window reaches the end of the list. A client walks the
//! list page by page, advancing `p` by `k` each round, then reports word
//! frequencies and the accumulated round-trip time.
//!
//! Both sides are strictly synchronous: one connection, one request in
//! flight, one logical task per process.

pub mod client;
pub mod config;
pub mod error;
pub mod frequency;
pub mod protocol;
pub mod server;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
