//! Crate-level error taxonomy.
//!
//! Every variant except `Protocol(MalformedRequest)` on the server side is
//! fatal to the owning process; the binaries print the `Display` form as a
//! one-line diagnostic and exit non-zero.

use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot resolve server address '{addr}': {reason}")]
    AddressResolution { addr: String, reason: String },

    #[error("connection failure on {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out while {0}")]
    Timeout(&'static str),
}

impl Error {
    pub(crate) fn connection(addr: impl ToString, source: io::Error) -> Self {
        Error::Connection {
            addr: addr.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Await `fut`, failing with `Error::Timeout` if `limit` elapses first.
pub(crate) async fn with_timeout<T, E, F>(
    limit: Option<Duration>,
    what: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    let outcome = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(what))?,
        None => fut.await,
    };
    outcome.map_err(Into::into)
}
