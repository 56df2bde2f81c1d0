//! Client side of the pagination protocol.
//!
//! Issues one request at a time, advancing the offset by the stride after
//! every page, until the server reports end of stream (or after a single
//! round in run-once mode). Then sends `STOP` and closes.

use crate::config::ClientConfig;
use crate::error::{with_timeout, Error, Result};
use crate::frequency::FrequencyTable;
use crate::protocol::{self, ProtocolError, MAX_RESPONSE_LEN};
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Bytes requested per receive
const RECV_CHUNK: usize = 4096;

/// Client loop phases. The session starts connected, in `Requesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Requesting,
    Waiting,
    Advancing,
    Done,
}

/// Outcome of a completed client session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Request/response rounds completed
    pub rounds: usize,
    /// Sum of per-round request-to-response latency
    pub elapsed: Duration,
    /// Raw response text in arrival order
    pub accumulated_text: String,
    pub end_of_stream: bool,
}

impl SessionReport {
    pub fn frequencies(&self) -> FrequencyTable {
        FrequencyTable::from_text(&self.accumulated_text)
    }
}

/// Resolve the configured server and open a connection to it.
pub async fn connect(config: &ClientConfig) -> Result<TcpStream> {
    let target = format!("{}:{}", config.server_ip, config.server_port);
    let addrs: Vec<SocketAddr> =
        tokio::net::lookup_host((config.server_ip.as_str(), config.server_port))
            .await
            .map_err(|e| Error::AddressResolution {
                addr: target.clone(),
                reason: e.to_string(),
            })?
            .collect();

    if addrs.is_empty() {
        return Err(Error::AddressResolution {
            addr: target,
            reason: "no addresses found".to_string(),
        });
    }
    connect_any(addrs, config.io_timeout).await
}

/// Try each address in order, returning the first connection made or the
/// last failure.
pub async fn connect_any<I>(addrs: I, io_timeout: Option<Duration>) -> Result<TcpStream>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut last_err = None;

    for addr in addrs {
        let attempt = async {
            TcpStream::connect(addr)
                .await
                .map_err(|e| Error::connection(addr, e))
        };
        match with_timeout(io_timeout, "connecting", attempt).await {
            Ok(stream) => {
                info!(server = %addr, "Connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(server = %addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::AddressResolution {
        addr: String::new(),
        reason: "no addresses to connect to".to_string(),
    }))
}

/// Drives the request loop over one connection.
pub struct ClientSession<S> {
    stream: S,
    buffer: BytesMut,
    offset: usize,
    stride: usize,
    run_once: bool,
    io_timeout: Option<Duration>,
    report: SessionReport,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: &ClientConfig) -> Self {
        ClientSession {
            stream,
            buffer: BytesMut::with_capacity(RECV_CHUNK),
            offset: config.offset,
            stride: config.stride,
            run_once: config.run_once,
            io_timeout: config.io_timeout,
            report: SessionReport::default(),
        }
    }

    /// Run rounds until `Done`, then send `STOP` and close the stream.
    ///
    /// Any send or receive failure ends the session; there is no retry.
    pub async fn run(mut self) -> Result<SessionReport> {
        let mut phase = Phase::Requesting;
        let mut started = Instant::now();

        loop {
            phase = match phase {
                Phase::Requesting => {
                    let request = protocol::encode_request(self.offset, self.stride);
                    started = Instant::now();
                    let send = self.stream.write_all(&request);
                    with_timeout(self.io_timeout, "sending a request", send).await?;
                    Phase::Waiting
                }
                Phase::Waiting => {
                    let line = self.receive().await?;
                    let round_trip = started.elapsed();
                    self.report.elapsed += round_trip;
                    self.report.rounds += 1;
                    self.report
                        .accumulated_text
                        .push_str(&String::from_utf8_lossy(&line));

                    let page = protocol::decode_response(&line)?;
                    debug!(
                        offset = self.offset,
                        words = page.words.len(),
                        end_of_stream = page.end_of_stream,
                        round_trip_us = round_trip.as_micros() as u64,
                        "Received page"
                    );

                    if page.end_of_stream {
                        self.report.end_of_stream = true;
                        Phase::Done
                    } else if self.run_once {
                        Phase::Done
                    } else {
                        Phase::Advancing
                    }
                }
                Phase::Advancing => {
                    self.offset = self.offset.saturating_add(self.stride);
                    Phase::Requesting
                }
                Phase::Done => break,
            };
        }

        let stop = self.stream.write_all(protocol::encode_stop());
        with_timeout(self.io_timeout, "sending STOP", stop).await?;
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Shutdown after STOP failed");
        }

        info!(
            rounds = self.report.rounds,
            end_of_stream = self.report.end_of_stream,
            "Session finished"
        );
        Ok(self.report)
    }

    /// Read one newline-terminated response.
    async fn receive(&mut self) -> Result<BytesMut> {
        loop {
            if let Some(pos) = protocol::find_newline(&self.buffer) {
                return Ok(self.buffer.split_to(pos + 1));
            }
            if self.buffer.len() > MAX_RESPONSE_LEN {
                return Err(ProtocolError::FrameTooLong {
                    limit: MAX_RESPONSE_LEN,
                }
                .into());
            }

            self.buffer.reserve(RECV_CHUNK);
            let mut window = (&mut self.buffer).limit(RECV_CHUNK);
            let read = self.stream.read_buf(&mut window);
            let n = with_timeout(self.io_timeout, "waiting for a response", read).await?;
            if n == 0 {
                return Err(ProtocolError::UnexpectedEof.into());
            }
        }
    }
}
