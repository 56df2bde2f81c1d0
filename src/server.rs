//! TCP server for paginated word requests.
//!
//! Binds one listener, accepts a client, and serves its page requests until
//! `STOP` or disconnect. By default the listener is then torn down and the
//! process finishes; with `keep_alive` the server goes back to accepting.

use crate::config::ServerConfig;
use crate::error::{with_timeout, Error, Result};
use crate::protocol::{self, Frame, PageRequest, ParseResult, ProtocolError, MAX_REQUEST_LEN};
use crate::store::WordStore;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

/// Pending-connection backlog for the listening socket
const LISTEN_BACKLOG: i32 = 5;

/// Server instance
pub struct Server {
    listener: TcpListener,
    store: WordStore,
    keep_alive: bool,
    io_timeout: Option<Duration>,
}

impl Server {
    /// Resolve the configured address and bind the listener.
    pub async fn bind(config: &ServerConfig, store: WordStore) -> Result<Self> {
        let target = format!("{}:{}", config.server_ip, config.server_port);
        let addr = tokio::net::lookup_host((config.server_ip.as_str(), config.server_port))
            .await
            .map_err(|e| Error::AddressResolution {
                addr: target.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| Error::AddressResolution {
                addr: target.clone(),
                reason: "no addresses found".to_string(),
            })?;

        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(|e| Error::connection(addr, e))?;
        info!(address = %addr, words = store.len(), "Server listening");

        Ok(Server {
            listener,
            store,
            keep_alive: config.keep_alive,
            io_timeout: config.io_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve clients one at a time.
    ///
    /// Without `keep_alive` this returns after the first session, and a
    /// failed session is returned as the error.
    pub async fn run(self) -> Result<()> {
        let local = self.local_addr()?;

        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::connection(local, e))?;
            info!(peer = %peer, "Accepted connection");

            let session = ServerSession::new(stream, &self.store, self.io_timeout);
            match session.run().await {
                Ok(summary) => info!(
                    peer = %peer,
                    served = summary.requests_served,
                    refused = summary.requests_refused,
                    stopped = summary.stopped,
                    "Session closed"
                ),
                Err(e) if self.keep_alive => warn!(peer = %peer, error = %e, "Session failed"),
                Err(e) => return Err(e),
            }

            if !self.keep_alive {
                break;
            }
        }

        info!(address = %local, "Listener closed");
        Ok(())
    }
}

/// Create the listening socket with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Server session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    AwaitingRequest,
    Served(PageRequest),
    Closed,
}

/// What happened over one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub requests_served: usize,
    pub requests_refused: usize,
    /// Closed by `STOP` rather than disconnect.
    pub stopped: bool,
}

/// One client connection served against a borrowed word store.
pub struct ServerSession<'a, S> {
    stream: S,
    store: &'a WordStore,
    buffer: BytesMut,
    /// Dropping the rest of an oversized line up to its newline.
    discarding: bool,
    io_timeout: Option<Duration>,
    summary: SessionSummary,
}

impl<'a, S> ServerSession<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, store: &'a WordStore, io_timeout: Option<Duration>) -> Self {
        ServerSession {
            stream,
            store,
            buffer: BytesMut::with_capacity(MAX_REQUEST_LEN),
            discarding: false,
            io_timeout,
            summary: SessionSummary::default(),
        }
    }

    /// Drive the session until it reaches `Closed`.
    ///
    /// Read and write failures end the session with an error. Malformed
    /// requests are refused with an `ERROR` line and the session continues.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let mut state = ServerState::AwaitingRequest;

        loop {
            state = match state {
                ServerState::AwaitingRequest => self.await_request().await?,
                ServerState::Served(request) => {
                    self.serve(request).await?;
                    ServerState::AwaitingRequest
                }
                ServerState::Closed => break,
            };
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Shutdown after close failed");
        }
        Ok(self.summary)
    }

    async fn await_request(&mut self) -> Result<ServerState> {
        loop {
            if self.discarding {
                match protocol::find_newline(&self.buffer) {
                    Some(pos) => {
                        self.buffer.advance(pos + 1);
                        self.discarding = false;
                    }
                    None => self.buffer.clear(),
                }
            }

            if !self.discarding {
                match protocol::parse_frame(&self.buffer) {
                    ParseResult::Complete(Frame::Stop, consumed) => {
                        self.buffer.advance(consumed);
                        self.summary.stopped = true;
                        debug!("Received STOP");
                        return Ok(ServerState::Closed);
                    }
                    ParseResult::Complete(Frame::Request(request), consumed) => {
                        self.buffer.advance(consumed);
                        return Ok(ServerState::Served(request));
                    }
                    ParseResult::Error(e, consumed) => {
                        self.buffer.advance(consumed);
                        self.discarding = matches!(e, ProtocolError::FrameTooLong { .. });
                        self.refuse(&e.to_string()).await?;
                        continue;
                    }
                    ParseResult::Incomplete => {}
                }
            }

            self.buffer.reserve(MAX_REQUEST_LEN);
            let mut window = (&mut self.buffer).limit(MAX_REQUEST_LEN);
            let read = self.stream.read_buf(&mut window);
            let n = with_timeout(self.io_timeout, "reading a request", read).await?;
            if n == 0 {
                return self.finish_on_eof().await;
            }
        }
    }

    /// Peer closed its side. An unterminated request left in the buffer is
    /// still answered.
    async fn finish_on_eof(&mut self) -> Result<ServerState> {
        if self.buffer.is_empty() {
            trace!("Connection closed by client");
            return Ok(ServerState::Closed);
        }

        let frame = self.buffer.split();
        match protocol::decode_request(&frame) {
            Ok(request) => Ok(ServerState::Served(request)),
            Err(e) => {
                self.refuse(&e.to_string()).await?;
                Ok(ServerState::Closed)
            }
        }
    }

    async fn serve(&mut self, request: PageRequest) -> Result<()> {
        let page = self.store.page(request);
        let response = page.encode();
        debug!(
            offset = request.offset,
            stride = request.stride,
            words = page.words.len(),
            end_of_stream = page.end_of_stream,
            "Serving page"
        );

        let write = self.stream.write_all(&response);
        with_timeout(self.io_timeout, "writing a response", write).await?;
        self.summary.requests_served += 1;
        Ok(())
    }

    async fn refuse(&mut self, reason: &str) -> Result<()> {
        warn!(reason, "Refusing request");
        let response = protocol::encode_error(reason);
        let write = self.stream.write_all(&response);
        with_timeout(self.io_timeout, "writing a response", write).await?;
        self.summary.requests_refused += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn fox() -> WordStore {
        WordStore::from_text("the,quick,brown,fox")
    }

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            server_ip: "127.0.0.1".to_string(),
            server_port: 0,
            filename: "unused".into(),
            keep_alive: false,
            io_timeout: None,
            log_level: "info".to_string(),
        }
    }

    fn refusal(line: &[u8]) -> Vec<u8> {
        let e = protocol::decode_request(line).unwrap_err();
        protocol::encode_error(&e.to_string()).to_vec()
    }

    #[tokio::test]
    async fn test_two_rounds_then_stop() {
        let store = fox();
        let stream = Builder::new()
            .read(b"0,2\n")
            .write(b"the,quick\n")
            .read(b"2,2\n")
            .write(b"brown,fox,EOF\n")
            .read(b"STOP")
            .build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(
            summary,
            SessionSummary {
                requests_served: 2,
                requests_refused: 0,
                stopped: true,
            }
        );
    }

    #[tokio::test]
    async fn test_offset_past_end() {
        let store = fox();
        let stream = Builder::new().read(b"10,2\n").write(b"EOF\n").build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(summary.requests_served, 1);
        assert!(!summary.stopped);
    }

    #[tokio::test]
    async fn test_malformed_request_refused() {
        let store = fox();
        let stream = Builder::new()
            .read(b"abc\n")
            .write(&refusal(b"abc"))
            .read(b"0,0\n")
            .write(&refusal(b"0,0"))
            .read(b"0,1\n")
            .write(b"the\n")
            .build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(summary.requests_refused, 2);
        assert_eq!(summary.requests_served, 1);
    }

    #[tokio::test]
    async fn test_coalesced_requests() {
        let store = fox();
        let stream = Builder::new()
            .read(b"0,1\n1,1\nSTOP")
            .write(b"the\n")
            .write(b"quick\n")
            .build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(summary.requests_served, 2);
        assert!(summary.stopped);
    }

    #[tokio::test]
    async fn test_split_request() {
        let store = fox();
        let stream = Builder::new()
            .read(b"1,")
            .read(b"3\n")
            .write(b"quick,brown,fox,EOF\n")
            .build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(summary.requests_served, 1);
    }

    #[tokio::test]
    async fn test_unterminated_request_before_close() {
        let server = Server::bind(&loopback_config(), fox()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"1,1").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"quick\n");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_refused() {
        let store = fox();
        let garbage = vec![b'9'; MAX_REQUEST_LEN + 1];
        let expected = protocol::encode_error(
            &ProtocolError::FrameTooLong {
                limit: MAX_REQUEST_LEN,
            }
            .to_string(),
        );
        let stream = Builder::new()
            .read(&garbage[..MAX_REQUEST_LEN])
            .read(&garbage[MAX_REQUEST_LEN..])
            .write(&expected)
            .build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(summary.requests_refused, 1);
        assert_eq!(summary.requests_served, 0);
    }

    #[tokio::test]
    async fn test_oversized_line_refused_once() {
        let store = fox();
        let garbage = vec![b'9'; MAX_REQUEST_LEN + 1];
        let expected = protocol::encode_error(
            &ProtocolError::FrameTooLong {
                limit: MAX_REQUEST_LEN,
            }
            .to_string(),
        );
        let stream = Builder::new()
            .read(&garbage[..MAX_REQUEST_LEN])
            .read(&garbage[MAX_REQUEST_LEN..])
            .write(&expected)
            .read(b"99\n0,1\n")
            .write(b"the\n")
            .build();

        let summary = ServerSession::new(stream, &store, None).run().await.unwrap();
        assert_eq!(summary.requests_refused, 1);
        assert_eq!(summary.requests_served, 1);
    }

    #[tokio::test]
    async fn test_read_error_is_fatal() {
        let store = fox();
        let stream = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        match ServerSession::new(stream, &store, None).run().await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_shot_server_exits_after_session() {
        let server = Server::bind(&loopback_config(), fox()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"0,4\n").await.unwrap();
        let mut response = vec![0u8; 64];
        let n = stream.read(&mut response).await.unwrap();
        assert_eq!(&response[..n], b"the,quick,brown,fox,EOF\n");
        stream.write_all(b"STOP").await.unwrap();

        handle.await.unwrap().unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
