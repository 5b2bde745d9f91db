//! Connection Handler
//!
//! Each client gets its own task running a read / dispatch / reply loop:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ read bytes   │──>│ RESP decode  │──>│ Dispatcher   │──>│ write reply  │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!        ▲                                                        │
//!        └────────────── more buffered requests? ─────────────────┘
//! ```
//!
//! TCP is a stream protocol, so a read may hold a partial request or
//! several pipelined ones. Bytes accumulate in a `BytesMut` until the
//! decoder can take a complete value off the front.
//!
//! The loop ends when the peer disconnects, after the reply to `QUIT`, on
//! a protocol error, or when another client runs `CLIENT KILL` against
//! this one.

use crate::dispatch::{Dispatcher, Session};
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters, reported by `INFO`.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Drives one client connection over any byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Peer address, for logging
    addr: String,

    /// Bytes received but not yet decoded
    buffer: BytesMut,

    parser: RespParser,
    dispatcher: Arc<Dispatcher>,
    session: Session,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Registers the client with the dispatcher and prepares its session.
    pub fn new(
        stream: S,
        addr: impl Into<String>,
        laddr: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let addr = addr.into();
        dispatcher.stats().connection_opened();
        let session = dispatcher.open_session(addr.clone(), laddr);

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            dispatcher,
            session,
        }
    }

    /// Runs the connection until it ends, then unregisters the client.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let client_id = self.session.client().id();
        info!(client = %self.addr, client_id, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Killed) => info!(client = %self.addr, "Client killed"),
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.dispatcher.close_session(&self.session);
        self.dispatcher.stats().connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(request) = self.try_parse_command().await? {
                let reply = self.dispatcher.execute(request, &mut self.session);
                self.dispatcher.stats().command_processed();
                self.send_response(&reply).await?;

                if self.session.is_closing() {
                    return Ok(());
                }
            }

            let client = Arc::clone(self.session.client());
            tokio::select! {
                read = self.read_more_data() => read?,
                () = client.killed() => return Err(ConnectionError::Killed),
            }
        }
    }

    /// Takes the next complete request off the buffer.
    ///
    /// A malformed request gets an error reply before the connection is
    /// dropped.
    async fn try_parse_command(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(value))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error");
                let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                self.send_response(&reply).await?;
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        self.dispatcher.stats().bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.dispatcher.stats().bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Stream ended in the middle of a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// Closed by `CLIENT KILL`
    #[error("Client killed")]
    Killed,
}

/// Serves an accepted TCP connection to completion.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, dispatcher: Arc<Dispatcher>) {
    let laddr = stream
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let handler = ConnectionHandler::new(stream, addr.to_string(), laddr, dispatcher);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::Killed => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::register_all;
    use crate::dispatch::Registry;
    use crate::spec::CommandTable;
    use crate::storage::StorageEngine;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn dispatcher() -> Arc<Dispatcher> {
        let mut registry = Registry::new(Arc::new(CommandTable::builtin().unwrap()));
        register_all(&mut registry).unwrap();
        Arc::new(Dispatcher::new(registry, Arc::new(StorageEngine::new())))
    }

    fn handler<S>(stream: S, dispatcher: &Arc<Dispatcher>) -> ConnectionHandler<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ConnectionHandler::new(stream, "10.0.0.1:5000", "127.0.0.1:6379", Arc::clone(dispatcher))
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();
        let result = handler(stream, &dispatcher()).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_pipelined_and_split_requests() {
        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n")
            .write(b"+OK\r\n")
            .read(b"$1\r\nk\r\n")
            .write(b"$1\r\nv\r\n")
            .build();
        let result = handler(stream, &dispatcher()).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_inline_command() {
        let stream = Builder::new()
            .read(b"ECHO hello\r\n")
            .write(b"$5\r\nhello\r\n")
            .build();
        let _ = handler(stream, &dispatcher()).run().await;
    }

    #[tokio::test]
    async fn test_quit_ends_loop() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nQUIT\r\n*1\r\n$4\r\nPING\r\n")
            .write(b"+OK\r\n")
            .build();
        let dispatcher = dispatcher();
        assert!(handler(stream, &dispatcher).run().await.is_ok());
        assert!(dispatcher.clients().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_error_is_reported() {
        let request = b"*1\r\n$x\r\n";
        let err = RespParser::new().parse(request).unwrap_err();
        let expected = format!("-ERR Protocol error: {}\r\n", err);
        let stream = Builder::new()
            .read(request)
            .write(expected.as_bytes())
            .build();
        let result = handler(stream, &dispatcher()).run().await;
        assert!(matches!(result, Err(ConnectionError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_partial_request_at_eof() {
        let stream = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let result = handler(stream, &dispatcher()).run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_client_kill_closes_connection() {
        let dispatcher = dispatcher();
        let (server_side, _client_side) = duplex(1024);
        let task = tokio::spawn(handler(server_side, &dispatcher).run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let clients = dispatcher.clients().list();
        assert_eq!(clients.len(), 1);
        clients[0].kill();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::Killed)));
        assert!(dispatcher.clients().is_empty());
    }

    #[tokio::test]
    async fn test_tcp_round_trip_and_stats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = dispatcher();
        let server = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, peer, Arc::clone(&server)));
            }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");

        let stats = dispatcher.stats();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
