//! Connection management.
//!
//! A [`Connection`] owns one byte stream to one instrument server and
//! provides the two primitives every exchange is built from: write a whole
//! buffer and read exactly N bytes. Both are bounded by the connection's
//! current operation timeout.

use crate::address::Endpoint;
use crate::error::ClientError;
use sara_protocol::DEFAULT_TIMEOUT_SECS;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// A byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout of each send or receive.
    pub timeout: Duration,
    /// Whether envelopes carry a payload CRC.
    pub crc: bool,
    /// Treat a payload CRC mismatch as an error instead of a warning.
    pub strict_crc: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            crc: true,
            strict_crc: false,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_crc(mut self, crc: bool) -> Self {
        self.crc = crc;
        self
    }

    pub fn with_strict_crc(mut self, strict: bool) -> Self {
        self.strict_crc = strict;
        self
    }
}

/// A connection to one instrument server.
pub struct Connection<S = TcpStream> {
    stream: S,
    config: ConnectionConfig,
    /// Current operation timeout; starts at `config.timeout`.
    timeout: Duration,
    peer: String,
}

impl Connection<TcpStream> {
    /// Connects to an instrument server.
    pub async fn connect(
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        tracing::info!("Opening socket to {}", endpoint);

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| {
            tracing::error!("Opening socket to {} timed out", endpoint);
            ClientError::ConnectTimeout(endpoint.to_string())
        })?
        .map_err(|e| {
            tracing::error!("Opening socket to {} failed: {}", endpoint, e);
            ClientError::Connect {
                endpoint: endpoint.to_string(),
                source: e,
            }
        })?;

        // Requests are small and strictly alternate with replies
        stream.set_nodelay(true).ok();

        tracing::info!("Opened socket to {}", endpoint);
        Ok(Self::from_stream(stream, endpoint.to_string(), config))
    }
}

impl<S: Transport> Connection<S> {
    /// Wraps an already established stream.
    pub fn from_stream(stream: S, peer: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            stream,
            timeout: config.timeout,
            config,
            peer: peer.into(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether this session runs in CRC mode.
    pub fn crc(&self) -> bool {
        self.config.crc
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replaces the operation timeout and returns the previous one.
    pub fn set_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.timeout, timeout)
    }

    /// Writes the whole buffer, continuing after partial writes.
    pub async fn send_all(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let stream = &mut self.stream;
        tokio::time::timeout(self.timeout, async {
            let mut sent = 0;
            while sent < bytes.len() {
                let n = stream.write(&bytes[sent..]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("stream accepted {} of {} bytes", sent, bytes.len()),
                    ));
                }
                sent += n;
            }
            stream.flush().await
        })
        .await
        .map_err(|_| {
            tracing::debug!("Send to {} timed out", self.peer);
            ClientError::Timeout
        })??;
        Ok(())
    }

    /// Reads exactly `n` bytes. The peer closing early is an error; a
    /// short buffer is never returned.
    pub async fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>, ClientError> {
        let mut buf = vec![0u8; n];
        let stream = &mut self.stream;
        tokio::time::timeout(self.timeout, async {
            let mut received = 0;
            while received < n {
                let read = stream.read(&mut buf[received..]).await?;
                if read == 0 {
                    return Err(ClientError::ConnectionClosed {
                        expected: n,
                        received,
                    });
                }
                received += read;
            }
            Ok::<(), ClientError>(())
        })
        .await
        .map_err(|_| {
            tracing::debug!("Receive from {} timed out", self.peer);
            ClientError::Timeout
        })??;
        Ok(buf)
    }

    /// Returns the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Closes the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        // The peer may already be gone
        let _ = self.stream.shutdown().await;
        tracing::info!("Closed socket to {}", self.peer);
        Ok(())
    }
}
