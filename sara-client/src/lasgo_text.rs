//! LasGo stage client, text protocol.
//!
//! The text server predates the struct protocol and shares none of its
//! framing: commands go out NUL-terminated, replies come back behind a
//! `NNNNNN:` length header. There are no message ids, so a reply that
//! cannot be framed leaves the stream unusable.

use crate::address::{Endpoint, Role};
use crate::connection::{Connection, ConnectionConfig, Transport};
use crate::error::{ClientError, DeviceError};
use sara_protocol::text::{
    decode_reply, encode_command, format_move, parse_device, parse_header, parse_position,
    TextStatus, TEXT_HEADER_LEN,
};
use sara_protocol::ProtocolError;
use tokio::net::TcpStream;

const DEVICE: &str = "lasgo_txt";

/// Acknowledgement sent for a command that succeeded.
const ACK: &str = "0";

/// Origin selection for `SO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOrigin<'a> {
    Index(i32),
    Name(&'a str),
}

/// Client for the LasGo stage text protocol.
pub struct LasgoTextClient<S = TcpStream> {
    conn: Connection<S>,
    broken: bool,
}

impl LasgoTextClient<TcpStream> {
    pub async fn connect(alias: &str, config: ConnectionConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::for_role(Role::LasgoText, alias);
        Self::connect_to(&endpoint, config).await
    }

    pub async fn connect_to(
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        Ok(Self::new(Connection::connect(endpoint, config).await?))
    }
}

impl<S: Transport> LasgoTextClient<S> {
    pub fn new(conn: Connection<S>) -> Self {
        Self { conn, broken: false }
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }

    pub fn is_usable(&self) -> bool {
        !self.broken
    }

    pub async fn close(self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Sends one command and returns the reply text.
    ///
    /// Commands longer than the protocol allows are rejected before
    /// anything is written.
    pub async fn send(&mut self, command: &str) -> Result<String, ClientError> {
        if self.broken {
            return Err(ClientError::SessionUnusable);
        }

        let wire = encode_command(command)?;
        let result = self.exchange(command, &wire).await;
        if let Err(e) = &result {
            if e.is_fatal() || matches!(e, ClientError::Protocol(ProtocolError::InvalidText(_))) {
                tracing::error!(
                    "{}: '{}' failed, closing session to further commands: {}",
                    DEVICE,
                    command,
                    e
                );
                self.broken = true;
            }
        }
        result
    }

    async fn exchange(&mut self, command: &str, wire: &[u8]) -> Result<String, ClientError> {
        tracing::debug!("{} <- [{}] {}", DEVICE, hex::encode(wire), command);
        self.conn.send_all(wire).await?;
        tracing::info!("Sent {}", command);

        let header = self.conn.recv_exact(TEXT_HEADER_LEN).await?;
        let len = parse_header(&header)?;
        tracing::debug!("{} -> header [{}] len {}", DEVICE, hex::encode(&header), len);

        let payload = self.conn.recv_exact(len).await.map_err(|e| match e {
            ClientError::ConnectionClosed { expected, received } => ClientError::DataLoss {
                what: "text reply",
                expected,
                actual: received,
            },
            other => other,
        })?;
        let reply = decode_reply(&payload);
        tracing::debug!("{} -> [{}] {}", DEVICE, hex::encode(&payload), reply);
        tracing::info!("Received {}", reply);
        Ok(reply)
    }

    async fn acknowledged(
        &mut self,
        operation: &'static str,
        command: &str,
    ) -> Result<(), ClientError> {
        let reply = self.send(command).await?;
        if reply.trim() != ACK {
            tracing::warn!("Failed {}: {}", operation, reply);
            let code = reply.trim().parse::<i32>().unwrap_or(-1);
            return Err(DeviceError::new(DEVICE, operation, code, reply).into());
        }
        Ok(())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn version(&mut self) -> Result<i32, ClientError> {
        let reply = self.send("QV").await?;
        reply.trim().parse::<i32>().map_err(|_| {
            ProtocolError::InvalidText(format!("bad version reply '{}'", reply)).into()
        })
    }

    /// Moves to `(x, y)` in user coordinates, in mm.
    pub async fn move_to(&mut self, x: f64, y: f64) -> Result<(), ClientError> {
        self.acknowledged("move", &format_move("MV", x, y)).await
    }

    /// Queues a move to `(x, y)` in user coordinates and returns at once.
    pub async fn queue_to(&mut self, x: f64, y: f64) -> Result<(), ClientError> {
        self.acknowledged("queued move", &format_move("BM", x, y)).await
    }

    /// Current position in user coordinates.
    pub async fn position(&mut self) -> Result<(f64, f64), ClientError> {
        let reply = self.send("GP").await?;
        Ok(parse_position(&reply)?)
    }

    /// Active origin index and name.
    pub async fn device(&mut self) -> Result<(i32, String), ClientError> {
        let reply = self.send("QO").await?;
        Ok(parse_device(&reply)?)
    }

    pub async fn set_device(&mut self, origin: TextOrigin<'_>) -> Result<(), ClientError> {
        let command = match origin {
            TextOrigin::Index(index) => format!("SO {}", index),
            TextOrigin::Name(name) => format!("SO {}", name),
        };
        self.acknowledged("set device", &command).await
    }

    /// Blocks until queued moves have finished.
    pub async fn wait(&mut self) -> Result<(), ClientError> {
        self.acknowledged("wait", "WA").await
    }

    pub async fn abort(&mut self) -> Result<(), ClientError> {
        self.acknowledged("abort", "AB").await
    }

    pub async fn panic(&mut self) -> Result<(), ClientError> {
        self.acknowledged("panic", "PA").await
    }

    pub async fn status(&mut self) -> Result<TextStatus, ClientError> {
        let reply = self.send("ST").await?;
        Ok(TextStatus::parse(&reply)?)
    }
}
