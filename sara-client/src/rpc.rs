//! Request/reply engine.
//!
//! One call sends an envelope (and its payload, as a second write), reads
//! the reply envelope, checks that it echoes the request's opcode and
//! message id, then drains the declared payload and checks its CRC.
//! Nothing here retries. After a fatal error the engine refuses further
//! calls.

use crate::address::Endpoint;
use crate::connection::{Connection, ConnectionConfig, Transport};
use crate::error::ClientError;
use bytes::Bytes;
use sara_protocol::{
    decode_f64_array, decode_records, envelope_size, record::fixed_str, CrcCheck, Envelope,
    ProtocolError, Record, FIRST_MESSAGE_ID,
};
use std::time::Duration;
use tokio::net::TcpStream;

/// Opcode whose return code carries a version instead of a status.
const QUERY_VERSION: u32 = 1;

/// A request to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: u32,
    pub option: i32,
    pub payload: Bytes,
}

impl Request {
    pub fn new(opcode: u32) -> Self {
        Self {
            opcode,
            option: 0,
            payload: Bytes::new(),
        }
    }

    pub fn with_option(mut self, option: i32) -> Self {
        self.option = option;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Encodes `record` as the payload.
    pub fn with_record<R: Record>(self, record: &R) -> Result<Self, ClientError> {
        Ok(self.with_payload(record.encode()?))
    }
}

/// A validated reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub envelope: Envelope,
    pub payload: Bytes,
    pub crc: CrcCheck,
}

impl Reply {
    pub fn return_code(&self) -> i32 {
        self.envelope.return_code
    }

    pub fn option(&self) -> i32 {
        self.envelope.option
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Decodes the payload as one record.
    pub fn record<R: Record>(&self) -> Result<R, ClientError> {
        Ok(R::decode(&self.payload)?)
    }

    /// Decodes the payload as `count` consecutive records.
    pub fn records<R: Record>(&self, count: usize) -> Result<Vec<R>, ClientError> {
        Ok(decode_records(&self.payload, count)?)
    }

    pub fn f64_array(&self, count: usize) -> Result<Vec<f64>, ClientError> {
        Ok(decode_f64_array(&self.payload, count)?)
    }

    /// Payload as text, cut at the first NUL.
    pub fn text(&self) -> String {
        fixed_str(&self.payload)
    }
}

/// Synchronous request/reply engine over one connection.
pub struct RpcEngine<S = TcpStream> {
    conn: Connection<S>,
    device: &'static str,
    next_id: i32,
    broken: bool,
}

impl RpcEngine<TcpStream> {
    /// Connects to `endpoint` and wraps the connection.
    pub async fn connect(
        device: &'static str,
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        let conn = Connection::connect(endpoint, config).await?;
        Ok(Self::new(conn, device))
    }
}

impl<S: Transport> RpcEngine<S> {
    pub fn new(conn: Connection<S>, device: &'static str) -> Self {
        Self {
            conn,
            device,
            next_id: FIRST_MESSAGE_ID,
            broken: false,
        }
    }

    /// Instrument name used in logs and device errors.
    pub fn device(&self) -> &'static str {
        self.device
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }

    /// Whether calls may still be issued.
    pub fn is_usable(&self) -> bool {
        !self.broken
    }

    /// Returns the message id for the next call and advances the counter.
    pub fn next_message_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Performs one exchange.
    ///
    /// A non-zero return code is not an error here; the caller interprets
    /// it per opcode.
    pub async fn call(&mut self, request: Request) -> Result<Reply, ClientError> {
        if self.broken {
            return Err(ClientError::SessionUnusable);
        }

        let id = self.next_message_id();
        let result = self.exchange(&request, id).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::error!(
                    "{}: opcode {} failed, closing session to further calls: {}",
                    self.device,
                    request.opcode,
                    e
                );
                self.broken = true;
            }
        }
        result
    }

    /// Performs one exchange under `timeout`, restoring the previous
    /// timeout afterwards whether or not the call succeeded.
    pub async fn call_with_timeout(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Reply, ClientError> {
        let previous = self.conn.set_timeout(timeout);
        tracing::debug!(
            "{}: timeout {:?} -> {:?} for opcode {}",
            self.device,
            previous,
            timeout,
            request.opcode
        );
        let result = self.call(request).await;
        self.conn.set_timeout(previous);
        result
    }

    async fn exchange(&mut self, request: &Request, id: i32) -> Result<Reply, ClientError> {
        let crc = self.conn.crc();
        let sent = Envelope::request(request.opcode, id, request.option, crc)
            .with_payload(&request.payload);
        let header = sent.encode();

        tracing::debug!(
            "{} <- opcode {} id {} option {} len {} [{}]",
            self.device,
            sent.opcode,
            sent.message_id,
            sent.option,
            sent.payload_length,
            hex::encode(&header)
        );
        self.conn.send_all(&header).await?;
        if !request.payload.is_empty() {
            self.conn.send_all(&request.payload).await?;
        }

        let raw = self.conn.recv_exact(envelope_size(crc)).await?;
        let received = Envelope::decode(&raw, crc)?;
        tracing::debug!(
            "{} -> opcode {} id {} option {} rc {} len {} [{}]",
            self.device,
            received.opcode,
            received.message_id,
            received.option,
            received.return_code,
            received.payload_length,
            hex::encode(&raw)
        );

        if !sent.echoed_by(&received) {
            return Err(ClientError::ProtocolDesync {
                sent_opcode: sent.opcode,
                sent_id: sent.message_id,
                got_opcode: received.opcode,
                got_id: received.message_id,
            });
        }

        if received.return_code != 0 && received.opcode != QUERY_VERSION {
            tracing::warn!(
                "{}: opcode {} returned rc {} (option {})",
                self.device,
                received.opcode,
                received.return_code,
                received.option
            );
        }

        let payload = self.read_payload(received.payload_length as usize).await?;

        let check = received.check_payload(&payload);
        if let CrcCheck::Mismatch { expected, actual } = check {
            if self.conn.config().strict_crc {
                return Err(ProtocolError::CrcMismatch { expected, actual }.into());
            }
            tracing::warn!(
                "{}: CRC mismatch on opcode {} reply: envelope {:#010x}, payload {:#010x}",
                self.device,
                received.opcode,
                expected,
                actual
            );
        }

        Ok(Reply {
            envelope: received,
            payload: Bytes::from(payload),
            crc: check,
        })
    }

    async fn read_payload(&mut self, len: usize) -> Result<Vec<u8>, ClientError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        match self.conn.recv_exact(len).await {
            Ok(payload) => Ok(payload),
            Err(ClientError::ConnectionClosed { expected, received }) => Err(ClientError::DataLoss {
                what: "reply payload",
                expected,
                actual: received,
            }),
            Err(e) => Err(e),
        }
    }

    /// Closes the session.
    pub async fn close(self) -> Result<(), ClientError> {
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reply_bytes, request_bytes, ScriptedStream};
    use sara_protocol::camera::CameraInfo;
    use sara_protocol::crc32;

    fn engine(input: Vec<u8>) -> RpcEngine<ScriptedStream> {
        let conn = Connection::from_stream(
            ScriptedStream::new(input),
            "test",
            ConnectionConfig::default(),
        );
        RpcEngine::new(conn, "test")
    }

    fn strict_engine(input: Vec<u8>) -> RpcEngine<ScriptedStream> {
        RpcEngine::new(
            Connection::from_stream(
                ScriptedStream::new(input),
                "test",
                ConnectionConfig::default().with_strict_crc(true),
            ),
            "test",
        )
    }

    #[tokio::test]
    async fn test_call_with_mock_io() {
        let info = CameraInfo {
            model: "TestCam".to_string(),
            width: 1200,
            height: 1920,
            ..CameraInfo::default()
        };
        let payload = info.encode().unwrap();

        let mock = tokio_test::io::Builder::new()
            .write(&request_bytes(2, 101, 1, &[]))
            .read(&reply_bytes(2, 101, 1, 0, &payload))
            .build();
        let conn = Connection::from_stream(mock, "camera", ConnectionConfig::default());
        let mut rpc = RpcEngine::new(conn, "camera");

        let reply = rpc.call(Request::new(2).with_option(1)).await.unwrap();
        assert_eq!(reply.return_code(), 0);
        assert_eq!(reply.crc, CrcCheck::Verified);

        let decoded: CameraInfo = reply.record().unwrap();
        assert_eq!(decoded.model, "TestCam");
        assert_eq!((decoded.width, decoded.height), (1200, 1920));
    }

    #[tokio::test]
    async fn test_request_payload_sent_after_envelope() {
        let payload = b"exposure record";
        let mut rpc = engine(reply_bytes(4, 101, 1, 0, &[]));

        rpc.call(Request::new(4).with_option(1).with_payload(Bytes::from_static(payload)))
            .await
            .unwrap();

        let written = rpc.connection().get_ref().written().to_vec();
        assert_eq!(written, request_bytes(4, 101, 1, payload));
        assert_eq!(rpc.connection().get_ref().write_calls(), 2);

        // Envelope CRC covers the payload only
        let crc = u32::from_be_bytes([written[20], written[21], written[22], written[23]]);
        assert_eq!(crc, crc32(payload));
    }

    #[tokio::test]
    async fn test_message_ids_increment() {
        let mut input = reply_bytes(5, 101, 0, 0, &[]);
        input.extend(reply_bytes(5, 102, 0, 0, &[]));
        let mut rpc = engine(input);

        rpc.call(Request::new(5)).await.unwrap();
        rpc.call(Request::new(5)).await.unwrap();
        assert_eq!(rpc.next_message_id(), 103);
    }

    #[tokio::test]
    async fn test_echo_varies_option_and_rc() {
        // Only opcode and message id are checked
        let mut rpc = engine(reply_bytes(8, 101, 7, 3, &[]));
        let reply = rpc.call(Request::new(8).with_option(1)).await.unwrap();
        assert_eq!(reply.option(), 7);
        assert_eq!(reply.return_code(), 3);
        assert!(rpc.is_usable());
    }

    #[tokio::test]
    async fn test_opcode_mismatch_is_desync() {
        let mut rpc = engine(reply_bytes(3, 101, 0, 0, &[]));
        let result = rpc.call(Request::new(2)).await;
        assert!(matches!(
            result,
            Err(ClientError::ProtocolDesync {
                sent_opcode: 2,
                got_opcode: 3,
                ..
            })
        ));

        // The session refuses further calls
        assert!(!rpc.is_usable());
        assert!(matches!(rpc.call(Request::new(2)).await, Err(ClientError::SessionUnusable)));
    }

    #[tokio::test]
    async fn test_message_id_mismatch_is_desync() {
        let mut rpc = engine(reply_bytes(2, 100, 0, 0, &[]));
        let result = rpc.call(Request::new(2)).await;
        assert!(matches!(
            result,
            Err(ClientError::ProtocolDesync {
                sent_id: 101,
                got_id: 100,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_payload_assembled_from_single_byte_reads() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i * 7) as u8).collect();
        let stream = ScriptedStream::new(reply_bytes(10, 101, -1, 0, &payload)).read_chunk(1);
        let conn = Connection::from_stream(stream, "test", ConnectionConfig::default());
        let mut rpc = RpcEngine::new(conn, "test");

        let reply = rpc.call(Request::new(10).with_option(-1)).await.unwrap();
        assert_eq!(&reply.payload[..], &payload[..]);
        assert_eq!(reply.crc, CrcCheck::Verified);
    }

    #[tokio::test]
    async fn test_crc_mismatch_is_lenient_by_default() {
        let payload = b"spectrum bytes".to_vec();
        let mut input = reply_bytes(8, 101, 0, 0, &payload);
        // Flip one bit in the transmitted payload
        let last = input.len() - 1;
        input[last] ^= 0x01;

        let mut rpc = engine(input);
        let reply = rpc.call(Request::new(8)).await.unwrap();
        assert!(reply.crc.is_mismatch());
        assert_eq!(reply.payload.len(), payload.len());
        assert!(rpc.is_usable());
    }

    #[tokio::test]
    async fn test_crc_mismatch_strict() {
        let mut input = reply_bytes(8, 101, 0, 0, b"spectrum bytes");
        let last = input.len() - 1;
        input[last] ^= 0x80;

        let mut rpc = strict_engine(input);
        let result = rpc.call(Request::new(8)).await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::CrcMismatch { .. }))
        ));
        // The stream is still in step
        assert!(rpc.is_usable());
    }

    #[tokio::test]
    async fn test_short_payload_is_data_loss() {
        let mut input = reply_bytes(10, 101, 0, 0, &[9u8; 100]);
        input.truncate(input.len() - 40);

        let mut rpc = engine(input);
        let result = rpc.call(Request::new(10)).await;
        assert!(matches!(
            result,
            Err(ClientError::DataLoss {
                expected: 100,
                actual: 60,
                ..
            })
        ));
        assert!(!rpc.is_usable());
    }

    #[tokio::test]
    async fn test_short_envelope_is_connection_closed() {
        let mut input = reply_bytes(2, 101, 0, 0, &[]);
        input.truncate(10);

        let mut rpc = engine(input);
        let result = rpc.call(Request::new(2)).await;
        assert!(matches!(
            result,
            Err(ClientError::ConnectionClosed {
                expected: 24,
                received: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_declaration() {
        let mut envelope = Envelope::request(10, 101, 0, true);
        envelope.payload_length = sara_protocol::MAX_PAYLOAD_SIZE + 1;
        let mut rpc = engine(envelope.encode().to_vec());

        let result = rpc.call(Request::new(10)).await;
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));
        assert!(!rpc.is_usable());
    }

    #[tokio::test]
    async fn test_plain_mode_envelope() {
        let reply = Envelope::request(1, 101, 0, false)
            .with_return_code(7)
            .encode()
            .to_vec();

        let stream = ScriptedStream::new(reply);
        let config = ConnectionConfig::default().with_crc(false);
        let mut rpc = RpcEngine::new(Connection::from_stream(stream, "test", config), "test");

        let reply = rpc.call(Request::new(1)).await.unwrap();
        assert_eq!(reply.return_code(), 7);
        assert_eq!(reply.crc, CrcCheck::Skipped);
        assert_eq!(rpc.connection().get_ref().written().len(), 20);
    }

    #[tokio::test]
    async fn test_call_with_timeout_restores_previous() {
        let mut rpc = engine(reply_bytes(18, 101, 1, 0, &[]));
        rpc.call_with_timeout(Request::new(18).with_option(1), Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(rpc.connection().timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_call_with_timeout_restores_after_failure() {
        let mut rpc = engine(Vec::new());
        let result = rpc
            .call_with_timeout(Request::new(18), Duration::from_secs(600))
            .await;
        assert!(result.is_err());
        assert_eq!(rpc.connection().timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_reply_text() {
        let mut rpc = engine(reply_bytes(2, 101, 0, 0, b"WAFER-17\0\0\0"));
        let reply = rpc.call(Request::new(2)).await.unwrap();
        assert_eq!(reply.text(), "WAFER-17");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn run<F: std::future::Future>(future: F) -> F::Output {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(future)
        }

        proptest! {
            #[test]
            fn prop_echo_never_desyncs(
                opcode in 0u32..32,
                option in any::<i32>(),
                rc in any::<i32>(),
                payload in proptest::collection::vec(any::<u8>(), 0..256),
            ) {
                let mut rpc = engine(reply_bytes(opcode, 101, option, rc, &payload));
                let reply = run(rpc.call(Request::new(opcode))).unwrap();
                prop_assert_eq!(reply.return_code(), rc);
                prop_assert_eq!(&reply.payload[..], &payload[..]);
            }

            #[test]
            fn prop_mutated_echo_always_desyncs(
                opcode in 0u32..32,
                opcode_delta in 0u32..4,
                id_delta in 0i32..4,
            ) {
                prop_assume!(opcode_delta != 0 || id_delta != 0);
                let input = reply_bytes(opcode + opcode_delta, 101 + id_delta, 0, 0, &[]);
                let mut rpc = engine(input);
                let result = run(rpc.call(Request::new(opcode)));
                let is_desync = matches!(result, Err(ClientError::ProtocolDesync { .. }));
                prop_assert!(is_desync);
            }

            #[test]
            fn prop_chunked_reads_assemble_payload(
                payload in proptest::collection::vec(any::<u8>(), 1..1024),
                chunk in 1usize..64,
            ) {
                let stream =
                    ScriptedStream::new(reply_bytes(10, 101, 0, 0, &payload)).read_chunk(chunk);
                let mut rpc = RpcEngine::new(
                    Connection::from_stream(stream, "test", ConnectionConfig::default()),
                    "test",
                );
                let reply = run(rpc.call(Request::new(10))).unwrap();
                prop_assert_eq!(&reply.payload[..], &payload[..]);
                prop_assert_eq!(rpc.connection().get_ref().remaining(), 0);
            }
        }
    }
}
