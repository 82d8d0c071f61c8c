//! Test doubles for client tests.

use sara_protocol::Envelope;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A stream that replays fixed input in bounded chunks and records writes,
/// accepting at most `write_chunk` bytes per write.
pub(crate) struct ScriptedStream {
    input: Vec<u8>,
    pos: usize,
    read_chunk: usize,
    write_chunk: usize,
    written: Vec<u8>,
    write_calls: usize,
}

impl ScriptedStream {
    pub(crate) fn new(input: Vec<u8>) -> Self {
        Self {
            input,
            pos: 0,
            read_chunk: usize::MAX,
            write_chunk: usize::MAX,
            written: Vec::new(),
            write_calls: 0,
        }
    }

    pub(crate) fn read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = n;
        self
    }

    pub(crate) fn write_chunk(mut self, n: usize) -> Self {
        self.write_chunk = n;
        self
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.write_calls
    }

    pub(crate) fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let available = &this.input[this.pos..];
        let n = available.len().min(this.read_chunk).min(buf.remaining());
        buf.put_slice(&available[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let n = buf.len().min(this.write_chunk);
        this.written.extend_from_slice(&buf[..n]);
        this.write_calls += 1;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Bytes of a CRC-mode request as the engine sends it.
pub(crate) fn request_bytes(opcode: u32, id: i32, option: i32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Envelope::request(opcode, id, option, true)
        .with_payload(payload)
        .encode()
        .to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Bytes of a CRC-mode reply.
pub(crate) fn reply_bytes(opcode: u32, id: i32, option: i32, rc: i32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Envelope::request(opcode, id, option, true)
        .with_payload(payload)
        .with_return_code(rc)
        .encode()
        .to_vec();
    bytes.extend_from_slice(payload);
    bytes
}
