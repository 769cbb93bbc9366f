/*
 * transport.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Apribuste, a POP3 mail retrieval library.
 *
 * Apribuste is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Apribuste is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Apribuste.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Line-framed transport over a plain or TLS byte stream.
//!
//! Line mode hands out text lines; data mode hands out the raw bytes of a
//! dot-terminated block (unstuffed, line terminators preserved) for message
//! bodies. Only the engine touches a `Transport`.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::error::Pop3Error;
use super::response::unstuff;

/// Any bidirectional byte stream the client can run over.
pub trait Pop3Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Pop3Io for T {}

pub type BoxedStream = Box<dyn Pop3Io>;

/// How multi-line blocks are framed when read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Line,
    Data,
}

pub struct Transport {
    stream: BufReader<BoxedStream>,
    mode: TransportMode,
    buf: Vec<u8>,
    secure: bool,
}

impl Transport {
    pub fn new(stream: BoxedStream, secure: bool) -> Self {
        Self {
            stream: BufReader::with_capacity(4096, stream),
            mode: TransportMode::Line,
            buf: Vec::with_capacity(1024),
            secure,
        }
    }

    pub fn set_mode(&mut self, mode: TransportMode) {
        self.mode = mode;
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Read one raw line into `self.buf`, terminator included.
    async fn fill_line(&mut self) -> io::Result<()> {
        self.buf.clear();
        let n = self.stream.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        if self.buf.last() != Some(&b'\n') {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-line"));
        }
        Ok(())
    }

    fn content_len(&self) -> usize {
        let mut end = self.buf.len();
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }
        }
        end
    }

    /// Read one line (CRLF or bare LF), terminator stripped.
    pub async fn read_line(&mut self) -> io::Result<String> {
        self.fill_line().await?;
        let end = self.content_len();
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        tracing::trace!(line = %line, "S:");
        Ok(line)
    }

    /// Read a dot-terminated block in line mode: unstuffed lines, terminator consumed.
    pub async fn read_lines(&mut self) -> io::Result<Vec<String>> {
        debug_assert_eq!(self.mode, TransportMode::Line);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            match unstuff(&line) {
                Some(data) => lines.push(data.to_string()),
                None => return Ok(lines),
            }
        }
    }

    /// Read a dot-terminated block in data mode: unstuffed bytes with the
    /// peer's line terminators preserved, terminator line consumed.
    pub async fn read_data(&mut self) -> io::Result<Vec<u8>> {
        debug_assert_eq!(self.mode, TransportMode::Data);
        let mut out = Vec::new();
        loop {
            self.fill_line().await?;
            let end = self.content_len();
            let content = &self.buf[..end];
            if content == b"." {
                return Ok(out);
            }
            let start = usize::from(content.first() == Some(&b'.'));
            out.extend_from_slice(&self.buf[start..]);
        }
    }

    /// Write `line` followed by CRLF and flush.
    pub async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(line).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await
    }

    /// Give back the underlying stream (for a TLS handshake). Fails if the
    /// peer already sent bytes past the last reply: those arrived in
    /// plaintext and must not be read as if they were protected.
    pub fn into_stream(self) -> Result<BoxedStream, Pop3Error> {
        if !self.stream.buffer().is_empty() {
            return Err(Pop3Error::protocol("unexpected data received before TLS handshake"));
        }
        Ok(self.stream.into_inner())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(input: &'static [u8]) -> Transport {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            server.write_all(input).await.unwrap();
            // Keep the peer open until the test is done reading.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });
        Transport::new(Box::new(client), false)
    }

    #[tokio::test]
    async fn crlf_and_bare_lf() {
        let mut t = transport(b"+OK one\r\n+OK two\n");
        assert_eq!(t.read_line().await.unwrap(), "+OK one");
        assert_eq!(t.read_line().await.unwrap(), "+OK two");
    }

    #[tokio::test]
    async fn block_lines_are_unstuffed() {
        let mut t = transport(b"hello\r\n..world\r\n.\r\n+OK after\r\n");
        assert_eq!(t.read_lines().await.unwrap(), vec!["hello", ".world"]);
        assert_eq!(t.read_line().await.unwrap(), "+OK after");
    }

    #[tokio::test]
    async fn data_block_keeps_terminators() {
        let mut t = transport(b"Subject: x\r\n\r\n..dot\nend\r\n.\r\n");
        t.set_mode(TransportMode::Data);
        let data = t.read_data().await.unwrap();
        assert_eq!(data, b"Subject: x\r\n\r\n.dot\nend\r\n".to_vec());
    }

    #[tokio::test]
    async fn eof_is_an_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut t = Transport::new(Box::new(client), false);
        let err = t.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn into_stream_refuses_buffered_bytes() {
        let mut t = transport(b"+OK begin TLS\r\ninjected\r\n");
        assert_eq!(t.read_line().await.unwrap(), "+OK begin TLS");
        assert!(matches!(t.into_stream(), Err(Pop3Error::Protocol(_))));
    }
}
