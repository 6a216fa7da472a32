use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tracing::warn;

use crate::{
    connection::Transport,
    message::{read_frame, write_frame, FrameError},
    router::Payload,
};

/// Events carried in WebSocket text frames.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        while let Some(message) = self.socket.recv().await {
            match message.context("websocket receive failed")? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!("dropping binary frame that is not valid UTF-8"),
                },
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }

    async fn send(&mut self, payload: Payload) -> Result<()> {
        self.socket
            .send(Message::Text(payload.to_string()))
            .await
            .context("websocket send failed")
    }
}

/// Newline-delimited JSON events, one per line.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    buffer: Vec<u8>,
}

impl LineTransport<BufReader<OwnedReadHalf>, OwnedWriteHalf> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(BufReader::new(reader), writer)
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buffer: Vec::new(),
        }
    }
}

impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>> {
        loop {
            match read_frame(&mut self.reader, &mut self.buffer).await {
                Ok(frame) => return Ok(frame),
                Err(FrameError::NotUtf8) => warn!("dropping line that is not valid UTF-8"),
                Err(err) => return Err(err).context("failed to read line frame"),
            }
        }
    }

    async fn send(&mut self, payload: Payload) -> Result<()> {
        write_frame(&mut self.writer, &payload)
            .await
            .context("failed to write line frame")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    use super::*;
    use crate::message::MAX_FRAME_LEN;

    #[tokio::test]
    async fn line_transport_frames_both_directions() {
        let (relay_side, client_side) = tokio::io::duplex(1024);
        let (relay_read, relay_write) = tokio::io::split(relay_side);
        let (client_read, mut client_write) = tokio::io::split(client_side);
        let mut transport = LineTransport::new(BufReader::new(relay_read), relay_write);
        let mut client_read = BufReader::new(client_read);

        client_write
            .write_all(b"\n{\"type\":\"add-user\",\"sender\":\"alice\"}\r\n")
            .await
            .expect("client write");
        let frame = transport.receive().await.expect("receive");
        assert_eq!(
            frame.as_deref(),
            Some("{\"type\":\"add-user\",\"sender\":\"alice\"}")
        );

        transport
            .send(Arc::from("{\"type\":\"LEAVE\"}"))
            .await
            .expect("send");
        let mut line = String::new();
        client_read.read_line(&mut line).await.expect("client read");
        assert_eq!(line, "{\"type\":\"LEAVE\"}\n");

        client_write.shutdown().await.expect("client shutdown");
        assert_eq!(transport.receive().await.expect("receive"), None);
    }

    #[tokio::test]
    async fn non_utf8_lines_are_skipped() {
        let input: &[u8] = b"{\"type\":\"send-message\",\"content\":\"\xff\",\"sender\":\"a\"}\n\
            {\"type\":\"send-message\",\"content\":\"ok\",\"sender\":\"a\"}\n";
        let mut transport = LineTransport::new(BufReader::new(input), tokio::io::sink());

        let frame = transport.receive().await.expect("receive");
        assert_eq!(
            frame.as_deref(),
            Some("{\"type\":\"send-message\",\"content\":\"ok\",\"sender\":\"a\"}")
        );
        assert_eq!(transport.receive().await.expect("receive"), None);
    }

    #[tokio::test]
    async fn overlong_line_closes_the_transport() {
        let input = vec![b'x'; MAX_FRAME_LEN + 1];
        let reader = BufReader::new(input.as_slice());
        let mut transport = LineTransport::new(reader, tokio::io::sink());

        assert!(transport.receive().await.is_err());
    }
}
