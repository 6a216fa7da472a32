use std::io;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest line accepted by [`read_frame`], line ending excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Event type announcing a chat line.
pub const SEND_MESSAGE: &str = "send-message";
/// Event type announcing a username for the connection.
pub const ADD_USER: &str = "add-user";
/// Legacy alias of [`SEND_MESSAGE`].
pub const CHAT: &str = "CHAT";
/// Legacy alias of [`ADD_USER`].
pub const JOIN: &str = "JOIN";
/// Emitted by the relay when an identified connection goes away.
pub const LEAVE: &str = "LEAVE";

/// The JSON event exchanged with clients.
///
/// The relay only decodes inbound frames to route and validate them; the
/// original text is what gets published, so unknown fields survive the trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: String,
}

impl ChatMessage {
    pub fn send_message(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: SEND_MESSAGE.to_string(),
            content: content.into(),
            sender: sender.into(),
        }
    }

    pub fn add_user(sender: impl Into<String>) -> Self {
        Self {
            kind: ADD_USER.to_string(),
            content: String::new(),
            sender: sender.into(),
        }
    }

    pub fn leave(sender: impl Into<String>) -> Self {
        Self {
            kind: LEAVE.to_string(),
            content: String::new(),
            sender: sender.into(),
        }
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The line was consumed; the next read starts at the following line.
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    /// The reader is left mid-line, so the stream cannot be resynchronized.
    #[error("frame exceeds {} bytes", MAX_FRAME_LEN)]
    TooLong,
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Reads the next non-empty line, without its line ending.
///
/// Partial lines stay in `buffer` when the future is dropped, so this can sit
/// in a `select!` next to other branches without losing bytes. The buffer
/// never grows past [`MAX_FRAME_LEN`] plus the newline.
pub async fn read_frame<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let budget = (MAX_FRAME_LEN + 1).saturating_sub(buffer.len()) as u64;
        let bytes = (&mut *reader)
            .take(budget)
            .read_until(b'\n', buffer)
            .await?;
        if buffer.len() > MAX_FRAME_LEN && buffer.last() != Some(&b'\n') {
            buffer.clear();
            return Err(FrameError::TooLong);
        }
        if bytes == 0 && buffer.is_empty() {
            return Ok(None);
        }

        let line = std::mem::take(buffer);
        let line = String::from_utf8(line).map_err(|_| FrameError::NotUtf8)?;
        let line = line.trim_end_matches(LINE_ENDINGS);

        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
        if bytes == 0 {
            return Ok(None);
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R, T>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader, buffer).await.map_err(io::Error::from)? {
        Some(line) => serde_json::from_str(&line).map(Some).map_err(to_io_error),
        None => Ok(None),
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = serde_json::to_string(message).map_err(to_io_error)?;
    write_frame(writer, &encoded).await
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
