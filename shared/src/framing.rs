//! Length-delimited framing for protocol messages over a byte stream
//!
//! Each frame is a 4-byte big-endian length followed by a bincode payload.
//! Framing and encoding are kept apart so a payload that fails to decode
//! still leaves the stream positioned at the next frame boundary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted in either direction
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(payload).map_err(CodecError::Decode)
}

/// Writes one frame and flushes the writer
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes (max {})", len, MAX_FRAME_SIZE),
        ));
    }

    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame
///
/// Returns `UnexpectedEof` when the peer closes the stream and `InvalidData`
/// when the announced length exceeds `MAX_FRAME_SIZE`.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (max {})", len, MAX_FRAME_SIZE),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Encodes and writes a message as a single frame
pub async fn send_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    write_frame(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, Identity};
    use std::io::Cursor;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello, arena").await.unwrap();
        assert_eq!(&buf[..4], &12u32.to_be_bytes());

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).await.unwrap();
        assert_eq!(payload, b"hello, arena");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_oversized_write() {
        let big = vec![0u8; MAX_FRAME_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &big).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_oversized_read() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&(MAX_FRAME_SIZE + 1).to_be_bytes())
            .build();
        let err = read_frame(&mut mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_eof() {
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let payload = encode(&ClientMessage::ListSessions).unwrap();
        let bytes = framed(&payload);
        let (head, tail) = bytes.split_at(3);

        let mut mock = tokio_test::io::Builder::new().read(head).read(tail).build();
        let received = read_frame(&mut mock).await.unwrap();
        let message: ClientMessage = decode(&received).unwrap();
        assert_eq!(message, ClientMessage::ListSessions);
    }

    #[tokio::test]
    async fn test_undecodable_payload_keeps_stream_aligned() {
        let good = encode(&ClientMessage::JoinLobby {
            identity: Identity::new("p1", "alice"),
        })
        .unwrap();

        let mut bytes = framed(&[0xff, 0xff, 0xff, 0xff]);
        bytes.extend(framed(&good));

        let mut cursor = Cursor::new(bytes);
        let first = read_frame(&mut cursor).await.unwrap();
        assert!(decode::<ClientMessage>(&first).is_err());

        let second = read_frame(&mut cursor).await.unwrap();
        match decode::<ClientMessage>(&second).unwrap() {
            ClientMessage::JoinLobby { identity } => assert_eq!(identity.name, "alice"),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_message_writes_one_frame() {
        let mut mock = tokio_test::io::Builder::new()
            .write(&framed(&encode(&ClientMessage::Resign).unwrap()))
            .build();
        send_message(&mut mock, &ClientMessage::Resign).await.unwrap();
    }
}
