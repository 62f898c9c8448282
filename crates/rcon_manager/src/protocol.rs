//! RCON wire protocol: length-prefixed binary frames.
//!
//! Each frame is a 4-byte little-endian body length (excluding the length
//! field itself), a 4-byte request id, a 4-byte type tag, the ASCII body,
//! and two trailing NUL bytes. Compatibility with the vendor game server is
//! bit-exact.

use crate::error::RconError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request id reserved by the server for unsolicited broadcast frames.
pub const BROADCAST_REQUEST_ID: i32 = 0x7FFF_FFFF;

/// Upper bound on a single frame body; anything larger is a protocol error.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// RCON frame types.
///
/// `ExecCommand` and `AuthResponse` share the wire value 2; requests encode
/// `ExecCommand`, responses decode as `AuthResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FrameType {
    /// Command response (or broadcast) from the server
    ResponseValue = 0,
    /// Authentication result from the server
    AuthResponse = 2,
    /// Login request carrying the password
    Auth = 3,
}

/// Frame type tag used on the encode side for command requests.
///
/// Shares the wire value 2 with [`FrameType::AuthResponse`].
pub const EXEC_COMMAND: i32 = 2;

/// A single RCON frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconFrame {
    /// Request id correlating responses to requests
    pub id: i32,
    /// Raw wire type tag
    pub frame_type: i32,
    /// ASCII body without the trailing NULs
    pub body: String,
}

impl RconFrame {
    /// An authentication request carrying the password as body.
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            frame_type: FrameType::Auth as i32,
            body: password.to_string(),
        }
    }

    /// A command execution request.
    pub fn exec(id: i32, command: &str) -> Self {
        Self {
            id,
            frame_type: EXEC_COMMAND,
            body: command.to_string(),
        }
    }

    /// The empty `ResponseValue` sentinel that terminates a fragmented
    /// response: servers echo it after the last fragment for the same id.
    pub fn sentinel(id: i32) -> Self {
        Self {
            id,
            frame_type: FrameType::ResponseValue as i32,
            body: String::new(),
        }
    }

    /// True when this is an unsolicited broadcast frame.
    pub fn is_broadcast(&self) -> bool {
        self.frame_type == FrameType::ResponseValue as i32 && self.id == BROADCAST_REQUEST_ID
    }

    /// Serializes the frame to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body_bytes = self.body.as_bytes();
        // id + type + body + two NUL terminators
        let length = 4 + 4 + body_bytes.len() + 2;

        let mut data = Vec::with_capacity(4 + length);
        data.extend_from_slice(&(length as i32).to_le_bytes());
        data.extend_from_slice(&self.id.to_le_bytes());
        data.extend_from_slice(&self.frame_type.to_le_bytes());
        data.extend_from_slice(body_bytes);
        data.push(0);
        data.push(0);
        data
    }

    /// Parses a frame from the bytes following the length prefix.
    ///
    /// `data` must contain exactly `length` bytes: id, type, body and the
    /// trailing NULs.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RconError> {
        if data.len() < 10 {
            return Err(RconError::Protocol(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        let id = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let frame_type = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let body_end = data.len() - 2;
        if data[body_end] != 0 || data[body_end + 1] != 0 {
            return Err(RconError::Protocol(
                "frame missing NUL terminators".to_string(),
            ));
        }
        let body = String::from_utf8_lossy(&data[8..body_end]).to_string();
        Ok(Self {
            id,
            frame_type,
            body,
        })
    }
}

/// Reads one frame from the stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<RconFrame, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = i32::from_le_bytes(length_buf);
    if length < 10 || length as usize > MAX_FRAME_SIZE {
        return Err(RconError::Protocol(format!("bad frame length: {length}")));
    }

    let mut frame_buf = vec![0u8; length as usize];
    reader.read_exact(&mut frame_buf).await?;
    RconFrame::from_bytes(&frame_buf)
}

/// Writes one frame to the stream.
pub async fn write_frame<W>(writer: &mut W, frame: &RconFrame) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_bytes() {
        let frame = RconFrame::exec(42, "ListPlayers");
        let bytes = frame.to_bytes();

        let length = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(length, bytes.len() - 4);

        let parsed = RconFrame::from_bytes(&bytes[4..]).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn length_excludes_the_length_field() {
        let frame = RconFrame::auth(1, "secret");
        let bytes = frame.to_bytes();
        // id(4) + type(4) + "secret"(6) + NUL NUL
        assert_eq!(
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            16
        );
    }

    #[test]
    fn empty_body_frame_is_ten_bytes_after_prefix() {
        let bytes = RconFrame::sentinel(7).to_bytes();
        assert_eq!(bytes.len(), 14);
        let parsed = RconFrame::from_bytes(&bytes[4..]).unwrap();
        assert_eq!(parsed.body, "");
        assert_eq!(parsed.id, 7);
    }

    #[test]
    fn broadcast_sentinel_id_is_detected() {
        let frame = RconFrame {
            id: BROADCAST_REQUEST_ID,
            frame_type: FrameType::ResponseValue as i32,
            body: "[ChatAll] hello".to_string(),
        };
        assert!(frame.is_broadcast());
        assert!(!RconFrame::sentinel(5).is_broadcast());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(RconFrame::from_bytes(&[0, 0, 0]).is_err());
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_length() {
        let mut bad = Vec::new();
        bad.extend_from_slice(&(MAX_FRAME_SIZE as i32 + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(bad);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(RconError::Protocol(_))
        ));
    }
}
