//! Distributed wire protocol: length-prefixed framing
//! around a JSON payload. `u32 payloadLength; u8 messageType; payload`.
//!
//! JSON rather than a hand-rolled tagged binary format, unlike the cache
//! tiers' `buildcore_cache::format` codec — the cache format needs to be
//! stable across the core's own versions with an HMAC signature; the wire
//! protocol instead needs easy 16-bit capability negotiation and is
//! exchanged between processes that are always running the same build, so
//! `serde_json` (already load-bearing elsewhere in the corpus) is the
//! pragmatic choice here.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload exceeds maximum frame size ({0} bytes)")]
    TooLarge(u32),
}

/// Maximum accepted frame payload, guarding against a corrupt length prefix
/// causing an unbounded allocation.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub worker_id: String,
    pub address: String,
    pub capabilities: Vec<String>,
    /// 16-bit protocol capability negotiation.
    pub protocol_version: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartBeat {
    pub worker_id: String,
    pub inflight: u32,
    pub queue_size: u32,
    pub health_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkRequest {
    pub worker_id: String,
    pub desired_batch_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub action_id: String,
    pub sources: Vec<String>,
    pub toolchain: String,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ActionStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action_id: String,
    pub status: ActionStatus,
    pub duration_ms: u64,
    pub output_blob_hashes: Vec<String>,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StealRequest {
    pub worker_id: String,
    pub desired_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StealResponse {
    pub action_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    Registration(Registration),
    HeartBeat(HeartBeat),
    WorkRequest(WorkRequest),
    ActionRequest(ActionRequest),
    ActionResult(ActionResult),
    StealRequest(StealRequest),
    StealResponse(StealResponse),
    Shutdown,
}

impl Message {
    fn type_tag(&self) -> u8 {
        match self {
            Message::Registration(_) => 0,
            Message::HeartBeat(_) => 1,
            Message::WorkRequest(_) => 2,
            Message::ActionRequest(_) => 3,
            Message::ActionResult(_) => 4,
            Message::StealRequest(_) => 5,
            Message::StealResponse(_) => 6,
            Message::Shutdown => 7,
        }
    }
}

/// Writes one length-prefixed frame: `u32 payloadLength; u8 messageType;
/// payload`. The length prefix covers the JSON payload only, not
/// the type byte.
pub fn write_frame(writer: &mut impl Write, message: &Message) -> Result<(), WireError> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() as u64 > MAX_FRAME_BYTES as u64 {
        return Err(WireError::TooLarge(payload.len() as u32));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&[message.type_tag()])?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame(reader: &mut impl Read) -> Result<Message, WireError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(WireError::TooLarge(len));
    }

    let mut type_buf = [0u8; 1];
    reader.read_exact(&mut type_buf)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;

    let message: Message = serde_json::from_slice(&payload)?;
    debug_assert_eq!(message.type_tag(), type_buf[0], "frame type byte disagrees with payload variant");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_message_variant() {
        let messages = vec![
            Message::Registration(Registration {
                worker_id: "w1".into(),
                address: "10.0.0.1:9000".into(),
                capabilities: vec!["rust".into()],
                protocol_version: 1,
            }),
            Message::HeartBeat(HeartBeat {
                worker_id: "w1".into(),
                inflight: 2,
                queue_size: 5,
                health_score: 0.9,
            }),
            Message::Shutdown,
        ];

        for message in messages {
            let mut buf = Vec::new();
            write_frame(&mut buf, &message).unwrap();
            let mut cursor = std::io::Cursor::new(buf);
            let decoded = read_frame(&mut cursor).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_le_bytes());
        buf.push(0);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor), Err(WireError::TooLarge(_))));
    }
}
