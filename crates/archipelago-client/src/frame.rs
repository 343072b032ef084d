//! Frame encoding for the WebSocket text channel.
//!
//! Every frame on the wire is a JSON array of packet objects:
//!
//! ```text
//! [ {"cmd": "...", ...}, {"cmd": "...", ...}, ... ]
//! ```
//!
//! Packets inside one frame are processed by the server in array order, so
//! outbound batches are always written as a single frame. Inbound packets
//! with an unknown `cmd` (or fields that do not match their `cmd`) decode to
//! [`ServerPacket::Unrecognized`]; only a frame that is not a JSON array at
//! all is an error.

use serde_json::Value;

use crate::packets::{ClientPacket, PacketKind, RawPacket, ServerPacket};

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame is not valid JSON, or is JSON but not an array of packets.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl From<serde_json::Error> for FrameError {
    fn from(error: serde_json::Error) -> Self {
        FrameError::MalformedFrame(error.to_string())
    }
}

/// Serialize an ordered batch of packets into one text frame.
pub fn encode_frame(packets: &[ClientPacket]) -> Result<String, serde_json::Error> {
    serde_json::to_string(packets)
}

/// Decode a text frame into packets, preserving array order.
pub fn decode_frame(text: &str) -> Result<Vec<ServerPacket>, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(FrameError::MalformedFrame(format!(
            "expected a JSON array, got {}",
            json_type_name(&value)
        )));
    };
    Ok(items.iter().map(decode_packet).collect())
}

/// Decode a single packet object, falling back to
/// [`ServerPacket::Unrecognized`].
pub fn decode_packet(value: &Value) -> ServerPacket {
    let cmd = value.get("cmd").and_then(Value::as_str);
    let Some(kind) = cmd.and_then(PacketKind::from_cmd) else {
        tracing::debug!(cmd, "unrecognized packet");
        return unrecognized(value);
    };

    match ServerPacket::from_value(kind, value) {
        Ok(packet) => packet,
        Err(error) => {
            tracing::warn!(cmd, %error, "packet does not match its cmd, treating as unrecognized");
            unrecognized(value)
        }
    }
}

fn unrecognized(value: &Value) -> ServerPacket {
    ServerPacket::Unrecognized(RawPacket {
        cmd: value.get("cmd").and_then(Value::as_str).map(str::to_owned),
        body: value.clone(),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{LocationChecks, Say};

    #[test]
    fn test_batch_is_single_array_in_order() {
        let frame = encode_frame(&[
            ClientPacket::Say(Say {
                text: "first".into(),
            }),
            ClientPacket::LocationChecks(LocationChecks {
                locations: vec![1, 2],
            }),
            ClientPacket::Sync,
        ])
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        let cmds: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["cmd"].as_str().unwrap())
            .collect();
        assert_eq!(cmds, vec!["Say", "LocationChecks", "Sync"]);
    }

    #[test]
    fn test_decode_preserves_order() {
        let packets = decode_frame(concat!(
            r#"[{"cmd":"RoomUpdate","hint_points":3},"#,
            r#"{"cmd":"Bounced","data":{}},"#,
            r#"{"cmd":"InvalidPacket","type":"cmd","text":"bad"}]"#,
        ))
        .unwrap();
        let kinds: Vec<PacketKind> = packets.iter().map(ServerPacket::kind).collect();
        assert_eq!(
            kinds,
            vec![
                PacketKind::RoomUpdate,
                PacketKind::Bounced,
                PacketKind::InvalidPacket
            ]
        );
    }

    #[test]
    fn test_unknown_cmd_is_unrecognized() {
        let packets = decode_frame(r#"[{"cmd":"TotallyUnknownType","x":1}]"#).unwrap();
        assert_eq!(packets.len(), 1);
        let ServerPacket::Unrecognized(raw) = &packets[0] else {
            panic!("expected unrecognized packet");
        };
        assert_eq!(raw.cmd.as_deref(), Some("TotallyUnknownType"));
        assert_eq!(raw.body["x"], 1);
    }

    #[test]
    fn test_missing_cmd_is_unrecognized() {
        let packets = decode_frame(r#"[{"hello":"world"}, 5]"#).unwrap();
        assert!(packets.iter().all(|p| p.kind() == PacketKind::Unrecognized));
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn test_malformed_known_packet_is_unrecognized() {
        let packets = decode_frame(r#"[{"cmd":"ReceivedItems","index":"x"}]"#).unwrap();
        assert_eq!(packets[0].kind(), PacketKind::Unrecognized);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            decode_frame("{not json"),
            Err(FrameError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_non_array_rejected() {
        assert_eq!(
            decode_frame(r#"{"cmd":"RoomInfo"}"#).unwrap_err(),
            FrameError::MalformedFrame("expected a JSON array, got an object".into())
        );
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert!(decode_frame("[]").unwrap().is_empty());
    }
}
