use poker_core::RoomEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single inbound frame as received on the wire, before its payload is
/// parsed against the shape its `type` implies.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub request_id: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub display_name: String,
    /// Requests the non-voting observer role. Only honored when the room's
    /// `allowObservers` config is set; otherwise the caller still joins as
    /// a voter.
    #[serde(default)]
    pub as_observer: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCastPayload {
    pub card_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartPayload {
    pub story_title: Option<String>,
}

/// An outbound frame. Fan-out events (room events relayed from the hub)
/// carry no `requestId`; directly-correlated responses (errors, acks) echo
/// the triggering frame's id.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    pub frame_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
    pub payload: Value,
}

impl OutboundFrame<'static> {
    pub fn from_room_event(event: &RoomEvent) -> serde_json::Result<String> {
        let frame = OutboundFrame {
            frame_type: event.wire_type(),
            request_id: None,
            payload: serde_json::to_value(event)?,
        };

        serde_json::to_string(&frame)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: u32,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn error_frame(request_id: &str, code: u32, error: &'static str, message: Option<String>) -> String {
    let frame = OutboundFrame {
        frame_type: "error.v1",
        request_id: Some(request_id),
        payload: serde_json::to_value(ErrorPayload { code, error, message })
            .expect("error payload always serializes"),
    };

    serde_json::to_string(&frame).expect("error frame always serializes")
}

pub fn heartbeat_ping_frame() -> String {
    let frame = OutboundFrame {
        frame_type: "heartbeat.ping.v1",
        request_id: None,
        payload: Value::Object(Default::default()),
    };

    serde_json::to_string(&frame).expect("heartbeat frame always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_parses_envelope() {
        let raw = r#"{"type":"vote.cast.v1","requestId":"r1","payload":{"cardValue":"5"}}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();

        assert_eq!(frame.frame_type, "vote.cast.v1");
        assert_eq!(frame.request_id, "r1");
    }

    #[test]
    fn error_frame_omits_message_when_absent() {
        let json = error_frame("r1", 4003, "FORBIDDEN", None);
        assert!(!json.contains("message"));
        assert!(json.contains("\"code\":4003"));
    }
}
