//! Carrier media stream shapes and the voice webhook response.
//!
//! The carrier speaks its own JSON envelope over the media WebSocket:
//! `connected`, `start`, `media`, `dtmf`, `mark`, `stop`. Audio payloads
//! are base64 μ-law, 8 kHz mono, 20 ms per frame. Outbound frames carry
//! only `streamSid` and `media.payload` — no `track` field, which is the
//! most compatible shape across carriers.

use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CarrierEvent {
    Connected {},
    Start {
        start: StartInfo,
    },
    Media {
        media: MediaInfo,
    },
    Dtmf {
        dtmf: DtmfInfo,
    },
    Mark {},
    Stop {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartInfo {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfInfo {
    #[serde(alias = "digit")]
    pub digits: String,
}

/// Parse one carrier text frame. Unknown events come back as `None`; the
/// carrier is free to add envelope types we do not care about.
pub fn parse_event(payload: &str) -> Option<CarrierEvent> {
    serde_json::from_str(payload).ok()
}

/// Outbound `media` frame toward the carrier.
pub fn outbound_media_frame(stream_sid: &str, payload_b64: &str) -> String {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload_b64 },
    })
    .to_string()
}

/// The one-directive TwiML answer to the voice webhook: connect the call's
/// media stream to our WebSocket.
pub fn twiml_connect_stream(media_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Connect><Stream url=\"{media_url}\"/></Connect></Response>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_optional_call_sid() {
        let event = parse_event(
            r#"{"event":"start","sequenceNumber":"1","start":{"streamSid":"MZ1","callSid":"CA9","tracks":["inbound"]},"streamSid":"MZ1"}"#,
        )
        .unwrap();
        match event {
            CarrierEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.call_sid.as_deref(), Some("CA9"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_media_and_dtmf() {
        let event = parse_event(
            r#"{"event":"media","media":{"track":"inbound","chunk":"3","payload":"AAAA"},"streamSid":"MZ1"}"#,
        )
        .unwrap();
        assert!(matches!(event, CarrierEvent::Media { media } if media.payload == "AAAA"));

        // Both `digits` and the singular `digit` spelling are accepted.
        let event = parse_event(r##"{"event":"dtmf","dtmf":{"digit":"#"}}"##).unwrap();
        assert!(matches!(event, CarrierEvent::Dtmf { dtmf } if dtmf.digits == "#"));
    }

    #[test]
    fn unknown_events_are_none() {
        assert!(parse_event(r#"{"event":"something_new"}"#).is_none());
        assert!(parse_event("not json").is_none());
    }

    #[test]
    fn outbound_frame_has_no_track_field() {
        let frame = outbound_media_frame("MZ1", "BBBB");
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["event"], "media");
        assert_eq!(v["streamSid"], "MZ1");
        assert_eq!(v["media"]["payload"], "BBBB");
        assert!(v["media"].get("track").is_none());
    }

    #[test]
    fn twiml_contains_exactly_one_stream_directive() {
        let xml = twiml_connect_stream("wss://example.test/media");
        assert_eq!(xml.matches("<Stream").count(), 1);
        assert!(xml.contains("<Connect>"));
        assert!(xml.contains("wss://example.test/media"));
        assert!(!xml.contains("<Say"));
    }
}
