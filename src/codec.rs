//! Message codec
//!
//! Control messages in, transcript/error messages out. Decoding reads
//! directly from the frame's byte slice (no intermediate `String`
//! round-trip — the "superseded session variant" the spec calls out as
//! rejected did exactly that). Malformed JSON is not an error: it maps
//! to an "ignore" sentinel so the session state is left untouched.

use serde::{Deserialize, Serialize};

/// Decoded control frame. `Ignore` is returned for malformed JSON or any
/// frame that parses but carries no recognized field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedControl {
    Update {
        language: Option<String>,
        end_requested: bool,
    },
    Ignore,
}

#[derive(Debug, Deserialize)]
struct RawControl {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Parses a control frame straight from UTF-8 bytes. Unknown fields are
/// ignored by `serde_json` by default; parse failures map to `Ignore`
/// rather than propagating an error, per spec §3/§7 (ProtocolError is
/// silently swallowed).
pub fn decode_control(bytes: &[u8]) -> DecodedControl {
    match serde_json::from_slice::<RawControl>(bytes) {
        Ok(raw) => {
            let end_requested = raw
                .r#type
                .as_deref()
                .map(|t| t.eq_ignore_ascii_case("end"))
                .unwrap_or(false);
            DecodedControl::Update {
                language: raw.language,
                end_requested,
            }
        }
        Err(_) => DecodedControl::Ignore,
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutboundMessage<'a> {
    Transcript { text: &'a str },
    Error { message: &'a str },
}

/// Encodes `{"type":"transcript","text":...}` as a single-line UTF-8 JSON
/// document, ready to send as one text frame.
pub fn encode_transcript(text: &str) -> Vec<u8> {
    serde_json::to_vec(&OutboundMessage::Transcript { text })
        .expect("transcript JSON encoding cannot fail")
}

/// Encodes `{"type":"error","message":...}`.
pub fn encode_error(message: &str) -> Vec<u8> {
    serde_json::to_vec(&OutboundMessage::Error { message })
        .expect("error JSON encoding cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_language_update() {
        let decoded = decode_control(br#"{"language":"en"}"#);
        assert_eq!(
            decoded,
            DecodedControl::Update {
                language: Some("en".to_string()),
                end_requested: false,
            }
        );
    }

    #[test]
    fn decodes_end_case_insensitively() {
        let decoded = decode_control(br#"{"type":"END"}"#);
        assert_eq!(
            decoded,
            DecodedControl::Update {
                language: None,
                end_requested: true,
            }
        );
    }

    #[test]
    fn ignores_unknown_fields() {
        let decoded = decode_control(br#"{"language":"fr","bogus":123}"#);
        assert_eq!(
            decoded,
            DecodedControl::Update {
                language: Some("fr".to_string()),
                end_requested: false,
            }
        );
    }

    #[test]
    fn ignores_malformed_json() {
        assert_eq!(decode_control(b"not json at all"), DecodedControl::Ignore);
        assert_eq!(decode_control(b""), DecodedControl::Ignore);
    }

    #[test]
    fn encodes_transcript_as_single_line_camel_case() {
        let bytes = encode_transcript("hello world");
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"type":"transcript","text":"hello world"}"#);
    }

    #[test]
    fn encodes_error_message() {
        let bytes = encode_error("boom");
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"type":"error","message":"boom"}"#);
    }
}
