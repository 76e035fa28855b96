//! Parses and classifies a single newline-delimited JSON line from the
//! Docker Engine API's image-build response stream.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use prost::Message;
use serde::Deserialize;

use crate::error::{DecodeError, Result};
use crate::proto::StatusResponse;

/// The shape shared by all three envelope kinds this crate understands;
/// `aux` is deliberately untyped since its schema depends on `id`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    aux: Option<serde_json::Value>,
}

/// What a single response line resolved to, after unwrapping its envelope.
pub enum ClassifiedLine {
    /// `{"error": "..."}`
    Error(String),
    /// `{"id":"moby.image.id","aux":{"ID":"..."}}`
    ImageId(String),
    /// `{"id":"moby.buildkit.trace","aux":"<base64>"}`, decoded.
    Trace(StatusResponse),
    /// A line this crate has no behavior for (no `error`, and an `id` other
    /// than the two it recognizes, or no `id` at all).
    Ignored,
}

/// Parse and classify one line. `line` must not include its trailing newline.
pub fn classify_line(line: &str) -> Result<ClassifiedLine> {
    let envelope: Envelope = serde_json::from_str(line).map_err(|source| DecodeError::MalformedResponse {
        line: serde_json::to_string(line).unwrap_or_else(|_| line.to_string()),
        source,
    })?;

    if let Some(message) = envelope.error.filter(|s| !s.is_empty()) {
        return Ok(ClassifiedLine::Error(message));
    }

    match envelope.id.as_deref() {
        Some("moby.image.id") => {
            let image_id = envelope
                .aux
                .as_ref()
                .and_then(|v| v.get("ID"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| DecodeError::protocol("moby.image.id envelope is missing aux.ID"))?;
            Ok(ClassifiedLine::ImageId(image_id.to_string()))
        }
        Some("moby.buildkit.trace") => {
            let encoded = envelope
                .aux
                .as_ref()
                .and_then(|v| v.as_str())
                .ok_or_else(|| DecodeError::protocol("moby.buildkit.trace envelope is missing aux"))?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|source| DecodeError::protocol(format!("invalid base64 in trace aux: {source}")))?;
            let response = StatusResponse::decode(bytes.as_slice())
                .map_err(|source| DecodeError::protocol(format!("invalid StatusResponse protobuf: {source}")))?;
            Ok(ClassifiedLine::Trace(response))
        }
        _ => Ok(ClassifiedLine::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn error_envelope_is_classified() {
        match classify_line(r#"{"error":"failed to solve"}"#).unwrap() {
            ClassifiedLine::Error(message) => assert_eq!(message, "failed to solve"),
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn blank_error_field_is_not_treated_as_an_error() {
        match classify_line(r#"{"error":"","stream":"ignored"}"#).unwrap() {
            ClassifiedLine::Ignored => {}
            _ => panic!("expected Ignored"),
        }
    }

    #[test]
    fn image_id_envelope_is_classified() {
        match classify_line(r#"{"id":"moby.image.id","aux":{"ID":"sha256:deadbeef"}}"#).unwrap() {
            ClassifiedLine::ImageId(id) => assert_eq!(id, "sha256:deadbeef"),
            _ => panic!("expected ImageId"),
        }
    }

    #[test]
    fn image_id_envelope_missing_aux_id_is_a_protocol_error() {
        assert!(classify_line(r#"{"id":"moby.image.id","aux":{}}"#).is_err());
    }

    #[test]
    fn trace_envelope_round_trips_a_status_response() {
        let response = StatusResponse {
            vertexes: vec![],
            statuses: vec![],
            logs: vec![],
            warnings: vec![],
        };
        let mut buf = Vec::new();
        response.encode(&mut buf).unwrap();
        let encoded = STANDARD.encode(&buf);
        let line = format!(r#"{{"id":"moby.buildkit.trace","aux":"{encoded}"}}"#);

        match classify_line(&line).unwrap() {
            ClassifiedLine::Trace(decoded) => assert_eq!(decoded, response),
            _ => panic!("expected Trace"),
        }
    }

    #[test]
    fn trace_envelope_with_invalid_base64_is_a_protocol_error() {
        let line = r#"{"id":"moby.buildkit.trace","aux":"not valid base64!!"}"#;
        assert!(classify_line(line).is_err());
    }

    #[test]
    fn unrecognized_envelope_is_ignored() {
        match classify_line(r#"{"stream":"Step 1/4 : FROM alpine\n"}"#).unwrap() {
            ClassifiedLine::Ignored => {}
            _ => panic!("expected Ignored"),
        }
    }

    #[test]
    fn non_json_line_is_a_malformed_response_error() {
        assert!(matches!(
            classify_line("not json"),
            Err(DecodeError::MalformedResponse { .. })
        ));
    }
}
