//! Frame codec
//!
//! Encoding and decoding functions for the job invocation protocol.
//!
//! ## Wire Format
//!
//! ### Request Frame (binary)
//! ```text
//! ┌──────────────┬──────────────────┬─────────────────────────┐
//! │ Job name (8) │ Correlation (8)  │   JSON params object    │
//! └──────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! The job name is right-padded with spaces. The correlation id is a
//! big-endian `u64`.
//!
//! ### Response Frame
//! Binary responses echo the 16-byte request header, followed by a
//! JSON body:
//! ```text
//! { "status": "success" | "error",
//!   "result": <any>,           // iff success
//!   "message": <string>,       // iff error
//!   "correlationId": <u64> }
//! ```
//! Text responses carry the JSON body alone, in which case
//! `correlationId` is mandatory. A `message` on a success or a `result`
//! on an error is rejected; an explicit `null` is treated as absent.
//!
//! The client never inspects the echoed job name, so a response is
//! routed by its correlation id even when the name bytes are garbage.

use serde_json::{Map, Value};

use crate::error::{DecodeError, EncodeError};
use crate::messages::{ensure_object, JobOutcome, JobRequest, JobResponse};
use crate::types::{
    CorrelationId, JobName, CORRELATION_ID_WIDTH, FILL_BYTE, HEADER_WIDTH, JOB_NAME_WIDTH,
};

const FIELD_STATUS: &str = "status";
const FIELD_RESULT: &str = "result";
const FIELD_MESSAGE: &str = "message";
const FIELD_CORRELATION_ID: &str = "correlationId";

// =============================================================================
// Header
// =============================================================================

fn write_header(buf: &mut Vec<u8>, job_name: &JobName, correlation_id: CorrelationId) {
    buf.extend_from_slice(&job_name.padded());
    buf.extend_from_slice(&correlation_id.to_be_bytes());
}

/// Split a frame into its raw name field, correlation id and body.
fn split_header(frame: &[u8]) -> Result<(&[u8], CorrelationId, &[u8]), DecodeError> {
    if frame.len() < HEADER_WIDTH {
        return Err(DecodeError::Truncated { len: frame.len() });
    }

    let (name_bytes, rest) = frame.split_at(JOB_NAME_WIDTH);
    let (id_bytes, body) = rest.split_at(CORRELATION_ID_WIDTH);

    let mut id = [0u8; CORRELATION_ID_WIDTH];
    id.copy_from_slice(id_bytes);

    Ok((name_bytes, CorrelationId::from_be_bytes(id), body))
}

/// Parse the name field with the fill bytes stripped.
fn parse_job_name(
    name_bytes: &[u8],
    correlation_id: CorrelationId,
) -> Result<JobName, DecodeError> {
    let invalid = || DecodeError::InvalidHeader { correlation_id };

    let trimmed_len = name_bytes
        .iter()
        .rposition(|&b| b != FILL_BYTE)
        .map_or(0, |i| i + 1);
    let name = std::str::from_utf8(&name_bytes[..trimmed_len]).map_err(|_| invalid())?;

    JobName::new(name).map_err(|_| invalid())
}

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request frame.
///
/// Format: padded job name (8) + correlation id (8) + JSON params.
pub fn encode_request(request: &JobRequest) -> Result<Vec<u8>, EncodeError> {
    ensure_object(&request.params)?;
    let body =
        serde_json::to_vec(&request.params).map_err(|e| EncodeError::Params(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_WIDTH + body.len());
    write_header(&mut frame, &request.job_name, request.correlation_id);
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Decode a request frame, as a worker would.
pub fn decode_request(frame: &[u8]) -> Result<JobRequest, DecodeError> {
    let (name_bytes, correlation_id, body) = split_header(frame)?;
    let job_name = parse_job_name(name_bytes, correlation_id)?;

    let params: Value = serde_json::from_slice(body).map_err(|e| DecodeError::InvalidJson {
        correlation_id: Some(correlation_id),
        reason: e.to_string(),
    })?;
    if !params.is_object() {
        return Err(DecodeError::InvalidJson {
            correlation_id: Some(correlation_id),
            reason: "params must be a JSON object".to_string(),
        });
    }

    Ok(JobRequest {
        correlation_id,
        job_name,
        params,
    })
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response frame echoing the request header.
///
/// The body always includes `correlationId`.
pub fn encode_response(job_name: &JobName, response: &JobResponse) -> Vec<u8> {
    let body = response_body(response).to_string().into_bytes();

    let mut frame = Vec::with_capacity(HEADER_WIDTH + body.len());
    write_header(&mut frame, job_name, response.correlation_id);
    frame.extend_from_slice(&body);
    frame
}

/// JSON body of a response, as sent in text frames.
pub fn response_body(response: &JobResponse) -> Value {
    let mut body = Map::new();
    body.insert(
        FIELD_STATUS.to_string(),
        Value::from(response.status().as_str()),
    );
    match &response.outcome {
        JobOutcome::Success(result) => {
            body.insert(FIELD_RESULT.to_string(), result.clone());
        }
        JobOutcome::Error(message) => {
            body.insert(FIELD_MESSAGE.to_string(), Value::from(message.as_str()));
        }
    }
    body.insert(
        FIELD_CORRELATION_ID.to_string(),
        Value::from(response.correlation_id.get()),
    );
    Value::Object(body)
}

/// Decode a binary response frame (header + JSON body).
pub fn decode_response(frame: &[u8]) -> Result<JobResponse, DecodeError> {
    let (_, header_id, body) = split_header(frame)?;
    let body = parse_body(body, Some(header_id))?;

    if let Some(body_id) = body_correlation_id(&body, Some(header_id))? {
        if body_id != header_id {
            return Err(DecodeError::CorrelationMismatch {
                header: header_id,
                body: body_id,
            });
        }
    }

    Ok(JobResponse {
        correlation_id: header_id,
        outcome: parse_outcome(&body, Some(header_id))?,
    })
}

/// Decode a header-less JSON text response.
///
/// `correlationId` must be present in the body.
pub fn decode_text_response(text: &str) -> Result<JobResponse, DecodeError> {
    let body = parse_body(text.as_bytes(), None)?;
    let correlation_id =
        body_correlation_id(&body, None)?.ok_or(DecodeError::MissingField {
            correlation_id: None,
            field: FIELD_CORRELATION_ID,
        })?;

    Ok(JobResponse {
        correlation_id,
        outcome: parse_outcome(&body, Some(correlation_id))?,
    })
}

fn parse_body(
    body: &[u8],
    correlation_id: Option<CorrelationId>,
) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::InvalidJson {
            correlation_id,
            reason: "response body must be a JSON object".to_string(),
        }),
        Err(e) => Err(DecodeError::InvalidJson {
            correlation_id,
            reason: e.to_string(),
        }),
    }
}

fn body_correlation_id(
    body: &Map<String, Value>,
    header_id: Option<CorrelationId>,
) -> Result<Option<CorrelationId>, DecodeError> {
    match body.get(FIELD_CORRELATION_ID) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|id| Some(CorrelationId::new(id)))
            .ok_or_else(|| DecodeError::InvalidJson {
                correlation_id: header_id,
                reason: format!("{FIELD_CORRELATION_ID} must be an unsigned integer"),
            }),
    }
}

fn parse_outcome(
    body: &Map<String, Value>,
    correlation_id: Option<CorrelationId>,
) -> Result<JobOutcome, DecodeError> {
    let missing = |field| DecodeError::MissingField {
        correlation_id,
        field,
    };

    let status = body
        .get(FIELD_STATUS)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(FIELD_STATUS))?;

    let unexpected = |field: &'static str| DecodeError::UnexpectedField {
        correlation_id,
        status: status.to_string(),
        field,
    };
    let present = |field: &str| !matches!(body.get(field), None | Some(Value::Null));

    match status {
        "success" => {
            if present(FIELD_MESSAGE) {
                return Err(unexpected(FIELD_MESSAGE));
            }
            body.get(FIELD_RESULT)
                .cloned()
                .map(JobOutcome::Success)
                .ok_or_else(|| missing(FIELD_RESULT))
        }
        "error" => {
            if present(FIELD_RESULT) {
                return Err(unexpected(FIELD_RESULT));
            }
            body.get(FIELD_MESSAGE)
                .and_then(Value::as_str)
                .map(|m| JobOutcome::Error(m.to_string()))
                .ok_or_else(|| missing(FIELD_MESSAGE))
        }
        other => Err(DecodeError::UnknownStatus {
            correlation_id,
            status: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn request(id: u64, params: Value) -> JobRequest {
        JobRequest {
            correlation_id: CorrelationId::new(id),
            job_name: JobName::new("test").unwrap(),
            params,
        }
    }

    /// A frame with the given header and raw body bytes.
    fn frame(id: u64, body: &[u8]) -> Vec<u8> {
        let mut out = b"test    ".to_vec();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn request_header_layout() {
        let bytes = encode_request(&request(7, json!({"a": 1}))).unwrap();

        assert_eq!(&bytes[..8], b"test    ");
        assert_eq!(&bytes[8..16], &7u64.to_be_bytes());
        assert_eq!(&bytes[16..], br#"{"a":1}"#);
    }

    #[test]
    fn encode_rejects_non_object_params() {
        assert_matches!(
            encode_request(&request(1, json!("nope"))),
            Err(EncodeError::ParamsNotObject("a string"))
        );
    }

    #[test]
    fn worker_side_decode_recovers_request() {
        let sent = request(99, json!({"test": "value"}));
        let bytes = encode_request(&sent).unwrap();

        assert_eq!(decode_request(&bytes).unwrap(), sent);
    }

    #[test]
    fn echoed_response_keeps_correlation_id() {
        let req = request(12345, json!({"a": 1}));
        let bytes = encode_request(&req).unwrap();

        // A worker parses the request and echoes its header in the reply.
        let parsed = decode_request(&bytes).unwrap();
        let reply = encode_response(
            &parsed.job_name,
            &JobResponse::success(parsed.correlation_id, json!("ok")),
        );

        let response = decode_response(&reply).unwrap();
        assert_eq!(response.correlation_id, req.correlation_id);
        assert_eq!(response.outcome, JobOutcome::Success(json!("ok")));
    }

    #[test]
    fn decode_success_without_body_id() {
        let bytes = frame(3, br#"{"status":"success","result":{"n":2}}"#);
        let response = decode_response(&bytes).unwrap();

        assert_eq!(response.correlation_id, CorrelationId::new(3));
        assert_eq!(response.outcome, JobOutcome::Success(json!({"n": 2})));
    }

    #[test]
    fn decode_success_with_null_result() {
        let bytes = frame(3, br#"{"status":"success","result":null}"#);
        assert_eq!(
            decode_response(&bytes).unwrap().outcome,
            JobOutcome::Success(Value::Null)
        );
    }

    #[test]
    fn decode_error_response() {
        let bytes = frame(4, br#"{"status":"error","message":"bad input","correlationId":4}"#);
        let response = decode_response(&bytes).unwrap();

        assert_eq!(response.outcome, JobOutcome::Error("bad input".to_string()));
    }

    #[test]
    fn decode_rejects_short_frame() {
        assert_matches!(
            decode_response(b"test    \0\0"),
            Err(DecodeError::Truncated { len: 10 })
        );
    }

    #[test]
    fn decode_rejects_invalid_json_and_keeps_id() {
        let err = decode_response(&frame(5, b"{not json")).unwrap_err();

        assert_matches!(err, DecodeError::InvalidJson { .. });
        assert_eq!(err.correlation_id(), Some(CorrelationId::new(5)));
    }

    #[test]
    fn decode_rejects_missing_status() {
        assert_matches!(
            decode_response(&frame(6, br#"{"result":1}"#)),
            Err(DecodeError::MissingField { field: "status", .. })
        );
    }

    #[test]
    fn decode_rejects_success_without_result() {
        assert_matches!(
            decode_response(&frame(6, br#"{"status":"success"}"#)),
            Err(DecodeError::MissingField { field: "result", .. })
        );
    }

    #[test]
    fn decode_rejects_error_without_message() {
        assert_matches!(
            decode_response(&frame(6, br#"{"status":"error"}"#)),
            Err(DecodeError::MissingField { field: "message", .. })
        );
    }

    #[test]
    fn decode_ignores_unreadable_job_name() {
        let mut bytes = vec![0xff; 8];
        bytes.extend_from_slice(&9u64.to_be_bytes());
        bytes.extend_from_slice(br#"{"status":"success","result":"ok"}"#);

        let response = decode_response(&bytes).unwrap();
        assert_eq!(response.correlation_id, CorrelationId::new(9));
        assert_eq!(response.outcome, JobOutcome::Success(json!("ok")));
    }

    #[test]
    fn worker_side_decode_reports_id_of_bad_name() {
        let mut bytes = vec![0xff; 8];
        bytes.extend_from_slice(&9u64.to_be_bytes());
        bytes.extend_from_slice(b"{}");

        let err = decode_request(&bytes).unwrap_err();
        assert_matches!(err, DecodeError::InvalidHeader { .. });
        assert_eq!(err.correlation_id(), Some(CorrelationId::new(9)));
    }

    #[test]
    fn decode_rejects_field_of_the_other_status() {
        let err = decode_response(&frame(6, br#"{"status":"success","result":1,"message":"hm"}"#))
            .unwrap_err();
        assert_matches!(err, DecodeError::UnexpectedField { field: "message", .. });
        assert_eq!(err.correlation_id(), Some(CorrelationId::new(6)));

        assert_matches!(
            decode_response(&frame(6, br#"{"status":"error","message":"no","result":2}"#)),
            Err(DecodeError::UnexpectedField { field: "result", .. })
        );
    }

    #[test]
    fn decode_treats_null_other_field_as_absent() {
        let bytes = frame(6, br#"{"status":"error","message":"no","result":null}"#);
        assert_eq!(
            decode_response(&bytes).unwrap().outcome,
            JobOutcome::Error("no".to_string())
        );
    }

    #[test]
    fn decode_rejects_unknown_status() {
        assert_matches!(
            decode_response(&frame(6, br#"{"status":"pending"}"#)),
            Err(DecodeError::UnknownStatus { .. })
        );
    }

    #[test]
    fn decode_rejects_mismatched_body_id() {
        let err = decode_response(&frame(1, br#"{"status":"success","result":1,"correlationId":2}"#))
            .unwrap_err();

        assert_matches!(err, DecodeError::CorrelationMismatch { .. });
        assert_eq!(err.correlation_id(), Some(CorrelationId::new(1)));
    }

    #[test]
    fn text_response_requires_correlation_id() {
        assert_matches!(
            decode_text_response(r#"{"status":"success","result":"ok"}"#),
            Err(DecodeError::MissingField {
                field: "correlationId",
                ..
            })
        );

        let response =
            decode_text_response(r#"{"status":"success","result":"ok","correlationId":8}"#)
                .unwrap();
        assert_eq!(response.correlation_id, CorrelationId::new(8));
    }

    #[test]
    fn response_body_shape() {
        let body = response_body(&JobResponse::error(CorrelationId::new(2), "boom"));
        assert_eq!(
            body,
            json!({"status": "error", "message": "boom", "correlationId": 2})
        );
    }
}
