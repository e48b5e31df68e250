//! Request and response messages exchanged with a job worker.
//!
//! These are the decoded forms of wire frames. [`crate::codec`] turns
//! them into bytes and back.

use serde::{Deserialize, Serialize};

use crate::error::EncodeError;
use crate::types::{CorrelationId, JobName};

/// The `result` value of a successful job.
pub type JobOutput = serde_json::Value;

/// A request to run one job on the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub correlation_id: CorrelationId,
    pub job_name: JobName,
    /// Keyword arguments for the job. Always a JSON object.
    pub params: serde_json::Value,
}

impl JobRequest {
    /// Build a request, serializing `params` to a JSON object.
    ///
    /// Returns [`EncodeError::Params`] if serialization fails and
    /// [`EncodeError::ParamsNotObject`] if it produces anything other
    /// than an object.
    pub fn new(
        correlation_id: CorrelationId,
        job_name: JobName,
        params: impl Serialize,
    ) -> Result<Self, EncodeError> {
        let params =
            serde_json::to_value(params).map_err(|e| EncodeError::Params(e.to_string()))?;
        ensure_object(&params)?;

        Ok(Self {
            correlation_id,
            job_name,
            params,
        })
    }
}

pub(crate) fn ensure_object(params: &serde_json::Value) -> Result<(), EncodeError> {
    use serde_json::Value;

    let kind = match params {
        Value::Object(_) => return Ok(()),
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
    };
    Err(EncodeError::ParamsNotObject(kind))
}

/// Wire value of the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// What the worker reported for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `status: "success"` with its `result`.
    Success(JobOutput),
    /// `status: "error"` with its human-readable `message`.
    Error(String),
}

/// The worker's reply to one [`JobRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobResponse {
    pub correlation_id: CorrelationId,
    pub outcome: JobOutcome,
}

impl JobResponse {
    pub fn success(correlation_id: CorrelationId, result: JobOutput) -> Self {
        Self {
            correlation_id,
            outcome: JobOutcome::Success(result),
        }
    }

    pub fn error(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            outcome: JobOutcome::Error(message.into()),
        }
    }

    pub fn status(&self) -> ResponseStatus {
        match self.outcome {
            JobOutcome::Success(_) => ResponseStatus::Success,
            JobOutcome::Error(_) => ResponseStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn name() -> JobName {
        JobName::new("test").unwrap()
    }

    #[test]
    fn request_accepts_serializable_struct() {
        #[derive(Serialize)]
        struct Params {
            test: &'static str,
            job_num: u32,
        }

        let req = JobRequest::new(
            CorrelationId::new(1),
            name(),
            Params {
                test: "value",
                job_num: 3,
            },
        )
        .unwrap();

        assert_eq!(req.params, json!({"test": "value", "job_num": 3}));
    }

    #[test]
    fn request_rejects_non_object_params() {
        assert_matches!(
            JobRequest::new(CorrelationId::new(1), name(), vec![1, 2]),
            Err(EncodeError::ParamsNotObject("an array"))
        );
        assert_matches!(
            JobRequest::new(CorrelationId::new(1), name(), ()),
            Err(EncodeError::ParamsNotObject("null"))
        );
    }

    #[test]
    fn request_rejects_unserializable_params() {
        use std::collections::HashMap;

        // JSON object keys must be strings.
        let mut params = HashMap::new();
        params.insert(vec![1u8], 1);

        assert_matches!(
            JobRequest::new(CorrelationId::new(1), name(), params),
            Err(EncodeError::Params(_))
        );
    }

    #[test]
    fn response_status_matches_outcome() {
        let ok = JobResponse::success(CorrelationId::new(1), json!("ok"));
        let err = JobResponse::error(CorrelationId::new(2), "bad input");

        assert_eq!(ok.status(), ResponseStatus::Success);
        assert_eq!(err.status(), ResponseStatus::Error);
        assert_eq!(err.status().as_str(), "error");
    }
}
