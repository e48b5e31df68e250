use crate::types::{CorrelationId, HEADER_WIDTH};

/// A request could not be turned into a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("Job name must not be empty")]
    EmptyJobName,

    #[error("Job name '{name}' exceeds {max} bytes")]
    JobNameTooLong { name: String, max: usize },

    #[error("Job name '{0}' contains padding or control characters")]
    InvalidJobName(String),

    #[error("Params are not serializable: {0}")]
    Params(String),

    #[error("Params must be a JSON object, got {0}")]
    ParamsNotObject(&'static str),
}

/// An inbound frame could not be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame is {len} bytes, shorter than the {}-byte header", HEADER_WIDTH)]
    Truncated { len: usize },

    #[error("Job name in header is not a valid job name")]
    InvalidHeader { correlation_id: CorrelationId },

    #[error("Frame body is not valid JSON: {reason}")]
    InvalidJson {
        correlation_id: Option<CorrelationId>,
        reason: String,
    },

    #[error("Frame body is missing field '{field}'")]
    MissingField {
        correlation_id: Option<CorrelationId>,
        field: &'static str,
    },

    #[error("Frame body has unknown status '{status}'")]
    UnknownStatus {
        correlation_id: Option<CorrelationId>,
        status: String,
    },

    #[error("Frame body with status '{status}' must not carry '{field}'")]
    UnexpectedField {
        correlation_id: Option<CorrelationId>,
        status: String,
        field: &'static str,
    },

    #[error("Header correlation id {header} does not match body correlation id {body}")]
    CorrelationMismatch {
        header: CorrelationId,
        body: CorrelationId,
    },
}

impl DecodeError {
    /// The correlation id of the frame, when the header was readable.
    ///
    /// Lets the receiver reject the matching invocation instead of
    /// leaving it pending.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Truncated { .. } => None,
            Self::InvalidHeader { correlation_id } => Some(*correlation_id),
            Self::InvalidJson { correlation_id, .. }
            | Self::MissingField { correlation_id, .. }
            | Self::UnknownStatus { correlation_id, .. }
            | Self::UnexpectedField { correlation_id, .. } => *correlation_id,
            Self::CorrelationMismatch { header, .. } => Some(*header),
        }
    }
}
