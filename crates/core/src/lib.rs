//! Wire types and frame codec for the jobwire invocation protocol.
//!
//! A request frame carries a fixed-width header (padded job name plus
//! correlation id) followed by a JSON params body. Responses echo the
//! header and carry a JSON status body. See [`codec`] for the layout.

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use error::{DecodeError, EncodeError};
pub use messages::{JobOutcome, JobOutput, JobRequest, JobResponse, ResponseStatus};
pub use types::{CorrelationId, JobName};
