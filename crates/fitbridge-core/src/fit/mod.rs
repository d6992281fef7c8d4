//! FIT activity container: codec, typed messages and the correcting transform.

pub mod codec;
mod crc;
pub mod message;
pub mod transform;

pub use codec::{DecodeError, EncodeError, FitFile};
pub use message::{BaseType, DeveloperField, Field, Message, RawMessage, Sample, SessionSummary};
pub use transform::{
    transform_bytes, AggregateAccumulator, RecordStreamTransformer, TransformError,
    TransformOutput, TransformStats,
};
