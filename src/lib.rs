//! Decoder for the newline-delimited JSON response stream a BuildKit-enabled
//! Docker daemon emits for `POST /build`.
//!
//! Feed the raw response body to [`BuildResponseDecoder::decode`] and you get
//! back two things as it runs: a byte-for-byte reproduction of the `docker
//! build` CLI transcript written to the sink you supply, and a sequence of
//! [`BuildEvent`]s delivered through a callback for callers that want
//! structured progress instead of (or alongside) the text.

mod decoder;
mod envelope;
mod error;
mod events;
mod humanize;
mod progress;
mod proto;
mod transcript;
mod vertex;

pub use decoder::BuildResponseDecoder;
pub use error::{DecodeError, Result};
pub use events::{ActiveImageBuildStep, BuildEvent, LayerOperation};
pub use proto::{ProgressGroup, StatusResponse, Vertex, VertexLog, VertexStatus, VertexWarning};
