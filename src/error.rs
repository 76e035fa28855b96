use thiserror::Error;

/// Errors that halt decoding of a BuildKit image-build response stream.
///
/// Semantic build failures (the daemon reporting that the build itself failed)
/// are not represented here, those are delivered as a [`crate::BuildEvent::BuildError`]
/// and decoding continues to the end of the stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A line of input did not parse as a JSON object.
    #[error("malformed response line: {line}: {source}")]
    MalformedResponse {
        /// The offending line, quoted as a JSON string for safe display.
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stream violated the BuildKit wire contract (missing field, bad
    /// base64, a status/log for a vertex that was never started, ...).
    #[error("BuildKit protocol error: {message}")]
    ProtocolError { message: String },

    /// Writing to the caller-supplied transcript sink failed.
    #[error("failed to write build transcript: {0}")]
    SinkWrite(#[source] std::io::Error),
}

impl DecodeError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        Self::SinkWrite(err)
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
