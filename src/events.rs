//! Structured events delivered through the decoder's callback, alongside the
//! byte-oriented transcript.

/// The operation a [`ActiveImageBuildStep::Downloading`] entry is currently
/// reporting progress for, in least-advanced-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerOperation {
    Downloading,
    DownloadComplete,
    Extracting,
    PullComplete,
}

/// A vertex that is currently started-but-not-completed, as surfaced in a
/// [`BuildEvent::BuildProgress`] snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveImageBuildStep {
    /// A started vertex with no layers of its own (e.g. a `RUN` step).
    NotDownloading { step_index: usize, name: String },
    /// A started vertex with layer activity, reporting on the
    /// least-advanced operation any of its layers is still performing.
    Downloading {
        step_index: usize,
        name: String,
        operation: LayerOperation,
        completed_bytes: i64,
        total_bytes: i64,
    },
}

impl ActiveImageBuildStep {
    pub fn step_index(&self) -> usize {
        match self {
            Self::NotDownloading { step_index, .. } => *step_index,
            Self::Downloading { step_index, .. } => *step_index,
        }
    }
}

/// A structured event emitted by the decoder as it consumes the response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// The daemon reported a terminal build failure.
    BuildError { message: String },
    /// The build completed successfully; the final image id.
    BuildComplete { image_id: String },
    /// The set of currently active steps changed since the last snapshot.
    BuildProgress {
        active_steps: Vec<ActiveImageBuildStep>,
    },
}
