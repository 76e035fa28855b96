//! Aggregates vertex/layer state into the `BuildEvent::BuildProgress`
//! snapshots delivered through the decoder's callback, per §4.5.

use std::collections::HashSet;

use crate::events::{ActiveImageBuildStep, BuildEvent, LayerOperation};
use crate::vertex::{VertexInfo, VertexTracker};

/// Tracks the set of started-but-not-completed vertices and the last
/// snapshot emitted, so a new `BuildProgress` event is only produced when
/// the reported set of active steps actually changes.
#[derive(Default)]
pub struct ProgressAggregator {
    active: HashSet<String>,
    last_emitted: Option<Vec<ActiveImageBuildStep>>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the active set for a single vertex observation from the
    /// current `StatusResponse` (called once per vertex in wire order).
    pub fn note_vertex_lifecycle(&mut self, digest: &str, started: bool, completed: bool) {
        if started {
            self.active.insert(digest.to_string());
        }
        if completed {
            self.active.remove(digest);
        }
    }

    /// Build and, if changed from the last emission, return the current
    /// `BuildProgress` snapshot.
    pub fn snapshot(&mut self, tracker: &VertexTracker) -> Option<BuildEvent> {
        let mut steps: Vec<ActiveImageBuildStep> = self
            .active
            .iter()
            .filter_map(|digest| tracker.get(digest).map(build_step))
            .collect();
        steps.sort_by_key(|s| s.step_index());

        if steps.is_empty() {
            self.last_emitted = None;
            return None;
        }
        if self.last_emitted.as_ref() == Some(&steps) {
            return None;
        }

        self.last_emitted = Some(steps.clone());
        Some(BuildEvent::BuildProgress { active_steps: steps })
    }
}

fn build_step(info: &VertexInfo) -> ActiveImageBuildStep {
    if info.layers.is_empty() {
        return ActiveImageBuildStep::NotDownloading {
            step_index: info.step_number - 1,
            name: info.name.clone(),
        };
    }

    let ops: Vec<LayerOperation> = info.layers.values().map(|l| l.current_operation).collect();
    let operation = if ops.iter().any(|op| *op == LayerOperation::Downloading) {
        LayerOperation::Downloading
    } else if ops.iter().any(|op| *op == LayerOperation::Extracting) {
        LayerOperation::Extracting
    } else if ops.iter().all(|op| *op == LayerOperation::PullComplete) {
        LayerOperation::PullComplete
    } else if ops.iter().all(|op| *op == LayerOperation::DownloadComplete) {
        LayerOperation::DownloadComplete
    } else {
        LayerOperation::PullComplete
    };

    let completed_bytes: i64 = info
        .layers
        .values()
        .map(|l| {
            if l.current_operation == operation {
                l.completed_bytes
            } else if l.current_operation > operation {
                l.total_bytes
            } else {
                0
            }
        })
        .sum();
    let total_bytes: i64 = info.layers.values().map(|l| l.total_bytes).sum();

    ActiveImageBuildStep::Downloading {
        step_index: info.step_number - 1,
        name: info.name.clone(),
        operation,
        completed_bytes,
        total_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Vertex;
    use prost_types::Timestamp;

    fn started_vertex(tracker: &mut VertexTracker, digest: &str, name: &str) {
        tracker.record_started(&Vertex {
            digest: digest.into(),
            inputs: vec![],
            name: name.into(),
            cached: false,
            started: Some(Timestamp::default()),
            completed: None,
            error: String::new(),
            progress_group: None,
        });
    }

    #[test]
    fn empty_active_set_yields_no_snapshot() {
        let tracker = VertexTracker::new();
        let mut aggregator = ProgressAggregator::new();
        assert!(aggregator.snapshot(&tracker).is_none());
    }

    #[test]
    fn unchanged_snapshot_is_not_re_emitted() {
        let mut tracker = VertexTracker::new();
        started_vertex(&mut tracker, "a", "RUN make");
        let mut aggregator = ProgressAggregator::new();
        aggregator.note_vertex_lifecycle("a", true, false);

        let first = aggregator.snapshot(&tracker);
        assert!(first.is_some());
        let second = aggregator.snapshot(&tracker);
        assert!(second.is_none());
    }

    #[test]
    fn completed_vertex_drops_out_of_the_active_set() {
        let mut tracker = VertexTracker::new();
        started_vertex(&mut tracker, "a", "RUN make");
        let mut aggregator = ProgressAggregator::new();
        aggregator.note_vertex_lifecycle("a", true, false);
        assert!(aggregator.snapshot(&tracker).is_some());

        aggregator.note_vertex_lifecycle("a", false, true);
        assert!(aggregator.snapshot(&tracker).is_none());
    }

    #[test]
    fn steps_without_layers_report_not_downloading() {
        let mut tracker = VertexTracker::new();
        started_vertex(&mut tracker, "a", "RUN make");
        let info = tracker.get("a").unwrap();
        match build_step(info) {
            ActiveImageBuildStep::NotDownloading { step_index, name } => {
                assert_eq!(step_index, 0);
                assert_eq!(name, "RUN make");
            }
            other => panic!("expected NotDownloading, got {other:?}"),
        }
    }
}
