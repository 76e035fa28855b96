//! Per-vertex lifecycle and per-layer download/extract state.

use std::collections::HashMap;

use prost_types::Timestamp;

use crate::error::{DecodeError, Result};
use crate::events::LayerOperation;
use crate::proto::{Vertex, VertexStatus};

/// Download/extract state for a single layer within a vertex, keyed by its
/// (prefix-stripped) layer digest.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo {
    pub current_operation: LayerOperation,
    pub completed_bytes: i64,
    pub total_bytes: i64,
}

/// Decoder-side bookkeeping for a vertex from the moment its `started` is
/// first observed.
#[derive(Debug)]
pub struct VertexInfo {
    /// 1-based, assigned on first `started` observation; never reassigned.
    pub step_number: usize,
    pub name: String,
    /// The wire timestamp `started` carried the first time we saw this vertex;
    /// log/status timestamps are rendered relative to this.
    pub started: Timestamp,
    pub cached: bool,
    /// Whether we have already processed *a* `completed` observation for the
    /// vertex's current lifecycle (reset when the vertex re-starts).
    pub completed_seen: bool,
    pub layers: HashMap<String, LayerInfo>,
}

impl VertexInfo {
    /// Apply a status update to this vertex's layer state. Mirrors BuildKit's
    /// own monotonic-with-drops state machine: out-of-order updates that would
    /// move a layer backwards are silently dropped.
    pub fn apply_status(&mut self, status: &VertexStatus) {
        if status.total == 0 && status.name != "extract" {
            return;
        }

        let layer_digest = strip_extracting_prefix(&status.id).to_string();

        match status.name.as_str() {
            "downloading" => {
                self.layers.insert(
                    layer_digest,
                    LayerInfo {
                        current_operation: LayerOperation::Downloading,
                        completed_bytes: status.current,
                        total_bytes: status.total,
                    },
                );
            }
            "extract" => {
                let prev_total = self
                    .layers
                    .get(&layer_digest)
                    .map(|l| l.total_bytes)
                    .unwrap_or(0);
                let info = if status.completed.is_some() {
                    LayerInfo {
                        current_operation: LayerOperation::PullComplete,
                        completed_bytes: prev_total,
                        total_bytes: prev_total,
                    }
                } else {
                    LayerInfo {
                        current_operation: LayerOperation::Extracting,
                        completed_bytes: 0,
                        total_bytes: prev_total,
                    }
                };
                self.layers.insert(layer_digest, info);
            }
            "done" => match self.layers.get(&layer_digest) {
                None => {
                    self.layers.insert(
                        layer_digest,
                        LayerInfo {
                            current_operation: LayerOperation::PullComplete,
                            completed_bytes: status.current,
                            total_bytes: status.total,
                        },
                    );
                }
                Some(existing) if existing.current_operation > LayerOperation::DownloadComplete => {
                    // Preserve the more advanced state; this update is stale.
                }
                Some(_) => {
                    self.layers.insert(
                        layer_digest,
                        LayerInfo {
                            current_operation: LayerOperation::DownloadComplete,
                            completed_bytes: status.current,
                            total_bytes: status.total,
                        },
                    );
                }
            },
            _ => {}
        }
    }
}

/// Strip a leading `"extracting "` prefix BuildKit sometimes puts on the
/// status id for extract events, yielding the bare layer digest.
pub fn strip_extracting_prefix(id: &str) -> &str {
    id.strip_prefix("extracting ").unwrap_or(id)
}

/// `exporting to image` does not declare its true inputs, so its start is the
/// one safe point to flush every still-pending completion.
pub fn is_bulkhead_vertex(name: &str) -> bool {
    name == "exporting to image"
}

/// Vertices whose `completed` marker BuildKit never retracts by re-opening.
pub fn is_trustworthy_complete(name: &str) -> bool {
    name == "exporting to image"
        || name == "copy /context /"
        || name.starts_with("[internal] load metadata for ")
}

/// Tracks every vertex observed to have started, assigning each a stable,
/// monotonically increasing step number the first time it is seen.
#[derive(Debug, Default)]
pub struct VertexTracker {
    started: HashMap<String, VertexInfo>,
    next_step_number: usize,
}

impl VertexTracker {
    pub fn new() -> Self {
        Self {
            started: HashMap::new(),
            next_step_number: 1,
        }
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.started.contains_key(digest)
    }

    pub fn get(&self, digest: &str) -> Option<&VertexInfo> {
        self.started.get(digest)
    }

    pub fn get_mut(&mut self, digest: &str) -> Option<&mut VertexInfo> {
        self.started.get_mut(digest)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VertexInfo)> {
        self.started.iter()
    }

    /// Record a vertex's first `started` observation, assigning its step
    /// number. No-op (returns the existing entry) if already recorded.
    pub fn record_started(&mut self, vertex: &Vertex) -> &mut VertexInfo {
        let step_number = self.next_step_number;
        let entry = self
            .started
            .entry(vertex.digest.clone())
            .or_insert_with(|| {
                let info = VertexInfo {
                    step_number,
                    name: vertex.name.clone(),
                    started: vertex.started.clone().unwrap_or_default(),
                    cached: vertex.cached,
                    completed_seen: false,
                    layers: HashMap::new(),
                };
                info
            });
        if entry.step_number == step_number {
            self.next_step_number += 1;
        }
        entry
    }

    /// Apply a status update, erroring if its vertex was never started.
    pub fn apply_status(&mut self, status: &VertexStatus) -> Result<()> {
        let info = self.started.get_mut(&status.vertex).ok_or_else(|| {
            DecodeError::protocol(format!(
                "status for unknown vertex {}: {}",
                status.vertex, status.id
            ))
        })?;
        info.apply_status(status);
        Ok(())
    }
}
