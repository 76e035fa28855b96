//! Renders vertex transitions, logs, and layer progress to the transcript
//! sink in the Docker CLI's `#<step> ...` idiom.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{DecodeError, Result};
use crate::events::LayerOperation;
use crate::humanize::{format_elapsed, humanize_bytes};
use crate::proto::{Vertex, VertexLog, VertexStatus};
use crate::vertex::{is_bulkhead_vertex, is_trustworthy_complete, strip_extracting_prefix, VertexTracker};

/// Owns the step-transition bookkeeping (`lastWrittenVertexDigest`) and the
/// deferred-completion buffer (`pendingCompletedVertices`) described in §4.3.
#[derive(Default)]
pub struct TranscriptWriter {
    last_written: Option<String>,
    /// (digest, cached) in the order completions were deferred.
    pending_completed: Vec<(String, bool)>,
}

impl TranscriptWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Before writing any line belonging to a different vertex, emit the
    /// `#<prev> ...` transition marker for the previous vertex and the header
    /// for the new one. No-op if `digest` is already the current vertex.
    async fn ensure_current<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &VertexTracker,
        digest: &str,
        sink: &mut W,
    ) -> Result<()> {
        if self.last_written.as_deref() == Some(digest) {
            return Ok(());
        }

        let mut out = String::new();
        if let Some(prev) = &self.last_written {
            if let Some(prev_info) = tracker.get(prev) {
                out.push_str(&format!("#{} ...\n\n", prev_info.step_number));
            }
        }

        let info = tracker
            .get(digest)
            .expect("vertex must be recorded before any line is rendered for it");
        out.push_str(&format!("#{} {}\n", info.step_number, info.name));
        sink.write_all(out.as_bytes()).await?;
        self.last_written = Some(digest.to_string());
        Ok(())
    }

    async fn write_terminator<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &VertexTracker,
        digest: &str,
        label: &str,
        sink: &mut W,
    ) -> Result<()> {
        self.ensure_current(tracker, digest, sink).await?;
        let step_number = tracker.get(digest).expect("just transitioned to it").step_number;
        sink.write_all(format!("#{step_number} {label}\n\n").as_bytes())
            .await?;
        self.last_written = None;
        Ok(())
    }

    async fn flush_completion<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &VertexTracker,
        digest: &str,
        cached: bool,
        sink: &mut W,
    ) -> Result<()> {
        let label = if cached { "CACHED" } else { "DONE" };
        self.write_terminator(tracker, digest, label, sink).await
    }

    fn take_pending(&mut self, digest: &str) -> Option<bool> {
        let pos = self.pending_completed.iter().position(|(d, _)| d == digest)?;
        Some(self.pending_completed.remove(pos).1)
    }

    async fn flush_all_pending<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &VertexTracker,
        sink: &mut W,
    ) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_completed);
        for (digest, cached) in pending {
            self.flush_completion(tracker, &digest, cached, sink).await?;
        }
        Ok(())
    }

    /// Handle a vertex's `started` observation: the dependency- and
    /// bulkhead-driven flush of pending completions, step-number assignment,
    /// and the header transition. Does not touch `completed`, call
    /// [`Self::on_vertex_completed`] for that, after this vertex's logs and
    /// completed statuses have been rendered.
    pub async fn on_vertex_started<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &mut VertexTracker,
        vertex: &Vertex,
        sink: &mut W,
    ) -> Result<()> {
        if vertex.started.is_none() {
            return Ok(());
        }

        if !tracker.contains(&vertex.digest) {
            for input in &vertex.inputs {
                if let Some(cached) = self.take_pending(input) {
                    self.flush_completion(tracker, input, cached, sink).await?;
                }
            }
            if is_bulkhead_vertex(&vertex.name) {
                self.flush_all_pending(tracker, sink).await?;
            }
            tracker.record_started(vertex);
            self.ensure_current(tracker, &vertex.digest, sink).await?;
            return Ok(());
        }

        let was_completed = tracker
            .get(&vertex.digest)
            .map(|info| info.completed_seen)
            .unwrap_or(false);
        if was_completed {
            if let Some(info) = tracker.get_mut(&vertex.digest) {
                info.completed_seen = false;
            }
            self.take_pending(&vertex.digest);
            self.ensure_current(tracker, &vertex.digest, sink).await?;
        }
        Ok(())
    }

    /// Handle a vertex's `completed` observation: immediate terminator for
    /// trustworthy/errored vertices, deferred otherwise.
    pub async fn on_vertex_completed<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &mut VertexTracker,
        vertex: &Vertex,
        sink: &mut W,
    ) -> Result<()> {
        if vertex.completed.is_none() {
            return Ok(());
        }

        if !tracker.contains(&vertex.digest) {
            return Err(DecodeError::protocol(format!(
                "vertex {} completed before it was ever started",
                vertex.digest
            )));
        }

        let already = tracker.get(&vertex.digest).unwrap().completed_seen;
        if already {
            return Ok(());
        }

        if let Some(info) = tracker.get_mut(&vertex.digest) {
            info.completed_seen = true;
            info.cached = vertex.cached;
        }

        if !vertex.error.is_empty() {
            self.ensure_current(tracker, &vertex.digest, sink).await?;
            let step_number = tracker.get(&vertex.digest).unwrap().step_number;
            sink.write_all(format!("#{step_number} ERROR: {}\n\n", vertex.error).as_bytes())
                .await?;
            self.last_written = None;
            return Ok(());
        }

        let name = tracker.get(&vertex.digest).unwrap().name.clone();
        if is_trustworthy_complete(&name) {
            self.flush_completion(tracker, &vertex.digest, vertex.cached, sink).await?;
        } else {
            self.pending_completed.push((vertex.digest.clone(), vertex.cached));
        }
        Ok(())
    }

    /// Render a log entry's lines under its vertex's current step header.
    pub async fn on_log<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &VertexTracker,
        log: &VertexLog,
        sink: &mut W,
    ) -> Result<()> {
        let info = tracker
            .get(&log.vertex)
            .ok_or_else(|| DecodeError::protocol(format!("log for unknown vertex {}", log.vertex)))?;
        let started = info.started.clone();

        let text = String::from_utf8_lossy(&log.msg);
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return Ok(());
        }

        let at = log.timestamp.clone().unwrap_or_default();
        let elapsed = format_elapsed(&started, &at);

        for line in trimmed.split('\n') {
            self.ensure_current(tracker, &log.vertex, sink).await?;
            let step_number = tracker.get(&log.vertex).unwrap().step_number;
            sink.write_all(format!("#{step_number} {elapsed} {line}\n").as_bytes())
                .await?;
        }
        Ok(())
    }

    /// Render (and then apply) a single layer status update per §4.4.
    pub async fn on_status<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &mut VertexTracker,
        status: &VertexStatus,
        sink: &mut W,
    ) -> Result<()> {
        if !tracker.contains(&status.vertex) {
            return Err(DecodeError::protocol(format!(
                "status for unknown vertex {}: {}",
                status.vertex, status.id
            )));
        }

        let layer_digest = strip_extracting_prefix(&status.id).to_string();
        let prior_op = tracker
            .get(&status.vertex)
            .unwrap()
            .layers
            .get(&layer_digest)
            .map(|l| l.current_operation);

        if status.completed.is_some() {
            let suppress = matches!(prior_op, Some(op) if op > LayerOperation::DownloadComplete);
            if !suppress {
                self.ensure_current(tracker, &status.vertex, sink).await?;
                let step_number = tracker.get(&status.vertex).unwrap().step_number;
                sink.write_all(format!("#{step_number} {layer_digest}: done\n").as_bytes())
                    .await?;
            }
        } else {
            match status.name.as_str() {
                "downloading" if prior_op != Some(LayerOperation::Downloading) => {
                    self.ensure_current(tracker, &status.vertex, sink).await?;
                    let step_number = tracker.get(&status.vertex).unwrap().step_number;
                    sink.write_all(
                        format!(
                            "#{step_number} {layer_digest}: downloading {}\n",
                            humanize_bytes(status.total)
                        )
                        .as_bytes(),
                    )
                    .await?;
                }
                "extract"
                    if matches!(
                        prior_op,
                        Some(LayerOperation::Downloading) | Some(LayerOperation::DownloadComplete)
                    ) =>
                {
                    self.ensure_current(tracker, &status.vertex, sink).await?;
                    let step_number = tracker.get(&status.vertex).unwrap().step_number;
                    sink.write_all(format!("#{step_number} {layer_digest}: extracting\n").as_bytes())
                        .await?;
                }
                _ => {}
            }
        }

        tracker.apply_status(status)?;
        Ok(())
    }

    /// End-of-stream: flush every vertex whose completion is still deferred.
    pub async fn flush_end_of_stream<W: AsyncWrite + Unpin>(
        &mut self,
        tracker: &VertexTracker,
        sink: &mut W,
    ) -> Result<()> {
        self.flush_all_pending(tracker, sink).await
    }
}
