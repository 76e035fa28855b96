//! Top-level orchestrator: drives the read loop, dispatches each line to the
//! transcript writer and progress aggregator, and surfaces structured events.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::envelope::{classify_line, ClassifiedLine};
use crate::error::Result;
use crate::events::BuildEvent;
use crate::progress::ProgressAggregator;
use crate::proto::StatusResponse;
use crate::transcript::TranscriptWriter;
use crate::vertex::VertexTracker;

/// Decodes a BuildKit-enabled `docker build` response stream, writing a
/// human-readable transcript to `sink` and delivering structured
/// [`BuildEvent`]s through the supplied callback as it goes.
///
/// One decoder is good for exactly one build: state accumulates across
/// calls to [`Self::decode`] is not meaningful to reuse afterwards.
pub struct BuildResponseDecoder<F> {
    tracker: VertexTracker,
    transcript: TranscriptWriter,
    progress: ProgressAggregator,
    on_event: F,
}

impl<F: FnMut(BuildEvent)> BuildResponseDecoder<F> {
    pub fn new(on_event: F) -> Self {
        Self {
            tracker: VertexTracker::new(),
            transcript: TranscriptWriter::new(),
            progress: ProgressAggregator::new(),
            on_event,
        }
    }

    /// Consume `input` line by line until EOF, writing the transcript to
    /// `sink` and flushing it once the stream ends.
    pub async fn decode<R, W>(&mut self, input: R, mut sink: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            self.process_line(&line, &mut sink).await?;
        }

        self.transcript.flush_end_of_stream(&self.tracker, &mut sink).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn process_line<W: AsyncWrite + Unpin>(&mut self, line: &str, sink: &mut W) -> Result<()> {
        match classify_line(line)? {
            ClassifiedLine::Error(message) => {
                warn!(%message, "daemon reported a build failure");
                (self.on_event)(BuildEvent::BuildError { message });
            }
            ClassifiedLine::ImageId(image_id) => {
                debug!(%image_id, "build completed");
                (self.on_event)(BuildEvent::BuildComplete { image_id });
            }
            ClassifiedLine::Trace(response) => {
                self.process_status_response(response, sink).await?;
            }
            ClassifiedLine::Ignored => {}
        }
        Ok(())
    }

    async fn process_status_response<W: AsyncWrite + Unpin>(
        &mut self,
        response: StatusResponse,
        sink: &mut W,
    ) -> Result<()> {
        let mut remaining_logs: Vec<_> = response.logs.iter().collect();
        let mut remaining_statuses: Vec<_> = response.statuses.iter().collect();

        for vertex in &response.vertexes {
            self.progress
                .note_vertex_lifecycle(&vertex.digest, vertex.started.is_some(), vertex.completed.is_some());

            self.transcript
                .on_vertex_started(&mut self.tracker, vertex, sink)
                .await?;

            let (this_vertex_logs, rest): (Vec<_>, Vec<_>) =
                remaining_logs.into_iter().partition(|l| l.vertex == vertex.digest);
            remaining_logs = rest;
            for log in this_vertex_logs {
                self.transcript.on_log(&self.tracker, log, sink).await?;
            }

            let (this_vertex_completed, rest): (Vec<_>, Vec<_>) = remaining_statuses
                .into_iter()
                .partition(|s| s.vertex == vertex.digest && s.completed.is_some());
            remaining_statuses = rest;
            for status in this_vertex_completed {
                self.transcript.on_status(&mut self.tracker, status, sink).await?;
            }

            self.transcript
                .on_vertex_completed(&mut self.tracker, vertex, sink)
                .await?;
        }

        for log in remaining_logs {
            self.transcript.on_log(&self.tracker, log, sink).await?;
        }
        for status in remaining_statuses {
            self.transcript.on_status(&mut self.tracker, status, sink).await?;
        }

        if let Some(event) = self.progress.snapshot(&self.tracker) {
            (self.on_event)(event);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use prost::Message;
    use prost_types::Timestamp;

    use crate::proto::Vertex;

    fn trace_line(response: &StatusResponse) -> String {
        let mut buf = Vec::new();
        response.encode(&mut buf).unwrap();
        format!(r#"{{"id":"moby.buildkit.trace","aux":"{}"}}"#, STANDARD.encode(&buf))
    }

    #[tokio::test]
    async fn full_stream_produces_transcript_and_events() {
        let start = StatusResponse {
            vertexes: vec![Vertex {
                digest: "a".into(),
                inputs: vec![],
                name: "[internal] load metadata for docker.io/library/alpine:3.12".into(),
                cached: true,
                started: Some(Timestamp::default()),
                completed: None,
                error: String::new(),
                progress_group: None,
            }],
            statuses: vec![],
            logs: vec![],
            warnings: vec![],
        };
        let done = StatusResponse {
            vertexes: vec![Vertex {
                digest: "a".into(),
                inputs: vec![],
                name: "[internal] load metadata for docker.io/library/alpine:3.12".into(),
                cached: true,
                started: None,
                completed: Some(Timestamp::default()),
                error: String::new(),
                progress_group: None,
            }],
            statuses: vec![],
            logs: vec![],
            warnings: vec![],
        };

        let input = format!(
            "{}\n{}\n{{\"id\":\"moby.image.id\",\"aux\":{{\"ID\":\"sha256:final\"}}}}\n",
            trace_line(&start),
            trace_line(&done)
        );

        let mut events = Vec::new();
        let mut decoder = BuildResponseDecoder::new(|event| events.push(event));
        let mut sink: Vec<u8> = Vec::new();
        decoder
            .decode(input.as_bytes(), &mut sink)
            .await
            .unwrap();

        let transcript = String::from_utf8(sink).unwrap();
        assert!(transcript.contains("#1 [internal] load metadata for docker.io/library/alpine:3.12"));
        assert!(transcript.contains("#1 CACHED"));

        assert!(matches!(events.last(), Some(BuildEvent::BuildComplete { image_id }) if image_id == "sha256:final"));
    }

    #[tokio::test]
    async fn error_envelope_is_surfaced_without_halting_decode() {
        let input = "{\"error\":\"executor failed running [/bin/sh -c false]\"}\n";
        let mut events = Vec::new();
        let mut decoder = BuildResponseDecoder::new(|event| events.push(event));
        let mut sink: Vec<u8> = Vec::new();
        decoder.decode(input.as_bytes(), &mut sink).await.unwrap();

        assert!(matches!(
            events.first(),
            Some(BuildEvent::BuildError { message }) if message == "executor failed running [/bin/sh -c false]"
        ));
    }

    #[tokio::test]
    async fn malformed_line_halts_decoding_with_an_error() {
        let input = "not json\n";
        let mut decoder = BuildResponseDecoder::new(|_| {});
        let mut sink: Vec<u8> = Vec::new();
        assert!(decoder.decode(input.as_bytes(), &mut sink).await.is_err());
    }
}
