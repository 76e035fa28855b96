//! Minimal hand-written mirror of BuildKit's `control.proto` `StatusResponse` family.
//!
//! BuildKit's own schema pulls in gogo-proto extensions, worker/policy types, and a
//! handful of other services this crate has no business depending on. We only ever
//! read four message shapes off an already-decoded byte slice, so rather than vendor
//! and compile the upstream `.proto` graph we declare those four messages directly
//! with `prost::Message`. Field numbers match `moby/buildkit/api/services/control/control.proto`.

use prost::Message;
use prost_types::Timestamp;

#[derive(Clone, PartialEq, Eq, Message)]
pub struct ProgressGroup {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(bool, tag = "3")]
    pub weak: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Vertex {
    #[prost(string, tag = "1")]
    pub digest: String,
    #[prost(string, repeated, tag = "2")]
    pub inputs: Vec<String>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(bool, tag = "4")]
    pub cached: bool,
    #[prost(message, optional, tag = "5")]
    pub started: Option<Timestamp>,
    #[prost(message, optional, tag = "6")]
    pub completed: Option<Timestamp>,
    #[prost(string, tag = "7")]
    pub error: String,
    #[prost(message, optional, tag = "8")]
    pub progress_group: Option<ProgressGroup>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VertexStatus {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub vertex: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(int64, tag = "4")]
    pub current: i64,
    #[prost(int64, tag = "5")]
    pub total: i64,
    #[prost(message, optional, tag = "6")]
    pub timestamp: Option<Timestamp>,
    #[prost(message, optional, tag = "7")]
    pub started: Option<Timestamp>,
    #[prost(message, optional, tag = "8")]
    pub completed: Option<Timestamp>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VertexLog {
    #[prost(string, tag = "1")]
    pub vertex: String,
    #[prost(message, optional, tag = "2")]
    pub timestamp: Option<Timestamp>,
    #[prost(int64, tag = "3")]
    pub stream: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub msg: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VertexWarning {
    #[prost(string, tag = "1")]
    pub vertex: String,
    #[prost(bytes = "vec", tag = "3")]
    pub short: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub detail: Vec<u8>,
    #[prost(string, tag = "5")]
    pub url: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct StatusResponse {
    #[prost(message, repeated, tag = "1")]
    pub vertexes: Vec<Vertex>,
    #[prost(message, repeated, tag = "2")]
    pub statuses: Vec<VertexStatus>,
    #[prost(message, repeated, tag = "3")]
    pub logs: Vec<VertexLog>,
    #[prost(message, repeated, tag = "4")]
    pub warnings: Vec<VertexWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_round_trips_through_prost() {
        let resp = StatusResponse {
            vertexes: vec![Vertex {
                digest: "sha256:abc".into(),
                inputs: vec!["sha256:parent".into()],
                name: "[internal] load metadata".into(),
                cached: false,
                started: Some(Timestamp {
                    seconds: 10,
                    nanos: 0,
                }),
                completed: None,
                error: String::new(),
                progress_group: None,
            }],
            statuses: vec![],
            logs: vec![],
            warnings: vec![],
        };

        let mut buf = Vec::new();
        resp.encode(&mut buf).unwrap();
        let decoded = StatusResponse::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded, resp);
    }
}
