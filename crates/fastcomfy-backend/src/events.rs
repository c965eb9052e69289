//! Backend event stream decoding.
//!
//! Every text frame is a `{type, data}` envelope. [`decode_frame`] turns it
//! into a [`BackendEvent`] through one type-to-payload table
//! ([`BackendEvent::from_envelope`]); unknown types become
//! [`BackendEvent::Unrecognized`] instead of failing the session.
//!
//! Connection lifecycle pseudo-events are produced by the session itself and
//! travel through the same queue as backend events.

use std::collections::BTreeMap;

use fastcomfy_core::{OutputDescriptor, PromptId};
use serde::Deserialize;
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Sampling progress of one node.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProgressData {
    /// Current step.
    pub value: u64,
    /// Total steps.
    pub max: u64,
    /// Node id.
    pub node: Option<String>,
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
}

/// A node started executing. `node` is `None` when the job is done.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutingData {
    /// Node id.
    pub node: Option<String>,
    /// Display node id.
    pub display_node: Option<String>,
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
}

/// Nodes served from the backend's cache.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionCachedData {
    /// Cached node ids.
    pub nodes: Vec<String>,
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
    /// Backend timestamp, milliseconds.
    pub timestamp: Option<i64>,
}

/// Execution start or success marker.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionData {
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
    /// Backend timestamp, milliseconds.
    pub timestamp: Option<i64>,
}

/// Execution failed on a node.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionErrorData {
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
    /// Failing node id.
    pub node_id: Option<String>,
    /// Failing node type.
    pub node_type: Option<String>,
    /// Exception type name.
    pub exception_type: Option<String>,
    /// Exception message.
    pub exception_message: Option<String>,
}

/// Execution was interrupted.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionInterruptedData {
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
    /// Node that was running.
    pub node_id: Option<String>,
    /// Type of that node.
    pub node_type: Option<String>,
}

/// Queue status broadcast.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusData {
    /// Session id assigned by the backend.
    pub sid: Option<String>,
    /// Queue state.
    pub status: QueueStatus,
}

/// Queue state inside a status broadcast.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    /// Execution info.
    pub exec_info: ExecInfo,
}

/// Execution info with the queue depth.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecInfo {
    /// Jobs waiting or running.
    pub queue_remaining: u64,
}

impl StatusData {
    /// Reported queue depth.
    pub fn queue_remaining(&self) -> u64 {
        self.status.exec_info.queue_remaining
    }
}

/// Resource monitor sample.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorData {
    /// CPU utilization, percent.
    pub cpu_utilization: f64,
    /// RAM in use, bytes.
    pub ram_used: u64,
    /// Total RAM, bytes.
    pub ram_total: u64,
    /// RAM utilization, percent.
    pub ram_used_percent: f64,
    /// Per-GPU statistics.
    pub gpus: Vec<GpuStats>,
}

/// Statistics of one GPU.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GpuStats {
    /// Temperature, degrees Celsius.
    pub gpu_temperature: f64,
    /// VRAM in use, bytes.
    pub vram_used: u64,
    /// Total VRAM, bytes.
    pub vram_total: u64,
    /// VRAM utilization, percent.
    pub vram_used_percent: f64,
}

/// A node finished and produced outputs.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutedData {
    /// Node id.
    pub node: Option<String>,
    /// Display node id.
    pub display_node: Option<String>,
    /// Produced files, by category.
    pub output: ExecutedOutput,
    /// Correlation id.
    pub prompt_id: PromptId,
}

/// Files produced by a node, grouped by media category.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutedOutput {
    /// Images.
    pub images: Vec<OutputFile>,
    /// Audio files.
    #[serde(alias = "audio")]
    pub audios: Vec<OutputFile>,
    /// Videos.
    pub videos: Vec<OutputFile>,
}

/// One produced file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputFile {
    /// File name.
    pub filename: String,
    /// Subfolder.
    pub subfolder: String,
    /// Folder type (`output`, `temp`).
    #[serde(rename = "type")]
    pub kind: String,
}

impl ExecutedData {
    /// Output descriptors: images, then audio, then video, each in payload order.
    pub fn output_descriptors(&self) -> Vec<OutputDescriptor> {
        self.output
            .images
            .iter()
            .chain(&self.output.audios)
            .chain(&self.output.videos)
            .map(|file| OutputDescriptor::new(file.filename.clone(), file.subfolder.clone()))
            .collect()
    }
}

/// Per-node progress snapshot.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProgressStateData {
    /// Correlation id.
    pub prompt_id: Option<PromptId>,
    /// Node id to progress.
    pub nodes: BTreeMap<String, NodeProgress>,
}

/// Progress of one node within a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeProgress {
    /// Current step.
    pub value: u64,
    /// Total steps.
    pub max: u64,
    /// `pending`, `running`, `finished`.
    pub state: String,
}

/// Widget feedback from a custom node.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedbackData {
    /// Node id.
    pub node_id: String,
    /// Widget name.
    pub widget_name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub kind: String,
    /// New widget value.
    pub value: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// BackendEvent
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded stream event or a connection lifecycle pseudo-event.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    /// `progress`
    Progress(ProgressData),
    /// `executing`
    Executing(ExecutingData),
    /// `execution_cached`
    ExecutionCached(ExecutionCachedData),
    /// `execution_start`
    ExecutionStart(ExecutionData),
    /// `execution_success`
    ExecutionSuccess(ExecutionData),
    /// `execution_error`
    ExecutionError(ExecutionErrorData),
    /// `execution_interrupted`
    ExecutionInterrupted(ExecutionInterruptedData),
    /// `executed`: a node finished with outputs.
    Executed(ExecutedData),
    /// `status`: queue depth broadcast.
    Status(StatusData),
    /// `crystools.monitor`: resource sample.
    Monitor(MonitorData),
    /// `progress_state`
    ProgressState(ProgressStateData),
    /// `impact-node-feedback`
    Feedback(FeedbackData),

    /// The stream is (re)connected.
    Connected,
    /// A connection was lost and a new attempt is scheduled.
    ReconnectAttempt {
        /// 1-based attempt number.
        attempt: u32,
        /// Why the previous connection ended.
        error: String,
    },
    /// The retry budget is spent; the session is permanently failed.
    ReconnectFailed {
        /// Last connection error.
        error: String,
    },
    /// Opening the stream failed.
    ConnectionError {
        /// Failure detail.
        message: String,
    },
    /// Reading from an open stream failed.
    ReadError {
        /// Failure detail.
        message: String,
    },
    /// A frame could not be decoded; the frame was dropped.
    ParseError {
        /// Failure detail.
        message: String,
    },

    /// A well-formed frame of a type this gateway does not know.
    Unrecognized {
        /// The frame's `type`.
        kind: String,
        /// The frame's raw `data`.
        data: Value,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl BackendEvent {
    /// Decode a payload by its type tag.
    pub fn from_envelope(kind: &str, data: Value) -> Result<Self, serde_json::Error> {
        use serde_json::from_value as p;
        Ok(match kind {
            "progress" => Self::Progress(p(data)?),
            "executing" => Self::Executing(p(data)?),
            "execution_cached" => Self::ExecutionCached(p(data)?),
            "execution_start" => Self::ExecutionStart(p(data)?),
            "execution_success" => Self::ExecutionSuccess(p(data)?),
            "execution_error" => Self::ExecutionError(p(data)?),
            "execution_interrupted" => Self::ExecutionInterrupted(p(data)?),
            "executed" => Self::Executed(p(data)?),
            "status" => Self::Status(p(data)?),
            "crystools.monitor" => Self::Monitor(p(data)?),
            "progress_state" => Self::ProgressState(p(data)?),
            "impact-node-feedback" => Self::Feedback(p(data)?),
            _ => Self::Unrecognized {
                kind: kind.to_owned(),
                data,
            },
        })
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::Progress(_) => "progress",
            Self::Executing(_) => "executing",
            Self::ExecutionCached(_) => "execution_cached",
            Self::ExecutionStart(_) => "execution_start",
            Self::ExecutionSuccess(_) => "execution_success",
            Self::ExecutionError(_) => "execution_error",
            Self::ExecutionInterrupted(_) => "execution_interrupted",
            Self::Executed(_) => "executed",
            Self::Status(_) => "status",
            Self::Monitor(_) => "crystools.monitor",
            Self::ProgressState(_) => "progress_state",
            Self::Feedback(_) => "impact-node-feedback",
            Self::Connected => "ws_connected",
            Self::ReconnectAttempt { .. } => "ws_reconnect_attempt",
            Self::ReconnectFailed { .. } => "ws_reconnect_failed",
            Self::ConnectionError { .. } => "ws_connection_error",
            Self::ReadError { .. } => "ws_read_error",
            Self::ParseError { .. } => "ws_parse_error",
            Self::Unrecognized { kind, .. } => kind,
        }
    }

    /// Whether this is a session lifecycle pseudo-event.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Connected
                | Self::ReconnectAttempt { .. }
                | Self::ReconnectFailed { .. }
                | Self::ConnectionError { .. }
                | Self::ReadError { .. }
                | Self::ParseError { .. }
        )
    }
}

/// Decode one text frame. Frames that fail to decode become
/// [`BackendEvent::ParseError`].
pub fn decode_frame(text: &str) -> BackendEvent {
    let decoded = serde_json::from_str::<Envelope>(text)
        .and_then(|env| BackendEvent::from_envelope(&env.kind, env.data));
    match decoded {
        Ok(event) => event,
        Err(e) => BackendEvent::ParseError {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn frame(kind: &str, data: Value) -> String {
        json!({"type": kind, "data": data}).to_string()
    }

    #[test]
    fn decodes_executed_with_all_categories() {
        let text = frame(
            "executed",
            json!({
                "node": "9",
                "display_node": "9",
                "output": {
                    "videos": [{"filename": "v.mp4", "subfolder": "", "type": "output"}],
                    "images": [
                        {"filename": "a.png", "subfolder": "x", "type": "output"},
                        {"filename": "b.png", "subfolder": "", "type": "output"}
                    ],
                    "audio": [{"filename": "s.flac", "subfolder": "", "type": "output"}]
                },
                "prompt_id": "p-1"
            }),
        );
        let event = decode_frame(&text);
        let BackendEvent::Executed(data) = event else {
            panic!("expected executed, got {event:?}");
        };
        assert_eq!(data.prompt_id.as_str(), "p-1");
        let names: Vec<_> = data
            .output_descriptors()
            .into_iter()
            .map(|d| d.filename)
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "s.flac", "v.mp4"]);
    }

    #[test]
    fn decodes_status_queue_depth() {
        let text = frame(
            "status",
            json!({"status": {"exec_info": {"queue_remaining": 4}}, "sid": "abc"}),
        );
        assert_matches!(decode_frame(&text), BackendEvent::Status(s) if s.queue_remaining() == 4);
    }

    #[test]
    fn decodes_monitor_with_integer_temperature() {
        let text = frame(
            "crystools.monitor",
            json!({
                "cpu_utilization": 12.5,
                "ram_used_percent": 40.0,
                "gpus": [{"gpu_temperature": 65, "vram_used_percent": 99.1}]
            }),
        );
        let BackendEvent::Monitor(data) = decode_frame(&text) else {
            panic!("expected monitor");
        };
        assert_eq!(data.gpus.len(), 1);
        assert!((data.gpus[0].gpu_temperature - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn executing_with_null_node_marks_job_end() {
        let text = frame("executing", json!({"node": null, "prompt_id": "p-2"}));
        assert_matches!(decode_frame(&text), BackendEvent::Executing(d) if d.node.is_none());
    }

    #[test]
    fn unknown_type_is_kept_not_failed() {
        let text = frame("custom.thing", json!({"x": 1}));
        let event = decode_frame(&text);
        assert_eq!(event.kind(), "custom.thing");
        assert_matches!(event, BackendEvent::Unrecognized { data, .. } if data["x"] == 1);
    }

    #[test]
    fn garbage_becomes_parse_error() {
        assert_matches!(decode_frame("not json"), BackendEvent::ParseError { .. });
        // known type, wrong payload shape
        let text = frame("progress", json!({"value": "half"}));
        assert_matches!(decode_frame(&text), BackendEvent::ParseError { .. });
    }

    #[test]
    fn lifecycle_classification() {
        assert!(BackendEvent::Connected.is_lifecycle());
        assert!(!BackendEvent::Status(StatusData::default()).is_lifecycle());
        assert_eq!(
            BackendEvent::ReconnectFailed {
                error: String::new()
            }
            .kind(),
            "ws_reconnect_failed"
        );
    }
}
