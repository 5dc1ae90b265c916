//! Realtime wire protocol.
//!
//! Every frame, in both directions, is a single JSON object with a string
//! `type` field acting as the discriminant. Inbound frames are modelled as a
//! sum type ([`InboundMessage`]) keyed by [`MessageTag`]; each payload type
//! implements [`Payload`], which binds it to exactly one tag so handler
//! registration is checked at compile time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a text frame was rejected before routing.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("payload for `{tag}` does not match its schema: {source}")]
    Payload {
        tag: &'static str,
        source: serde_json::Error,
    },
}

/// A frame that passed the envelope check.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Value of the `type` field.
    pub kind: String,
    /// The whole frame, `type` included.
    pub body: serde_json::Value,
}

impl RawFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let body: serde_json::Value = serde_json::from_str(text)?;
        let kind = body
            .as_object()
            .ok_or(FrameError::NotAnObject)?
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(FrameError::MissingType)?
            .to_string();
        Ok(Self { kind, body })
    }

    /// The modelled tag for this frame, if there is one.
    pub fn tag(&self) -> Option<MessageTag> {
        MessageTag::from_tag(&self.kind)
    }
}

/// A payload type bound to a single message tag.
pub trait Payload: DeserializeOwned + Send + 'static {
    const TAG: MessageTag;

    /// Extract this payload from a decoded message of the matching variant.
    fn from_message(message: InboundMessage) -> Option<Self>;
}

macro_rules! inbound_messages {
    ($( $(#[$doc:meta])* $variant:ident($payload:ident) = $tag:literal, )+) => {
        /// Discriminants of every modelled inbound message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageTag {
            $($variant,)+
        }

        impl MessageTag {
            pub const ALL: &'static [MessageTag] = &[$(MessageTag::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(MessageTag::$variant => $tag,)+
                }
            }

            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $($tag => Some(MessageTag::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for MessageTag {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        /// A decoded server-to-client message.
        #[derive(Debug, Clone, PartialEq)]
        pub enum InboundMessage {
            $($(#[$doc])* $variant($payload),)+
        }

        impl InboundMessage {
            pub fn tag(&self) -> MessageTag {
                match self {
                    $(InboundMessage::$variant(_) => MessageTag::$variant,)+
                }
            }

            /// Decode a frame body into the payload for `tag`.
            pub fn decode(tag: MessageTag, body: serde_json::Value) -> Result<Self, FrameError> {
                match tag {
                    $(MessageTag::$variant => serde_json::from_value(body)
                        .map(InboundMessage::$variant)
                        .map_err(|source| FrameError::Payload { tag: $tag, source }),)+
                }
            }
        }

        $(
            impl Payload for $payload {
                const TAG: MessageTag = MessageTag::$variant;

                fn from_message(message: InboundMessage) -> Option<Self> {
                    match message {
                        InboundMessage::$variant(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )+
    };
}

inbound_messages! {
    /// Daemon activity and budget snapshot.
    DaemonStatus(DaemonStatus) = "daemon_status",
    /// Async job progress.
    JobUpdate(JobUpdate) = "job_update",
    /// AI usage totals.
    UsageUpdate(UsageUpdate) = "usage_update",
    /// Streaming LLM output chunk.
    LlmStream(LlmStream) = "llm_stream",
    PulseExecutionStarted(PulseExecutionStarted) = "pulse_execution_started",
    PulseExecutionFailed(PulseExecutionFailed) = "pulse_execution_failed",
    PulseExecutionCompleted(PulseExecutionCompleted) = "pulse_execution_completed",
    PulseExecutionLogStream(PulseExecutionLogStream) = "pulse_execution_log_stream",
    /// An actor/context bucket is approaching its storage limit.
    StorageWarning(StorageWarning) = "storage_warning",
    PluginHealth(PluginHealth) = "plugin_health",
    ImportProgress(ImportProgress) = "import_progress",
    ImportStats(ImportStats) = "import_stats",
    ImportComplete(ImportComplete) = "import_complete",
    WatcherMatch(WatcherMatch) = "watcher_match",
    WatcherError(WatcherError) = "watcher_error",
    GlyphFired(GlyphFired) = "glyph_fired",
    /// Reply to `get_database_stats`.
    DatabaseStats(DatabaseStats) = "database_stats",
    Pong(Pong) = "pong",
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonStatus {
    pub running: bool,
    pub active_jobs: u32,
    pub queued_jobs: u32,
    pub load_percent: f64,
    pub budget_daily: f64,
    pub budget_weekly: f64,
    pub budget_monthly: f64,
    pub budget_daily_limit: f64,
    pub budget_weekly_limit: f64,
    pub budget_monthly_limit: f64,
    pub server_state: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobUpdate {
    pub job: Option<serde_json::Value>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageUpdate {
    pub total_cost: f64,
    pub requests: u64,
    pub success: u64,
    pub tokens: u64,
    pub models: u32,
    pub since: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmStream {
    pub job_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseExecutionStarted {
    pub scheduled_job_id: String,
    pub execution_id: String,
    #[serde(default)]
    pub ats_code: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseExecutionFailed {
    pub scheduled_job_id: String,
    pub execution_id: String,
    #[serde(default)]
    pub ats_code: String,
    pub error_message: String,
    #[serde(default)]
    pub error_details: Vec<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseExecutionCompleted {
    pub scheduled_job_id: String,
    pub execution_id: String,
    #[serde(default)]
    pub ats_code: String,
    #[serde(default)]
    pub async_job_id: String,
    #[serde(default)]
    pub result_summary: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseExecutionLogStream {
    pub scheduled_job_id: String,
    pub execution_id: String,
    pub log_chunk: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageWarning {
    pub actor: String,
    pub context: String,
    pub current: u64,
    pub limit: u64,
    /// Fraction full, 0.0 to 1.0.
    pub fill_percent: f64,
    pub time_until_full: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportProgress {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportStats {
    pub contacts: u64,
    pub attestations: u64,
    pub companies: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportComplete {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatcherMatch {
    pub watcher_id: String,
    #[serde(default)]
    pub attestation: serde_json::Value,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatcherError {
    pub watcher_id: String,
    pub error: String,
    #[serde(default)]
    pub details: Vec<String>,
    /// "error" or "warning".
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlyphFired {
    pub glyph_id: String,
    #[serde(default)]
    pub attestation_id: String,
    /// "started", "success", or "error".
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseStats {
    pub path: String,
    pub total_attestations: u64,
    pub unique_actors: u64,
    pub unique_subjects: u64,
    pub unique_contexts: u64,
    pub storage_backend: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pong {}

/// Daemon control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonAction {
    Start,
    Stop,
}

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    /// Status refresh, sent on every successful open.
    GetDatabaseStats,
    Query {
        query: String,
        #[serde(default)]
        line: u32,
        #[serde(default)]
        cursor: u32,
    },
    DaemonControl {
        action: DaemonAction,
    },
    JobControl {
        action: String,
        job_id: String,
    },
    Visibility {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_type: Option<String>,
        hidden: bool,
    },
    SetVerbosity {
        verbosity: i32,
    },
    SetGraphLimit {
        graph_limit: u32,
    },
}
