//! Wire protocol: one JSON object per frame, discriminated by its `event` field.
//!
//! Inbound frames are parsed into an untyped tree once, branched on the
//! discriminant, then extracted into the matching typed payload. Anything that
//! fails along the way comes back as a [`DecodeError`] for the caller to log
//! and drop; nothing here closes the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `event` field")]
    MissingEvent,
    #[error("unrecognized event `{0}`")]
    Unrecognized(String),
    #[error("`{event}` frame dropped: {source}")]
    Payload {
        event: &'static str,
        source: serde_json::Error,
    },
    #[error("`{0}` frame `data` is not an object")]
    BadData(&'static str),
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemStats {
    pub cpu: f32,
    pub ram: f32,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceUpdate {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub battery: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectUpdate {
    pub name: String,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogLine {
    pub message: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileList {
    pub path: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchComplete {
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioWaveform {
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoiceTranscription {
    pub text: String,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

/// Unified record for the two command-result wire names.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub kind: String,
    pub payload: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One recognized inbound frame shape, keyed by its `event` discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    DeviceUpdate(DeviceUpdate),
    ProjectUpdate(ProjectUpdate),
    SystemStats(SystemStats),
    LogLine(LogLine),
    FileList(FileList),
    BatchComplete(BatchComplete),
    AudioWaveform(AudioWaveform),
    VoiceTranscription(VoiceTranscription),
    CommandResult(CommandResult),
}

impl InboundEvent {
    /// Canonical wire name of this variant (aliases collapse to one name).
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::DeviceUpdate(_) => "device_update",
            InboundEvent::ProjectUpdate(_) => "project_update",
            InboundEvent::SystemStats(_) => "system_stats",
            InboundEvent::LogLine(_) => "log_line",
            InboundEvent::FileList(_) => "file_list",
            InboundEvent::BatchComplete(_) => "batch_complete",
            InboundEvent::AudioWaveform(_) => "audio_waveform",
            InboundEvent::VoiceTranscription(_) => "voice_transcription",
            InboundEvent::CommandResult(_) => "command_result",
        }
    }
}

/// Decode one textual frame.
pub fn decode_frame(text: &str) -> Result<InboundEvent, DecodeError> {
    let root: Value = serde_json::from_str(text)?;
    let Some(obj) = root.as_object() else {
        return Err(DecodeError::NotAnObject);
    };
    let Some(event) = obj.get("event").and_then(Value::as_str) else {
        return Err(DecodeError::MissingEvent);
    };
    match event {
        "device_update" => Ok(InboundEvent::DeviceUpdate(from_data("device_update", obj)?)),
        "project_update" => {
            let mut update: ProjectUpdate = from_data("project_update", obj)?;
            update.progress = update.progress.clamp(0.0, 100.0);
            Ok(InboundEvent::ProjectUpdate(update))
        }
        "system_stats" => Ok(InboundEvent::SystemStats(from_data("system_stats", obj)?)),
        // These two carry their fields as siblings of `event`, not under `data`.
        "log_line" => Ok(InboundEvent::LogLine(from_root("log_line", &root)?)),
        "file_list" => Ok(InboundEvent::FileList(from_root("file_list", &root)?)),
        "batch_complete" => Ok(InboundEvent::BatchComplete(from_data("batch_complete", obj)?)),
        "audio_waveform" => Ok(InboundEvent::AudioWaveform(from_data("audio_waveform", obj)?)),
        "voice_transcription" => Ok(InboundEvent::VoiceTranscription(from_data(
            "voice_transcription",
            obj,
        )?)),
        // Historical alias: both names carry the same result payload.
        "command_result" | "command_response" => {
            Ok(InboundEvent::CommandResult(command_result(obj)))
        }
        other => Err(DecodeError::Unrecognized(other.to_string())),
    }
}

/// Decode a binary frame by first re-reading it as UTF-8 text.
pub fn decode_binary(bytes: &[u8]) -> Result<InboundEvent, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    decode_frame(text)
}

fn from_data<T: serde::de::DeserializeOwned>(
    event: &'static str,
    obj: &serde_json::Map<String, Value>,
) -> Result<T, DecodeError> {
    let data = match obj.get("data") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(_) => return Err(DecodeError::BadData(event)),
        None => Value::Object(serde_json::Map::new()),
    };
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { event, source })
}

fn from_root<T: serde::de::DeserializeOwned>(
    event: &'static str,
    root: &Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(root.clone()).map_err(|source| DecodeError::Payload { event, source })
}

fn command_result(obj: &serde_json::Map<String, Value>) -> CommandResult {
    let data = obj
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let kind = data
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("result")
        .to_string();
    let timestamp = data
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    CommandResult {
        kind,
        payload: Value::Object(data),
        timestamp,
    }
}

/// A named action plus an opaque payload mapping, serialized to the same
/// `{event, data}` envelope as inbound frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl OutboundCommand {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Serialize to one wire frame.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("serialize command")
    }
}
