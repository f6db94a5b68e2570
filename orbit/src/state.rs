//! Connection lifecycle and the latest decoded state per event category.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::history::push_capped;
use crate::protocol::{DeviceUpdate, FileList, InboundEvent, LogLine, ProjectUpdate, SystemStats};

/// Lifecycle of the single underlying channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Most recent telemetry values, replaced wholesale on every `system_stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    /// CPU load, 0..=100.
    pub cpu: f32,
    /// Memory load, 0..=100.
    pub ram: f32,
    pub network: String,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub fn from_stats(stats: &SystemStats) -> Self {
        Self {
            cpu: stats.cpu.clamp(0.0, 100.0),
            ram: stats.ram.clamp(0.0, 100.0),
            network: stats
                .network
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            timestamp: stats.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Entries kept in the log ring before the oldest is evicted.
pub const LOG_CAPACITY: usize = 100;

/// Latest decoded state per event category. Transient variants (waveforms,
/// transcriptions, batch and command results) pass through to observers
/// without being cached.
#[derive(Debug)]
pub struct StateCache {
    snapshot: Option<TelemetrySnapshot>,
    logs: VecDeque<LogLine>,
    devices: BTreeMap<String, DeviceUpdate>,
    projects: BTreeMap<String, ProjectUpdate>,
    files: Option<FileList>,
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            snapshot: None,
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            devices: BTreeMap::new(),
            projects: BTreeMap::new(),
            files: None,
        }
    }

    pub fn apply(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::SystemStats(s) => self.snapshot = Some(TelemetrySnapshot::from_stats(s)),
            InboundEvent::LogLine(l) => push_capped(&mut self.logs, l.clone(), LOG_CAPACITY),
            InboundEvent::DeviceUpdate(d) => {
                self.devices.insert(d.id.clone(), d.clone());
            }
            InboundEvent::ProjectUpdate(p) => {
                self.projects.insert(p.name.clone(), p.clone());
            }
            InboundEvent::FileList(f) => self.files = Some(f.clone()),
            InboundEvent::BatchComplete(_)
            | InboundEvent::AudioWaveform(_)
            | InboundEvent::VoiceTranscription(_)
            | InboundEvent::CommandResult(_) => {}
        }
    }

    pub fn snapshot(&self) -> Option<&TelemetrySnapshot> {
        self.snapshot.as_ref()
    }

    /// Log ring contents, oldest first.
    pub fn logs(&self) -> impl Iterator<Item = &LogLine> {
        self.logs.iter()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceUpdate> {
        self.devices.values()
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectUpdate> {
        self.projects.values()
    }

    pub fn file_listing(&self) -> Option<&FileList> {
        self.files.as_ref()
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;

    fn apply_frame(cache: &mut StateCache, frame: &str) {
        cache.apply(&decode_frame(frame).unwrap());
    }

    #[test]
    fn snapshot_is_replaced_wholesale() {
        let mut cache = StateCache::new();
        apply_frame(
            &mut cache,
            r#"{"event":"system_stats","data":{"cpu":10.0,"ram":20.0,"network":"online"}}"#,
        );
        apply_frame(
            &mut cache,
            r#"{"event":"system_stats","data":{"cpu":30.0,"ram":40.0}}"#,
        );
        let snap = cache.snapshot().unwrap();
        assert_eq!(snap.cpu, 30.0);
        assert_eq!(snap.ram, 40.0);
        // Second frame carried no label; the old one must not leak through.
        assert_eq!(snap.network, "unknown");
    }

    #[test]
    fn snapshot_gauges_are_clamped() {
        let mut cache = StateCache::new();
        apply_frame(
            &mut cache,
            r#"{"event":"system_stats","data":{"cpu":150.0,"ram":-5.0}}"#,
        );
        let snap = cache.snapshot().unwrap();
        assert_eq!(snap.cpu, 100.0);
        assert_eq!(snap.ram, 0.0);
    }

    #[test]
    fn log_ring_evicts_oldest_and_preserves_order() {
        let mut cache = StateCache::new();
        for i in 0..=LOG_CAPACITY {
            apply_frame(
                &mut cache,
                &format!(r#"{{"event":"log_line","message":"line {i}"}}"#),
            );
        }
        let logs: Vec<_> = cache.logs().collect();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs[0].message, "line 1");
        assert_eq!(logs[LOG_CAPACITY - 1].message, format!("line {LOG_CAPACITY}"));
    }

    #[test]
    fn devices_and_projects_cache_latest_per_key() {
        let mut cache = StateCache::new();
        apply_frame(
            &mut cache,
            r#"{"event":"device_update","data":{"id":"mac","status":"online"}}"#,
        );
        apply_frame(
            &mut cache,
            r#"{"event":"device_update","data":{"id":"mac","status":"offline"}}"#,
        );
        apply_frame(
            &mut cache,
            r#"{"event":"device_update","data":{"id":"pi","status":"online"}}"#,
        );
        let devices: Vec<_> = cache.devices().collect();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].status.as_deref(), Some("offline"));

        apply_frame(
            &mut cache,
            r#"{"event":"project_update","data":{"name":"empire","progress":40.0}}"#,
        );
        apply_frame(
            &mut cache,
            r#"{"event":"project_update","data":{"name":"empire","progress":60.0}}"#,
        );
        let projects: Vec<_> = cache.projects().collect();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].progress, 60.0);
    }

    #[test]
    fn transient_events_are_not_cached() {
        let mut cache = StateCache::new();
        apply_frame(
            &mut cache,
            r#"{"event":"voice_transcription","data":{"text":"hello"}}"#,
        );
        apply_frame(
            &mut cache,
            r#"{"event":"audio_waveform","data":{"samples":[0.1,0.2]}}"#,
        );
        assert!(cache.snapshot().is_none());
        assert_eq!(cache.logs().count(), 0);
        assert!(cache.file_listing().is_none());
    }
}
