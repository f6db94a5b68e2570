//! Small utilities to manage bounded history buffers kept by consumers.

use std::collections::VecDeque;

use crate::state::TelemetrySnapshot;

/// Consumer-side history capacity: recent values kept, oldest evicted first.
pub const SNAPSHOT_HISTORY: usize = 100;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if dq.len() == cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Rolling cpu/ram gauges with a fixed capacity (values 0..=100).
pub struct GaugeHistory {
    cpu: VecDeque<u16>,
    ram: VecDeque<u16>,
    cap: usize,
}

impl GaugeHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cpu: VecDeque::with_capacity(cap),
            ram: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Record one snapshot's gauges.
    pub fn record(&mut self, snapshot: &TelemetrySnapshot) {
        push_capped(&mut self.cpu, snapshot.cpu.round() as u16, self.cap);
        push_capped(&mut self.ram, snapshot.ram.round() as u16, self.cap);
    }

    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }

    pub fn latest(&self) -> Option<(u16, u16)> {
        match (self.cpu.back(), self.ram.back()) {
            (Some(c), Some(r)) => Some((*c, *r)),
            _ => None,
        }
    }

    /// Mean CPU load across the window.
    pub fn cpu_mean(&self) -> f32 {
        if self.cpu.is_empty() {
            return 0.0;
        }
        self.cpu.iter().map(|v| f32::from(*v)).sum::<f32>() / self.cpu.len() as f32
    }
}
