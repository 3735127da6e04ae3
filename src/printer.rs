// src/printer.rs - Shared printer state as seen through the board's telemetry
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use crate::protocol::telemetry::TemperatureReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterStatus {
    Unknown,
    Idle,
    Busy,
    Printing,
    Disconnected,
}

impl PrinterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterStatus::Unknown => "Unknown",
            PrinterStatus::Idle => "Idle",
            PrinterStatus::Busy => "Busy",
            PrinterStatus::Printing => "Printing",
            PrinterStatus::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Written only by the protocol engine; everyone else reads snapshots.
#[derive(Debug, Clone)]
pub struct PrinterState {
    pub status: PrinterStatus,
    pub hotend_temp: f32,
    pub hotend_target: f32,
    pub bed_temp: f32,
    pub bed_target: f32,
    /// Set while an acknowledgement is outstanding; blocks the transmitter.
    pub locked: bool,
    pub last_line: String,
    pub last_command_sent_at: Option<Instant>,
}

impl PrinterState {
    pub fn new() -> Self {
        Self {
            status: PrinterStatus::Unknown,
            hotend_temp: 0.0,
            hotend_target: 0.0,
            bed_temp: 0.0,
            bed_target: 0.0,
            locked: false,
            last_line: String::new(),
            last_command_sent_at: None,
        }
    }

    /// Fields missing from the report keep their last known value.
    pub fn apply_temperatures(&mut self, report: &TemperatureReport) {
        if let Some(v) = report.hotend {
            self.hotend_temp = v;
        }
        if let Some(v) = report.hotend_target {
            self.hotend_target = v;
        }
        if let Some(v) = report.bed {
            self.bed_temp = v;
        }
        if let Some(v) = report.bed_target {
            self.bed_target = v;
        }
    }

    pub fn snapshot(&self, progress: f32) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            hotend_temp: self.hotend_temp,
            hotend_target: self.hotend_target,
            bed_temp: self.bed_temp,
            bed_target: self.bed_target,
            progress,
            updated_at: Utc::now(),
        }
    }
}

impl Default for PrinterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: PrinterStatus,
    pub hotend_temp: f32,
    pub hotend_target: f32,
    pub bed_temp: f32,
    pub bed_target: f32,
    pub progress: f32,
    pub updated_at: DateTime<Utc>,
}
