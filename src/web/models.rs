//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

use crate::printer::StatusSnapshot;

/// Represents the current status of the printer.
#[derive(Debug, Serialize, Deserialize)]
pub struct PrinterStatusResponse {
    pub status: String,
    pub hot_end: f32,
    pub hot_end_target: f32,
    pub bed: f32,
    pub bed_target: f32,
    pub progress: f32,
}

impl From<StatusSnapshot> for PrinterStatusResponse {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self {
            status: snapshot.status.to_string(),
            hot_end: snapshot.hotend_temp,
            hot_end_target: snapshot.hotend_target,
            bed: snapshot.bed_temp,
            bed_target: snapshot.bed_target,
            progress: snapshot.progress,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendQuery {
    pub cmd: String,
}

#[derive(Debug, Deserialize)]
pub struct PrintQuery {
    pub file: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandAccepted {
    pub result: String,
    pub cmd: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
