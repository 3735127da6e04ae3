//! Handshake and flow-control state machine for the board's line protocol.
//!
//! The engine is plain data: the link worker feeds it inbound lines and
//! clock readings while holding the link lock, and asks it whether the head
//! of the transmit queue may go out.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::printer::{PrinterState, PrinterStatus};
use crate::protocol::queue::{CommandId, TransmitQueue};
use crate::protocol::telemetry::{is_temperature_report, parse_temperature_report};

pub const ACK_PREFIX: &str = "ok";
pub const BUSY_PREFIX: &str = "echo:busy: ";
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How many sent-but-unacknowledged lines the board may hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// One outstanding command at a time.
    #[default]
    Strict,
    /// Up to `depth` outstanding commands.
    Windowed { depth: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Ready,
    WaitingForAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Ack,
    Busy,
    Temperature,
    Position,
    Probe,
    Error,
    Other,
}

pub fn classify(line: &str) -> LineKind {
    if line.starts_with(ACK_PREFIX) {
        LineKind::Ack
    } else if line.starts_with(BUSY_PREFIX) {
        LineKind::Busy
    } else if temperature_payload(line).is_some() {
        LineKind::Temperature
    } else if line.starts_with("X:") {
        LineKind::Position
    } else if line.starts_with("measured") {
        LineKind::Probe
    } else if line.starts_with("Error:") || line.starts_with("!!") {
        LineKind::Error
    } else {
        LineKind::Other
    }
}

/// Report text, allowing the one-character offset some boards emit.
fn temperature_payload(line: &str) -> Option<&str> {
    if is_temperature_report(line) {
        return Some(line);
    }
    line.get(1..).filter(|rest| is_temperature_report(rest))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOutcome {
    pub kind: LineKind,
    /// Command released by this acknowledgement.
    pub confirmed: Option<CommandId>,
    pub status_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    /// Line that will be transmitted again, if one was outstanding.
    pub retry: Option<CommandId>,
}

#[derive(Debug)]
pub struct ProtocolEngine {
    state: PrinterState,
    flow: FlowState,
    policy: FlowControl,
    ack_timeout: Duration,
    state_updated: bool,
    status_request: Option<CommandId>,
    job_active: bool,
}

impl ProtocolEngine {
    pub fn new(policy: FlowControl, ack_timeout: Duration) -> Self {
        Self {
            state: PrinterState::new(),
            flow: FlowState::Ready,
            policy,
            ack_timeout,
            state_updated: false,
            status_request: None,
            job_active: false,
        }
    }

    pub fn state(&self) -> &PrinterState {
        &self.state
    }

    pub fn status(&self) -> PrinterStatus {
        self.state.status
    }

    pub fn flow(&self) -> FlowState {
        self.flow
    }

    pub fn policy(&self) -> FlowControl {
        self.policy
    }

    fn set_flow(&mut self, flow: FlowState) {
        self.flow = flow;
        self.state.locked = flow == FlowState::WaitingForAck;
    }

    /// Status to fall back to once the board talks to us again.
    fn live_status(&self) -> PrinterStatus {
        if self.job_active {
            PrinterStatus::Printing
        } else {
            PrinterStatus::Idle
        }
    }

    /// Classify one inbound line and apply its effect.
    pub fn handle_line(&mut self, line: &str, queue: &mut TransmitQueue, now: Instant) -> LineOutcome {
        self.state.last_line.clear();
        self.state.last_line.push_str(line);

        let kind = classify(line);
        let before = self.state.status;
        let mut confirmed = None;

        match kind {
            LineKind::Ack => {
                self.set_flow(FlowState::Ready);
                match queue.confirm() {
                    Ok(id) => {
                        tracing::trace!("Confirmed {}", id);
                        if self.status_request == Some(id) {
                            self.status_request = None;
                        }
                        confirmed = Some(id);
                    }
                    Err(e) => tracing::debug!("Ignoring acknowledgement: {}", e),
                }
                self.state.last_command_sent_at = (queue.in_flight() > 0).then_some(now);

                let rest = line[ACK_PREFIX.len()..].trim_start();
                if is_temperature_report(rest) {
                    self.apply_report(rest);
                }
                if matches!(
                    self.state.status,
                    PrinterStatus::Unknown | PrinterStatus::Busy | PrinterStatus::Disconnected
                ) {
                    self.state.status = self.live_status();
                }
            }
            LineKind::Busy => {
                tracing::debug!("Board busy: {}", &line[BUSY_PREFIX.len()..]);
                self.set_flow(FlowState::WaitingForAck);
                // The board is alive and working; restart the acknowledgement window.
                self.state.last_command_sent_at = Some(now);
                if self.state.status != PrinterStatus::Printing {
                    self.state.status = PrinterStatus::Busy;
                }
            }
            LineKind::Temperature => {
                if let Some(report) = temperature_payload(line) {
                    self.apply_report(report);
                }
            }
            LineKind::Position => tracing::info!("Got position report {}", line),
            LineKind::Probe => tracing::info!("Got probe report {}", line),
            LineKind::Error => tracing::warn!("Board reported error: {}", line),
            LineKind::Other => tracing::trace!("Unclassified line: {}", line),
        }

        LineOutcome {
            kind,
            confirmed,
            status_changed: before != self.state.status,
        }
    }

    fn apply_report(&mut self, text: &str) {
        match parse_temperature_report(text) {
            Some(report) => {
                self.state.apply_temperatures(&report);
                self.state_updated = true;
            }
            None => tracing::debug!("Temperature report did not parse: {}", text),
        }
    }

    /// May the queue's head-of-line be written now?
    pub fn can_transmit(&self, queue: &TransmitQueue) -> bool {
        if self.flow != FlowState::Ready || queue.pending() == 0 {
            return false;
        }
        match self.policy {
            FlowControl::Strict => queue.in_flight() == 0,
            FlowControl::Windowed { depth } => queue.in_flight() < depth,
        }
    }

    /// Record a successful write. Call after `queue.advance_tail()`.
    pub fn on_sent(&mut self, queue: &TransmitQueue, now: Instant) {
        self.state.last_command_sent_at = Some(now);
        let full = match self.policy {
            FlowControl::Strict => true,
            FlowControl::Windowed { depth } => queue.in_flight() >= depth,
        };
        if full {
            self.set_flow(FlowState::WaitingForAck);
        }
    }

    /// Detect a missing acknowledgement and rewind so the line is sent again.
    ///
    /// Strict mode has one line in flight, so one slot is rewound. In windowed
    /// mode every line after the lost one is also unacknowledged, and the board
    /// only sees them in order if all are resent, so the whole window is rewound.
    pub fn check_timeout(&mut self, queue: &mut TransmitQueue, now: Instant) -> Option<Timeout> {
        let sent_at = self.state.last_command_sent_at?;
        if now.saturating_duration_since(sent_at) <= self.ack_timeout {
            return None;
        }

        let mut retry = None;
        while let Some(id) = queue.rewind() {
            retry = Some(id);
            if self.policy == FlowControl::Strict {
                break;
            }
        }
        tracing::warn!(
            "No acknowledgement within {:?}, marking board disconnected (retry {:?})",
            self.ack_timeout,
            retry
        );
        self.state.status = PrinterStatus::Disconnected;
        self.state.last_command_sent_at = None;
        self.set_flow(FlowState::Ready);
        Some(Timeout { retry })
    }

    pub fn job_active(&self) -> bool {
        self.job_active
    }

    /// Enter or leave printing. Returns the status in effect before the change.
    pub fn begin_job(&mut self) -> PrinterStatus {
        let before = self.state.status;
        self.job_active = true;
        self.state.status = PrinterStatus::Printing;
        before
    }

    pub fn end_job(&mut self, restore: PrinterStatus) {
        self.job_active = false;
        if self.state.status == PrinterStatus::Printing {
            self.state.status = restore;
        }
    }

    /// Consume the "telemetry arrived" flag.
    pub fn take_state_updated(&mut self) -> bool {
        std::mem::take(&mut self.state_updated)
    }

    pub fn status_requested(&self) -> bool {
        self.status_request.is_some()
    }

    pub fn set_status_request(&mut self, request: Option<CommandId>) {
        self.status_request = request;
    }
}
