// src/poller.rs - Periodic temperature request
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::board::Board;
use crate::printer::PrinterStatus;
use crate::protocol::engine::ProtocolEngine;
use crate::protocol::queue::{CommandId, TransmitQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Fresh telemetry arrived since the last tick; observers should hear about it.
    Notify,
    Requested(CommandId),
    Skipped,
}

/// One poll tick.
///
/// A report that arrived since the previous tick is published and answers
/// the pending request; nothing is sent. Otherwise a request goes out unless
/// one is still unanswered or the board said it is busy.
pub fn poll_status(engine: &mut ProtocolEngine, queue: &mut TransmitQueue, command: &str) -> PollAction {
    if engine.take_state_updated() {
        engine.set_status_request(None);
        return PollAction::Notify;
    }
    if engine.status_requested() || engine.status() == PrinterStatus::Busy {
        return PollAction::Skipped;
    }
    match queue.enqueue(command) {
        Ok(id) => {
            engine.set_status_request(Some(id));
            PollAction::Requested(id)
        }
        Err(e) => {
            tracing::debug!("Status request not queued: {}", e);
            PollAction::Skipped
        }
    }
}

pub(crate) async fn run_poller(board: Arc<Board>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("Status poller shutting down");
                break;
            }
            _ = ticker.tick() => {
                let action = {
                    let mut link = board.link.lock().await;
                    let crate::board::Link { queue, engine } = &mut *link;
                    poll_status(engine, queue, board.status_command())
                };
                match action {
                    PollAction::Notify => board.publish_status().await,
                    PollAction::Requested(id) => tracing::trace!("Requested temperatures as {}", id),
                    PollAction::Skipped => {}
                }
            }
        }
    }
}
