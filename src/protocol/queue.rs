//! Fixed-capacity ring buffer of outbound command lines.
//!
//! Three cursors walk the ring in the same direction:
//!
//! ```text
//!   confirmed ──► tail ──► head
//!   (acked)      (sent)   (next free slot)
//! ```
//!
//! Slots between `confirmed` and `tail` were written to the wire but not yet
//! acknowledged, slots between `tail` and `head` wait for transmission. One
//! slot always stays free so `head == confirmed` unambiguously means empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest command line accepted, line terminator included.
pub const MAX_LINE_LEN: usize = 64;

/// Ring size used by the board firmware this bridge was calibrated against.
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("transmit queue is full")]
    Full,
    #[error("command is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("command is empty")]
    Empty,
    #[error("command contains an embedded line break")]
    EmbeddedNewline,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("acknowledgement without an unconfirmed command")]
    NothingInFlight,
}

/// Monotonic identifier handed out by [`TransmitQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A normalized command line stored inline, always ending in a single `\n`.
#[derive(Clone, Copy)]
pub struct Command {
    id: CommandId,
    len: u8,
    bytes: [u8; MAX_LINE_LEN],
}

impl Command {
    fn new(id: CommandId, body: &str) -> Self {
        let mut bytes = [0u8; MAX_LINE_LEN];
        bytes[..body.len()].copy_from_slice(body.as_bytes());
        bytes[body.len()] = b'\n';
        Self {
            id,
            len: (body.len() + 1) as u8,
            bytes,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wire bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Line text without the terminator.
    pub fn text(&self) -> &str {
        let body = &self.bytes[..self.len as usize - 1];
        // Built from a `&str` in `Command::new`.
        std::str::from_utf8(body).unwrap_or_default()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("text", &self.text())
            .finish()
    }
}

/// Strip any trailing terminators and check the line fits a slot.
pub fn normalize(line: &str) -> Result<&str, EnqueueError> {
    let body = line.trim_end_matches(['\r', '\n']);
    if body.trim().is_empty() {
        return Err(EnqueueError::Empty);
    }
    if body.contains(['\r', '\n']) {
        return Err(EnqueueError::EmbeddedNewline);
    }
    if body.len() + 1 > MAX_LINE_LEN {
        return Err(EnqueueError::TooLong {
            len: body.len() + 1,
            max: MAX_LINE_LEN,
        });
    }
    Ok(body)
}

pub struct TransmitQueue {
    slots: Box<[Option<Command>]>,
    head: usize,
    tail: usize,
    confirmed: usize,
    last_id: u64,
    sent: u64,
    acked: u64,
}

impl TransmitQueue {
    /// Ring with `capacity` slots, holding at most `capacity - 1` lines.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            confirmed: 0,
            last_id: 0,
            sent: 0,
            acked: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    fn prev(&self, index: usize) -> usize {
        (index + self.slots.len() - 1) % self.slots.len()
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.slots.len() - from) % self.slots.len()
    }

    /// Lines held by the ring, sent-but-unconfirmed ones included.
    pub fn len(&self) -> usize {
        self.distance(self.confirmed, self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.confirmed
    }

    /// Lines waiting for their first (or next) transmission.
    pub fn pending(&self) -> usize {
        self.distance(self.tail, self.head)
    }

    /// Lines written to the wire and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.distance(self.confirmed, self.tail)
    }

    /// Total successful writes, minus rewinds.
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    #[cfg(test)]
    fn confirmed_count(&self) -> u64 {
        self.acked
    }

    pub fn enqueue(&mut self, line: &str) -> Result<CommandId, EnqueueError> {
        let body = normalize(line)?;
        let next_head = self.next(self.head);
        // `confirmed` trails `tail`, so this also refuses to overrun unsent lines.
        if next_head == self.confirmed || next_head == self.tail {
            return Err(EnqueueError::Full);
        }
        self.last_id += 1;
        let id = CommandId(self.last_id);
        self.slots[self.head] = Some(Command::new(id, body));
        self.head = next_head;
        Ok(id)
    }

    /// Peek at the next line to transmit without consuming it.
    pub fn dequeue_for_transmit(&self) -> Option<&Command> {
        if self.tail == self.head {
            return None;
        }
        self.slots[self.tail].as_ref()
    }

    /// Mark the line at `tail` as written. Returns `false` when nothing was pending.
    pub fn advance_tail(&mut self) -> bool {
        if self.tail == self.head {
            return false;
        }
        self.tail = self.next(self.tail);
        self.sent += 1;
        true
    }

    /// Release the oldest sent line after the board acknowledged it.
    pub fn confirm(&mut self) -> Result<CommandId, ConfirmError> {
        if self.confirmed == self.tail {
            return Err(ConfirmError::NothingInFlight);
        }
        let released = self.slots[self.confirmed]
            .take()
            .ok_or(ConfirmError::NothingInFlight)?;
        self.confirmed = self.next(self.confirmed);
        self.acked += 1;
        Ok(released.id())
    }

    /// Step `tail` back over the newest unacknowledged line so it is sent again.
    pub fn rewind(&mut self) -> Option<CommandId> {
        if self.tail == self.confirmed {
            return None;
        }
        self.tail = self.prev(self.tail);
        self.sent = self.sent.saturating_sub(1);
        self.slots[self.tail].as_ref().map(Command::id)
    }
}

impl fmt::Debug for TransmitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitQueue")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("confirmed", &self.confirmed)
            .field("sent", &self.sent)
            .field("acked", &self.acked)
            .finish()
    }
}
