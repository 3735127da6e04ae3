// src/print_job.rs - Job lifecycle and the feeder that streams a command source into the queue
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeek, AsyncSeekExt, BufReader};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::board::{Board, BoardEvent};
use crate::printer::PrinterStatus;
use crate::protocol::queue::EnqueueError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a job is already active")]
    AlreadyActive,
    #[error("no job is active")]
    NoActiveJob,
    #[error("command source error: {0}")]
    Source(#[from] io::Error),
}

/// Sequential, line-oriented command input.
#[async_trait]
pub trait CommandSource: Send {
    /// Append the next line, terminator included, to `buf`. Returns the raw
    /// byte count consumed, `0` at the end of the source.
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
    /// Total size in bytes. Leaves the read position unspecified.
    async fn total_length(&mut self) -> io::Result<u64>;
    async fn rewind(&mut self) -> io::Result<()>;
}

/// File or in-memory G-code.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl ReaderSource<BufReader<File>> {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl ReaderSource<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }
}

#[async_trait]
impl<R> CommandSource for ReaderSource<R>
where
    R: AsyncBufRead + AsyncSeek + Unpin + Send,
{
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.reader.read_until(b'\n', buf).await
    }

    async fn total_length(&mut self) -> io::Result<u64> {
        self.reader.seek(SeekFrom::End(0)).await
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0)).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
    pub total_size: u64,
}

/// What a finished job left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: Uuid,
    pub name: String,
    pub total_size: u64,
    pub bytes_consumed: u64,
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn progress(&self) -> f32 {
        progress_fraction(self.bytes_consumed, self.total_size)
    }
}

/// `consumed / total` in `[0, 1]`, `0` for an empty source.
pub fn progress_fraction(consumed: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (consumed as f64 / total as f64).clamp(0.0, 1.0) as f32
}

/// Only motion (`G`) and miscellaneous (`M`) codes reach the board.
pub fn is_command_line(line: &[u8]) -> bool {
    matches!(line.first(), Some(b'G' | b'M'))
}

/// Drop the terminator, any trailing `;` comment and surrounding blanks.
pub fn command_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let code = match text.find(';') {
        Some(at) => &text[..at],
        None => &text[..],
    };
    code.trim().to_string()
}

pub(crate) enum NextLine {
    Command(String),
    Skipped,
    End,
}

/// An open command source plus its progress counters.
pub struct Job {
    info: JobInfo,
    source: Option<Box<dyn CommandSource>>,
    bytes_consumed: u64,
    stop_requested: bool,
    status_before: PrinterStatus,
    last_percent: u32,
    line: Vec<u8>,
}

impl Job {
    pub fn new(name: impl Into<String>, source: Box<dyn CommandSource>, total_size: u64, status_before: PrinterStatus) -> Self {
        Self {
            info: JobInfo {
                id: Uuid::new_v4(),
                name: name.into(),
                total_size,
            },
            source: Some(source),
            bytes_consumed: 0,
            stop_requested: false,
            status_before,
            last_percent: 0,
            line: Vec::with_capacity(128),
        }
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn progress(&self) -> f32 {
        progress_fraction(self.bytes_consumed, self.info.total_size)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Returns `false` if a stop was already pending.
    pub fn request_stop(&mut self) -> bool {
        !std::mem::replace(&mut self.stop_requested, true)
    }

    pub fn status_before(&self) -> PrinterStatus {
        self.status_before
    }

    /// Drop the source. Later reads report the end of the job.
    pub fn close_source(&mut self) {
        self.source = None;
    }

    /// Whole-percent change since the last call.
    fn progress_step(&mut self) -> Option<f32> {
        let progress = self.progress();
        let percent = (progress * 100.0) as u32;
        (percent != self.last_percent).then(|| {
            self.last_percent = percent;
            progress
        })
    }

    pub(crate) async fn next_line(&mut self) -> io::Result<NextLine> {
        self.line.clear();
        let Some(source) = self.source.as_mut() else {
            return Ok(NextLine::End);
        };
        let n = source.read_line(&mut self.line).await?;
        if n == 0 {
            return Ok(NextLine::End);
        }
        self.bytes_consumed += n as u64;
        if !is_command_line(&self.line) {
            return Ok(NextLine::Skipped);
        }
        Ok(NextLine::Command(command_text(&self.line)))
    }

    pub fn into_report(self, outcome: JobOutcome) -> JobReport {
        JobReport {
            id: self.info.id,
            name: self.info.name,
            total_size: self.info.total_size,
            bytes_consumed: self.bytes_consumed,
            outcome,
        }
    }
}

/// Result of one feed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeedStep {
    Idle,
    Fed,
    Finished,
}

/// Read one line of the open job and push it towards the board.
pub(crate) async fn feed_cycle(board: &Board) -> FeedStep {
    let mut slot = board.job.lock().await;
    let Some(job) = slot.as_mut() else {
        drop(slot);
        board.wait_for_job().await;
        return FeedStep::Idle;
    };

    let next = job.next_line().await;
    let progress = job.progress_step();
    let command = match next {
        Ok(NextLine::Command(text)) => Some(text),
        Ok(NextLine::Skipped) => None,
        Ok(NextLine::End) => {
            tracing::info!("Job '{}' reached end of source", job.info().name);
            drop(slot);
            board.finish_job(JobOutcome::Completed).await;
            return FeedStep::Finished;
        }
        Err(e) => {
            tracing::error!("Reading job '{}' failed: {}", job.info().name, e);
            job.close_source();
            drop(slot);
            board.finish_job(JobOutcome::Failed).await;
            return FeedStep::Finished;
        }
    };
    drop(slot);

    if let Some(text) = command {
        match board.enqueue_until_accepted(&text, true).await {
            Ok(id) => tracing::trace!("Queued job line {} '{}'", id, text),
            Err(EnqueueError::Full) => tracing::debug!("Stop requested while waiting for queue space, dropping '{}'", text),
            Err(e) => tracing::warn!("Skipping job line '{}': {}", text, e),
        }
    }
    if let Some(fraction) = progress {
        board.publish(BoardEvent::Progress { fraction });
    }

    // The job stays in its slot until `finish_job`, so no other job can open meanwhile.
    let mut slot = board.job.lock().await;
    match slot.as_mut() {
        Some(job) if job.stop_requested() => {
            tracing::info!("Stopping job '{}' at byte {}", job.info().name, job.bytes_consumed());
            job.close_source();
            drop(slot);
            board.send_shutdown_sequence().await;
            board.finish_job(JobOutcome::Stopped).await;
            FeedStep::Finished
        }
        _ => FeedStep::Fed,
    }
}

/// Feed worker: runs feed cycles until shutdown.
pub(crate) async fn run_feeder(board: Arc<Board>, mut shutdown: broadcast::Receiver<()>) {
    tracing::debug!("Feeder worker started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("Feeder worker shutting down");
                break;
            }
            step = feed_cycle(&board) => {
                if step == FeedStep::Fed {
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}
