// src/board.rs - Façade over the protocol engine and its workers
//
// Lock order: `job` before `link`. Nothing holds `link` while taking `job`.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::hardware::serial::SerialChannel;
use crate::print_job::{self, CommandSource, Job, JobError, JobInfo, JobOutcome, JobReport};
use crate::poller;
use crate::printer::{PrinterStatus, StatusSnapshot};
use crate::protocol::engine::ProtocolEngine;
use crate::protocol::framer::LineFramer;
use crate::protocol::queue::{CommandId, EnqueueError, TransmitQueue};

const READ_CHUNK: usize = 256;
const ERROR_BACKOFF: Duration = Duration::from_millis(200);
const EVENT_CAPACITY: usize = 64;

/// Notifications pushed to observers (WebSocket clients, the harness).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BoardEvent {
    StatusChanged(StatusSnapshot),
    Progress { fraction: f32 },
    Disconnected { retry: Option<CommandId> },
    CommandSent { id: CommandId },
    JobStarted(JobInfo),
    JobFinished(JobReport),
}

/// Transmit ring and the state machine that drains it. Always locked together.
#[derive(Debug)]
pub struct Link {
    pub queue: TransmitQueue,
    pub engine: ProtocolEngine,
}

#[derive(Debug, Clone)]
struct Settings {
    retry_delay: Duration,
    idle_delay: Duration,
    poll_interval: Duration,
    status_command: String,
    shutdown_sequence: Vec<String>,
    diagnostics_interval: Option<Duration>,
}

pub struct Board {
    pub(crate) link: Mutex<Link>,
    pub(crate) job: Mutex<Option<Job>>,
    job_ready: Notify,
    last_job: Mutex<Option<JobReport>>,
    events: broadcast::Sender<BoardEvent>,
    shutdown_tx: broadcast::Sender<()>,
    settings: Settings,
}

impl Board {
    pub fn new(config: &Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            link: Mutex::new(Link {
                queue: TransmitQueue::new(config.protocol.queue_capacity),
                engine: ProtocolEngine::new(config.protocol.flow_control, config.protocol.ack_timeout()),
            }),
            job: Mutex::new(None),
            job_ready: Notify::new(),
            last_job: Mutex::new(None),
            events,
            shutdown_tx,
            settings: Settings {
                retry_delay: config.feeder.retry_delay(),
                idle_delay: config.feeder.idle_delay(),
                poll_interval: config.poller.interval(),
                status_command: config.poller.command.clone(),
                shutdown_sequence: config.feeder.shutdown_sequence.clone(),
                diagnostics_interval: config.logging.diagnostics_interval(),
            },
        }
    }

    /// Spawn the link, feed, status-poll and (if configured) diagnostics workers.
    pub fn start<C>(self: &Arc<Self>, channel: C) -> Vec<JoinHandle<()>>
    where
        C: SerialChannel + 'static,
    {
        let mut handles = vec![
            self.start_link_loop(channel),
            tokio::spawn(print_job::run_feeder(self.clone(), self.shutdown_tx.subscribe())),
            tokio::spawn(poller::run_poller(
                self.clone(),
                self.settings.poll_interval,
                self.shutdown_tx.subscribe(),
            )),
        ];
        if let Some(every) = self.settings.diagnostics_interval {
            handles.push(self.start_diagnostics_loop(every));
        }
        tracing::info!("Board workers started");
        handles
    }

    /// Stop all workers and close any open job without sending the shutdown sequence.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.finish_job(JobOutcome::Stopped).await;
    }

    fn start_link_loop<C>(self: &Arc<Self>, mut channel: C) -> JoinHandle<()>
    where
        C: SerialChannel + 'static,
    {
        let board = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut framer = LineFramer::new();
            let mut buf = [0u8; READ_CHUNK];
            let mut faulted = false;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("Link worker shutting down");
                        break;
                    }
                    _ = board.link_cycle(&mut channel, &mut framer, &mut buf, &mut faulted) => {}
                }
            }
        })
    }

    fn start_diagnostics_loop(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let board = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let link = board.link.lock().await;
                        let state = link.engine.state();
                        tracing::debug!(
                            "status={} flow={:?} queue={:?} hotend={:.1}/{:.1} bed={:.1}/{:.1} last_line='{}'",
                            state.status,
                            link.engine.flow(),
                            link.queue,
                            state.hotend_temp,
                            state.hotend_target,
                            state.bed_temp,
                            state.bed_target,
                            state.last_line
                        );
                    }
                }
            }
        })
    }

    /// One pass of the receive/transmit worker. Never blocks beyond the channel's poll window.
    async fn link_cycle<C: SerialChannel>(
        &self,
        channel: &mut C,
        framer: &mut LineFramer,
        buf: &mut [u8],
        faulted: &mut bool,
    ) {
        match channel.read_available(buf).await {
            Ok(n) if n > 0 => {
                if std::mem::take(faulted) {
                    tracing::info!("Serial link recovered");
                }
                let now = Instant::now();
                let changed = {
                    let mut link = self.link.lock().await;
                    let Link { queue, engine } = &mut *link;
                    let mut changed = false;
                    framer.push(&buf[..n], |line| {
                        tracing::trace!("<< {}", line);
                        changed |= engine.handle_line(line, queue, now).status_changed;
                    });
                    changed
                };
                if changed {
                    self.publish_status().await;
                }
            }
            read => {
                if let Err(e) = read {
                    if !*faulted {
                        tracing::warn!("Serial read failed: {}", e);
                        *faulted = true;
                        framer.reset();
                    }
                    sleep(ERROR_BACKOFF).await;
                }
                self.check_ack_timeout().await;
            }
        }
        self.transmit_next(channel).await;
    }

    async fn check_ack_timeout(&self) {
        let timeout = {
            let mut link = self.link.lock().await;
            let Link { queue, engine } = &mut *link;
            engine.check_timeout(queue, Instant::now())
        };
        if let Some(timeout) = timeout {
            self.publish(BoardEvent::Disconnected { retry: timeout.retry });
            self.publish_status().await;
        }
    }

    async fn transmit_next<C: SerialChannel>(&self, channel: &mut C) {
        // Only this worker moves the tail, so the copy stays valid across the write.
        let next = {
            let link = self.link.lock().await;
            if link.engine.can_transmit(&link.queue) {
                link.queue.dequeue_for_transmit().copied()
            } else {
                None
            }
        };
        let Some(command) = next else {
            tokio::task::yield_now().await;
            return;
        };

        match channel.write_all(command.as_bytes()).await {
            Ok(()) => {
                {
                    let mut link = self.link.lock().await;
                    let Link { queue, engine } = &mut *link;
                    queue.advance_tail();
                    engine.on_sent(queue, Instant::now());
                }
                tracing::trace!(">> {} {}", command.id(), command.text());
                self.publish(BoardEvent::CommandSent { id: command.id() });
            }
            Err(e) => {
                tracing::error!("Serial write of {} failed: {}", command.id(), e);
                sleep(ERROR_BACKOFF).await;
            }
        }
    }

    /// Queue one line for the board.
    pub async fn send_command(&self, line: &str) -> Result<CommandId, EnqueueError> {
        let mut link = self.link.lock().await;
        link.queue.enqueue(line)
    }

    /// Retry on a full queue. With `abort_on_stop`, gives up with `Full` once
    /// the open job has a stop pending.
    pub(crate) async fn enqueue_until_accepted(&self, line: &str, abort_on_stop: bool) -> Result<CommandId, EnqueueError> {
        loop {
            match self.send_command(line).await {
                Err(EnqueueError::Full) => {
                    if abort_on_stop && self.job.lock().await.as_ref().is_some_and(Job::stop_requested) {
                        return Err(EnqueueError::Full);
                    }
                    sleep(self.settings.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    pub(crate) async fn send_shutdown_sequence(&self) {
        for line in &self.settings.shutdown_sequence {
            match self.enqueue_until_accepted(line, false).await {
                Ok(id) => tracing::debug!("Queued shutdown line {} '{}'", id, line),
                Err(e) => tracing::warn!("Skipping shutdown line '{}': {}", line, e),
            }
        }
    }

    /// Open `source` as the active job. Status becomes `Printing` immediately.
    pub async fn start_job(&self, name: &str, mut source: Box<dyn CommandSource>) -> Result<JobInfo, JobError> {
        let mut slot = self.job.lock().await;
        if slot.is_some() {
            return Err(JobError::AlreadyActive);
        }
        let total_size = source.total_length().await?;
        source.rewind().await?;

        let status_before = self.link.lock().await.engine.begin_job();
        let job = Job::new(name, source, total_size, status_before);
        let info = job.info().clone();
        *slot = Some(job);
        drop(slot);

        tracing::info!("Started job '{}' ({} bytes, id {})", info.name, info.total_size, info.id);
        self.job_ready.notify_one();
        self.publish(BoardEvent::JobStarted(info.clone()));
        self.publish_status().await;
        Ok(info)
    }

    /// Ask the feeder to stop at the next line boundary.
    pub async fn stop_job(&self) -> Result<(), JobError> {
        let mut slot = self.job.lock().await;
        let Some(job) = slot.as_mut() else {
            return Err(JobError::NoActiveJob);
        };
        if !job.request_stop() {
            return Err(JobError::NoActiveJob);
        }
        tracing::info!("Stop requested for job '{}'", job.info().name);
        Ok(())
    }

    pub(crate) async fn wait_for_job(&self) {
        tokio::select! {
            _ = self.job_ready.notified() => {}
            _ = sleep(self.settings.idle_delay) => {}
        }
    }

    /// Close the open job, if any. The slot stays locked until the engine has
    /// left printing, so a new job never sees the old job's teardown.
    pub(crate) async fn finish_job(&self, outcome: JobOutcome) {
        let report = {
            let mut slot = self.job.lock().await;
            let Some(job) = slot.take() else {
                return;
            };
            self.link.lock().await.engine.end_job(job.status_before());
            job.into_report(outcome)
        };
        tracing::info!(
            "Job '{}' finished: {:?} after {}/{} bytes",
            report.name,
            report.outcome,
            report.bytes_consumed,
            report.total_size
        );
        let fraction = report.progress();
        *self.last_job.lock().await = Some(report.clone());
        self.publish(BoardEvent::Progress { fraction });
        self.publish(BoardEvent::JobFinished(report));
        self.publish_status().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: BoardEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) async fn publish_status(&self) {
        let snapshot = self.snapshot().await;
        self.publish(BoardEvent::StatusChanged(snapshot));
    }

    pub async fn status(&self) -> PrinterStatus {
        self.link.lock().await.engine.status()
    }

    pub async fn hotend_temperature(&self) -> f32 {
        self.link.lock().await.engine.state().hotend_temp
    }

    pub async fn bed_temperature(&self) -> f32 {
        self.link.lock().await.engine.state().bed_temp
    }

    /// Fraction of the open job's bytes consumed; `0` with no open job.
    pub async fn progress(&self) -> f32 {
        self.job.lock().await.as_ref().map_or(0.0, Job::progress)
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let progress = self.progress().await;
        self.link.lock().await.engine.state().snapshot(progress)
    }

    pub async fn current_job(&self) -> Option<JobInfo> {
        self.job.lock().await.as_ref().map(|job| job.info().clone())
    }

    pub async fn last_job(&self) -> Option<JobReport> {
        self.last_job.lock().await.clone()
    }

    pub fn status_command(&self) -> &str {
        &self.settings.status_command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print_job::{feed_cycle, FeedStep, ReaderSource};

    fn board() -> Board {
        Board::new(&Config::default())
    }

    #[tokio::test]
    async fn second_job_is_rejected() {
        let board = board();
        board.start_job("a", Box::new(ReaderSource::from_bytes("G28\n"))).await.unwrap();
        let err = board
            .start_job("b", Box::new(ReaderSource::from_bytes("G28\n")))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::AlreadyActive));
        assert_eq!(board.status().await, PrinterStatus::Printing);
    }

    #[tokio::test]
    async fn stop_without_job_is_an_error() {
        let board = board();
        assert!(matches!(board.stop_job().await, Err(JobError::NoActiveJob)));
    }

    #[tokio::test]
    async fn stop_twice_reports_no_active_job() {
        let board = board();
        board.start_job("a", Box::new(ReaderSource::from_bytes("G28\n"))).await.unwrap();
        board.stop_job().await.unwrap();
        assert!(matches!(board.stop_job().await, Err(JobError::NoActiveJob)));
    }

    #[tokio::test]
    async fn progress_is_zero_without_job() {
        let board = board();
        assert_eq!(board.progress().await, 0.0);
        assert_eq!(board.snapshot().await.status, PrinterStatus::Unknown);
    }

    #[tokio::test]
    async fn new_job_waits_for_stopped_job_teardown() {
        let mut config = Config::default();
        config.protocol.queue_capacity = 2;
        config.feeder.retry_delay_ms = 1;
        let board = Arc::new(Board::new(&config));
        board
            .start_job("a", Box::new(ReaderSource::from_bytes("G1 X1\nG1 X2\n")))
            .await
            .unwrap();
        assert_eq!(feed_cycle(&board).await, FeedStep::Fed);
        board.stop_job().await.unwrap();

        // The ring is full, so the shutdown sequence blocks until it is drained.
        let feeder = tokio::spawn({
            let board = board.clone();
            async move { feed_cycle(&board).await }
        });
        sleep(Duration::from_millis(20)).await;
        let err = board
            .start_job("b", Box::new(ReaderSource::from_bytes("G28\n")))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::AlreadyActive));
        assert_eq!(board.status().await, PrinterStatus::Printing);

        while !feeder.is_finished() {
            {
                let mut link = board.link.lock().await;
                if link.queue.advance_tail() {
                    link.queue.confirm().unwrap();
                }
            }
            sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(feeder.await.unwrap(), FeedStep::Finished);
        let report = board.last_job().await.unwrap();
        assert_eq!(report.name, "a");
        assert_eq!(report.outcome, JobOutcome::Stopped);
        assert_eq!(board.status().await, PrinterStatus::Unknown);

        board
            .start_job("b", Box::new(ReaderSource::from_bytes("G28\n")))
            .await
            .unwrap();
        assert_eq!(board.status().await, PrinterStatus::Printing);
        assert!(board.link.lock().await.engine.job_active());
    }

    #[tokio::test]
    async fn events_serialize_with_tag() {
        let event = BoardEvent::Progress { fraction: 0.5 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["fraction"], 0.5);
    }
}
