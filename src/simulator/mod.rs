//! Simulated Marlin-style board.
//!
//! Speaks the line protocol over any async byte stream so the bridge can be
//! exercised without hardware: every line is acknowledged, `M105` returns a
//! temperature report, `M104`/`M140` set heater targets and `G28` reports
//! busy before its acknowledgement.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const AMBIENT: f32 = 25.0;

/// First-order heater: each step closes a fixed share of the gap to the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heater {
    pub current: f32,
    pub target: f32,
}

impl Heater {
    pub fn new() -> Self {
        Self {
            current: AMBIENT,
            target: 0.0,
        }
    }

    fn step(&mut self) {
        let goal = if self.target > 0.0 { self.target } else { AMBIENT };
        self.current += (goal - self.current) * 0.2;
    }
}

impl Default for Heater {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SimulatedBoard {
    pub hotend: Heater,
    pub bed: Heater,
    /// Upcoming commands to swallow without any reply.
    drop_acks: usize,
    tap: Option<mpsc::UnboundedSender<String>>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            hotend: Heater::new(),
            bed: Heater::new(),
            drop_acks: 0,
            tap: None,
        }
    }

    /// Leave the next `count` commands unanswered.
    pub fn drop_acks(mut self, count: usize) -> Self {
        self.drop_acks = count;
        self
    }

    /// Copy every received command line to `tap`.
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<String>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Reply lines for one inbound command.
    pub fn respond(&mut self, line: &str) -> Vec<String> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        if let Some(tap) = &self.tap {
            let _ = tap.send(line.to_string());
        }
        self.hotend.step();
        self.bed.step();

        let mut words = line.split_whitespace();
        let code = words.next().unwrap_or_default();
        let s_value = words
            .find_map(|w| w.strip_prefix('S'))
            .and_then(|v| v.parse::<f32>().ok());

        let mut replies = Vec::new();
        match code {
            "M104" | "M109" => self.hotend.target = s_value.unwrap_or(0.0),
            "M140" | "M190" => self.bed.target = s_value.unwrap_or(0.0),
            "G28" => replies.push("echo:busy: processing".to_string()),
            _ => {}
        }

        if self.drop_acks > 0 {
            self.drop_acks -= 1;
            tracing::debug!("Simulator dropping acknowledgement for '{}'", line);
            return Vec::new();
        }

        if code == "M105" {
            replies.push(format!(
                "ok T:{:.2} /{:.2} B:{:.2} /{:.2} @:0 B@:0",
                self.hotend.current, self.hotend.target, self.bed.current, self.bed.target
            ));
        } else {
            replies.push("ok".to_string());
        }
        replies
    }

    /// Serve the protocol until the peer closes the stream.
    pub async fn run<S>(mut self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            for reply in self.respond(&line) {
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await?;
        }
        tracing::debug!("Simulator stream closed");
        Ok(())
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::telemetry::parse_temperature_report;

    #[test]
    fn acknowledges_plain_commands() {
        let mut sim = SimulatedBoard::new();
        assert_eq!(sim.respond("G1 X10"), ["ok"]);
        assert!(sim.respond("   ").is_empty());
    }

    #[test]
    fn reports_targets_set_earlier() {
        let mut sim = SimulatedBoard::new();
        sim.respond("M104 S205");
        sim.respond("M140 S60");
        let replies = sim.respond("M105");
        let report = parse_temperature_report(replies[0].trim_start_matches("ok").trim()).unwrap();
        assert_eq!(report.hotend_target, Some(205.0));
        assert_eq!(report.bed_target, Some(60.0));
        assert!(report.hotend.unwrap() > AMBIENT);
    }

    #[test]
    fn homing_reports_busy_first() {
        let mut sim = SimulatedBoard::new();
        assert_eq!(sim.respond("G28"), ["echo:busy: processing", "ok"]);
    }

    #[test]
    fn dropped_acks_are_counted_down() {
        let mut sim = SimulatedBoard::new().drop_acks(1);
        assert!(sim.respond("G1 X1").is_empty());
        assert_eq!(sim.respond("G1 X1"), ["ok"]);
    }
}
