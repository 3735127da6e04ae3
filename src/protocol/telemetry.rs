//! Temperature report grammar.
//!
//! ```text
//! T:<float> /<float> B:<float> /<float> @:<int> B@:<int>[ W:<float>]
//! ```
//!
//! Fields are space separated. A `/<float>` token is the target of the field
//! that precedes it. Power (`@`, `B@`) and wait (`W`) fields are consumed and
//! dropped, unknown tags are skipped.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureReport {
    pub hotend: Option<f32>,
    pub hotend_target: Option<f32>,
    pub bed: Option<f32>,
    pub bed_target: Option<f32>,
}

impl TemperatureReport {
    pub fn is_empty(&self) -> bool {
        self.hotend.is_none()
            && self.hotend_target.is_none()
            && self.bed.is_none()
            && self.bed_target.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Hotend,
    Bed,
    Power,
    Wait,
    Unknown,
}

impl Field {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "T" => Field::Hotend,
            "B" => Field::Bed,
            "@" | "B@" => Field::Power,
            "W" => Field::Wait,
            _ => Field::Unknown,
        }
    }
}

fn number(text: &str) -> Option<f32> {
    text.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Does `line` open with the temperature grammar's first tag?
pub fn is_temperature_report(line: &str) -> bool {
    line.starts_with("T:")
}

/// Scan a report left to right. Returns `None` when no temperature field parsed.
pub fn parse_temperature_report(line: &str) -> Option<TemperatureReport> {
    let mut report = TemperatureReport::default();
    let mut field = Field::None;

    for token in line.split(' ').filter(|token| !token.is_empty()) {
        let (current, target) = match token.strip_prefix('/') {
            Some(target) => (None, Some(target)),
            None => match token.split_once(':') {
                Some((tag, value)) => {
                    field = Field::from_tag(tag);
                    // Some firmwares glue the target on: `T:200.0/205.0`.
                    match value.split_once('/') {
                        Some((value, target)) => (Some(value), Some(target)),
                        None => (Some(value), None),
                    }
                }
                None => {
                    field = Field::Unknown;
                    continue;
                }
            },
        };

        let current = current.and_then(number);
        let target = target.and_then(number);
        match field {
            Field::Hotend => {
                report.hotend = current.or(report.hotend);
                report.hotend_target = target.or(report.hotend_target);
            }
            Field::Bed => {
                report.bed = current.or(report.bed);
                report.bed_target = target.or(report.bed_target);
            }
            Field::Power | Field::Wait | Field::Unknown | Field::None => {}
        }
    }

    (!report.is_empty()).then_some(report)
}
