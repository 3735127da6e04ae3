//! Line protocol spoken with the printer board: framing, the transmit ring,
//! telemetry parsing and the acknowledgement state machine.

pub mod engine;
pub mod framer;
pub mod queue;
pub mod telemetry;

pub use engine::{FlowControl, FlowState, LineKind, ProtocolEngine};
pub use framer::LineFramer;
pub use queue::{Command, CommandId, ConfirmError, EnqueueError, TransmitQueue};
pub use telemetry::{parse_temperature_report, TemperatureReport};
