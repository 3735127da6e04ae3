// src/hardware/mod.rs - Byte channels to the printer board
pub mod serial;

pub use serial::{open_serial_port, SerialChannel, SerialPortChannel, StreamChannel};
