// Communication drivers module
//
// Drivers own the physical link to a device. Device abstractions in
// `crate::devices` talk to them through the traits defined here.

/// Modbus ASCII serial driver
/// Frames single-register reads over a local serial port
pub mod modbus;

pub use modbus::{AsciiSerialTransport, CommunicationError, ModbusTransport};
