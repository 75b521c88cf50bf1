//! Modbus ASCII register client for MightyZap linear actuators.
//!
//! ```no_run
//! use mightyzap::RegisterClient;
//!
//! let client = RegisterClient::new("COM4", 1, false)?;
//! let position = client.scoped(|zap| zap.read_register(40010, false))?;
//! println!("register 40010 = {}", position);
//! # Ok::<(), mightyzap::ZapError>(())
//! ```

pub mod devices;
pub mod drivers;
pub mod types;

pub use devices::{RegisterClient, ZapError};
pub use drivers::{AsciiSerialTransport, CommunicationError, ModbusTransport};
pub use types::{FunctionCode, RegisterAddress, RegisterKind, SerialSettings, SettingsError};
