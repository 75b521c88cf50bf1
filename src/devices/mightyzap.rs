// MightyZap 线性执行器
// Register client for MightyZap actuators on a Modbus ASCII serial link

use crate::drivers::modbus::{AsciiSerialTransport, CommunicationError, ModbusTransport};
use crate::types::{RegisterAddress, SerialSettings};
use std::fmt;

/// Highest unicast Modbus slave address
const MAX_UNIT_ID: u8 = 247;

#[derive(Debug, thiserror::Error)]
pub enum ZapError {
    #[error("connection state error: {0}")]
    ConnectionState(String),
    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),
    #[error("register {0} is outside the input (30001-39999) and holding (40001+) ranges")]
    InvalidRegister(u32),
    #[error("device address {0} is outside 1-247")]
    InvalidAddress(u8),
}

/// Connection state for the single transport handle a client owns
enum Connection<T> {
    /// Constructed but not configured yet
    Pending(T),
    Open(T),
    Closed,
}

impl<T> Connection<T> {
    fn label(&self) -> &'static str {
        match self {
            Connection::Pending(_) => "pending",
            Connection::Open(_) => "open",
            Connection::Closed => "closed",
        }
    }
}

/// Client for reading MightyZap registers.
///
/// The connection is opened on construction and released on `close`,
/// on `scoped` exit, or on drop, whichever comes first. One client per
/// serial port: two clients on the same port interleave frames.
pub struct RegisterClient<T: ModbusTransport = AsciiSerialTransport> {
    port: String,
    address: u8,
    settings: SerialSettings,
    connection: Connection<T>,
}

impl RegisterClient<AsciiSerialTransport> {
    /// Open a Modbus ASCII connection to the actuator at `address` on `port`.
    ///
    /// # Arguments
    /// * `port` - Serial device, e.g. "COM4" or "/dev/ttyUSB0"
    /// * `address` - Modbus slave ID of the actuator
    /// * `initialize` - Run `initialize` after the port is opened
    pub fn new(port: &str, address: u8, initialize: bool) -> Result<Self, ZapError> {
        validate_address(address)?;
        let transport = AsciiSerialTransport::new(port, address);
        Self::with_transport(port, address, transport, initialize)
    }
}

impl<T: ModbusTransport> RegisterClient<T> {
    /// Build a client over an existing transport and open it immediately.
    pub fn with_transport(
        port: &str,
        address: u8,
        transport: T,
        initialize: bool,
    ) -> Result<Self, ZapError> {
        validate_address(address)?;
        let mut client = Self {
            port: port.to_string(),
            address,
            settings: SerialSettings::default(),
            connection: Connection::Pending(transport),
        };
        client.open()?;
        if initialize {
            client.initialize()?;
        }
        Ok(client)
    }

    /// Configure the transport with the fixed serial settings.
    ///
    /// Only the first call succeeds; the constructor already makes it.
    pub fn open(&mut self) -> Result<(), ZapError> {
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Pending(mut transport) => {
                log::debug!("Opening {} (unit {})", self.port, self.address);
                if let Err(e) = transport.configure(&self.settings) {
                    transport.release();
                    return Err(e.into());
                }
                self.connection = Connection::Open(transport);
                Ok(())
            }
            state => {
                let label = state.label();
                self.connection = state;
                Err(ZapError::ConnectionState(format!(
                    "{} (unit {}) is already {}",
                    self.port, self.address, label
                )))
            }
        }
    }

    /// Device setup hook run after open when requested at construction.
    /// MightyZap needs no setup sequence, so this only checks the link is open.
    pub fn initialize(&mut self) -> Result<(), ZapError> {
        self.transport()?;
        log::debug!("Initialized {} (unit {})", self.port, self.address);
        Ok(())
    }

    /// Read one register by its logical number.
    ///
    /// Numbers above 40000 are holding registers (function code 3, offset
    /// `register - 40001`), numbers below 40000 are input registers
    /// (function code 4, offset `register - 30001`).
    pub fn read_register(&mut self, register: u32, signed: bool) -> Result<i32, ZapError> {
        let target = RegisterAddress::resolve(register).ok_or(ZapError::InvalidRegister(register))?;
        let port = &self.port;
        let address = self.address;
        let transport = match &mut self.connection {
            Connection::Open(transport) => transport,
            other => {
                return Err(ZapError::ConnectionState(format!(
                    "cannot read register {} from {}: connection is {}",
                    register,
                    port,
                    other.label()
                )))
            }
        };

        log::trace!(
            "Reading register {} (fc {}, offset {}) from unit {}",
            register,
            target.function_code(),
            target.offset(),
            address
        );
        transport
            .read_register(target.offset(), target.function_code(), signed)
            .map_err(|e| {
                log::warn!("Read of register {} from {} failed: {}", register, port, e);
                ZapError::from(e)
            })
    }

    /// Release the transport. Further calls do nothing.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Pending(mut transport) | Connection::Open(mut transport) => {
                transport.release();
                log::debug!("Closed {} (unit {})", self.port, self.address);
            }
            Connection::Closed => {}
        }
    }

    /// Run `f` with the open client and close it afterwards, whether `f`
    /// succeeded or not.
    pub fn scoped<R, F>(mut self, f: F) -> Result<R, ZapError>
    where
        F: FnOnce(&mut Self) -> Result<R, ZapError>,
    {
        let result = f(&mut self);
        self.close();
        result
    }

    pub fn is_open(&self) -> bool {
        matches!(self.connection, Connection::Open(_))
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Serial settings applied on open
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn transport(&mut self) -> Result<&mut T, ZapError> {
        match &mut self.connection {
            Connection::Open(transport) => Ok(transport),
            other => Err(ZapError::ConnectionState(format!(
                "{} connection is {}",
                self.port,
                other.label()
            ))),
        }
    }
}

impl<T: ModbusTransport> Drop for RegisterClient<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: ModbusTransport> fmt::Debug for RegisterClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterClient")
            .field("port", &self.port)
            .field("address", &self.address)
            .field("connection", &self.connection.label())
            .finish()
    }
}

fn validate_address(address: u8) -> Result<(), ZapError> {
    if address == 0 || address > MAX_UNIT_ID {
        return Err(ZapError::InvalidAddress(address));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_reserved_addresses_are_rejected() {
        assert!(matches!(validate_address(0), Err(ZapError::InvalidAddress(0))));
        assert!(matches!(validate_address(248), Err(ZapError::InvalidAddress(248))));
        assert!(validate_address(1).is_ok());
        assert!(validate_address(247).is_ok());
    }

    #[test]
    fn new_rejects_bad_address_before_touching_the_port() {
        let err = RegisterClient::new("/dev/null-mightyzap", 0, false).unwrap_err();
        assert!(matches!(err, ZapError::InvalidAddress(0)));
    }

    #[test]
    fn missing_port_surfaces_as_communication_error() {
        let err = RegisterClient::new("/dev/does-not-exist-mightyzap", 1, false).unwrap_err();
        assert!(matches!(err, ZapError::Communication(_)));
    }
}
