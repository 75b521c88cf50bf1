// 共享类型定义
// Serial settings and logical register addressing for the MightyZap client

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Logical address that separates the input and holding register ranges.
/// It belongs to neither range.
pub const REGISTER_BOUNDARY: u32 = 40000;
/// First logical holding register (offset 0)
pub const HOLDING_REGISTER_BASE: u32 = 40001;
/// First logical input register (offset 0)
pub const INPUT_REGISTER_BASE: u32 = 30001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// `:`-prefixed hex frames with an LRC checksum
    Ascii,
}

/// 串口配置错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("baud rate must be greater than 0")]
    BaudRate,
    #[error("unsupported data bits: {0}")]
    DataBits(u8),
    #[error("unsupported stop bits: {0}")]
    StopBits(u8),
    #[error("timeout must be greater than 0")]
    Timeout,
}

/// Serial link parameters applied when a connection is opened.
///
/// `Default` yields the values MightyZap actuators in the field are
/// configured for; the client never deviates from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate in bit/s
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: u8,
    pub parity: Parity,
    /// Stop bits per character
    pub stop_bits: u8,
    /// Read timeout in seconds
    pub timeout_secs: u64,
    /// Modbus framing mode
    pub mode: TransportMode,
    /// Discard pending input/output before every request
    pub clear_buffers_before_each_transaction: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 57_600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout_secs: 10,
            mode: TransportMode::Ascii,
            clear_buffers_before_each_transaction: true,
        }
    }
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the parameters are something a serial port can be opened with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.baud_rate == 0 {
            return Err(SettingsError::BaudRate);
        }
        if !matches!(self.data_bits, 7 | 8) {
            return Err(SettingsError::DataBits(self.data_bits));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(SettingsError::StopBits(self.stop_bits));
        }
        if self.timeout_secs == 0 {
            return Err(SettingsError::Timeout);
        }
        Ok(())
    }
}

/// Modbus read function codes used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 0x03
    ReadHoldingRegisters,
    /// 0x04
    ReadInputRegisters,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 3,
            FunctionCode::ReadInputRegisters => 4,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// 4xxxx range
    Holding,
    /// 3xxxx range
    Input,
}

impl RegisterKind {
    pub fn function_code(self) -> FunctionCode {
        match self {
            RegisterKind::Holding => FunctionCode::ReadHoldingRegisters,
            RegisterKind::Input => FunctionCode::ReadInputRegisters,
        }
    }
}

/// A logical register number resolved to its class and on-wire offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddress {
    logical: u32,
    kind: RegisterKind,
    offset: u16,
}

impl RegisterAddress {
    /// Resolve a logical register number.
    ///
    /// Returns `None` for 40000 itself, for numbers below 30001 and for
    /// holding registers whose offset does not fit in 16 bits.
    pub fn resolve(logical: u32) -> Option<Self> {
        let (kind, base) = if logical > REGISTER_BOUNDARY {
            (RegisterKind::Holding, HOLDING_REGISTER_BASE)
        } else if logical < REGISTER_BOUNDARY {
            (RegisterKind::Input, INPUT_REGISTER_BASE)
        } else {
            return None;
        };
        let offset = logical.checked_sub(base)?;
        let offset = u16::try_from(offset).ok()?;
        Some(Self {
            logical,
            kind,
            offset,
        })
    }

    pub fn logical(&self) -> u32 {
        self.logical
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    /// Zero-based register offset sent on the wire
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn function_code(&self) -> FunctionCode {
        self.kind.function_code()
    }
}

/// Interpret a raw 16-bit register word, as two's complement when `signed`.
pub fn interpret_word(raw: u16, signed: bool) -> i32 {
    if signed {
        raw as i16 as i32
    } else {
        raw as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_range_maps_to_function_code_3() {
        let addr = RegisterAddress::resolve(40010).unwrap();
        assert_eq!(addr.kind(), RegisterKind::Holding);
        assert_eq!(addr.function_code(), FunctionCode::ReadHoldingRegisters);
        assert_eq!(addr.function_code().code(), 3);
        assert_eq!(addr.offset(), 9);

        assert_eq!(RegisterAddress::resolve(40001).unwrap().offset(), 0);
    }

    #[test]
    fn input_range_maps_to_function_code_4() {
        let addr = RegisterAddress::resolve(30005).unwrap();
        assert_eq!(addr.kind(), RegisterKind::Input);
        assert_eq!(addr.function_code().code(), 4);
        assert_eq!(addr.offset(), 4);

        assert_eq!(RegisterAddress::resolve(30001).unwrap().offset(), 0);
        assert_eq!(RegisterAddress::resolve(39999).unwrap().offset(), 9998);
    }

    #[test]
    fn boundary_and_out_of_range_are_rejected() {
        assert!(RegisterAddress::resolve(40000).is_none());
        assert!(RegisterAddress::resolve(30000).is_none());
        assert!(RegisterAddress::resolve(0).is_none());
        assert!(RegisterAddress::resolve(40001 + u16::MAX as u32).is_some());
        assert!(RegisterAddress::resolve(40001 + u16::MAX as u32 + 1).is_none());
    }

    #[test]
    fn default_settings_match_device_configuration() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 57_600);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, 1);
        assert_eq!(settings.timeout(), Duration::from_secs(10));
        assert_eq!(settings.mode, TransportMode::Ascii);
        assert!(settings.clear_buffers_before_each_transaction);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let mut settings = SerialSettings::default();
        settings.baud_rate = 0;
        assert_eq!(settings.validate(), Err(SettingsError::BaudRate));

        let mut settings = SerialSettings::default();
        settings.data_bits = 5;
        assert_eq!(settings.validate(), Err(SettingsError::DataBits(5)));

        let mut settings = SerialSettings::default();
        settings.stop_bits = 3;
        assert_eq!(settings.validate(), Err(SettingsError::StopBits(3)));

        let mut settings = SerialSettings::default();
        settings.timeout_secs = 0;
        assert_eq!(settings.validate(), Err(SettingsError::Timeout));
    }

    #[test]
    fn words_are_interpreted_per_signedness() {
        assert_eq!(interpret_word(0xFFFF, false), 65535);
        assert_eq!(interpret_word(0xFFFF, true), -1);
        assert_eq!(interpret_word(0x8000, true), -32768);
        assert_eq!(interpret_word(0x7FFF, true), 32767);
        assert_eq!(interpret_word(42, true), 42);
    }

    #[test]
    fn settings_serialize_to_json() {
        let json = serde_json::to_value(SerialSettings::default()).unwrap();
        assert_eq!(json["baud_rate"], 57_600);
        assert_eq!(json["mode"], "Ascii");
    }
}
