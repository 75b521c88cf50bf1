// Modbus ASCII 串口传输
// Serial transport that frames single-register reads as Modbus ASCII

use crate::types::{interpret_word, FunctionCode, Parity, SerialSettings, SettingsError};
use rmodbus::{
    client::ModbusRequest, generate_ascii_frame, parse_ascii_frame, ErrorKind, ModbusFrameBuf,
    ModbusProto,
};
use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Longest ASCII frame on the wire: `:` + 2 * 255 hex chars + CR LF
const MAX_ASCII_FRAME_LEN: usize = 513;
/// Bytes tolerated ahead of the `:` start marker before giving up
const MAX_LEADING_NOISE: usize = MAX_ASCII_FRAME_LEN;

/// Modbus 通信错误类型
#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid serial settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    #[error("no response before timeout")]
    Timeout,
    #[error("LRC checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    Checksum { expected: u8, actual: u8 },
    #[error("malformed frame: {0}")]
    Framing(String),
    #[error("device returned Modbus exception 0x{0:02X}")]
    Exception(u8),
    #[error("transport used before it was configured")]
    NotConfigured,
}

/// Register read capability the client drives.
///
/// Implementations own the physical link. `configure` binds and configures
/// it, `read_register` performs exactly one request/response exchange and
/// `release` frees the link.
pub trait ModbusTransport {
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), CommunicationError>;

    /// Read one register at `offset` with the given function code.
    fn read_register(
        &mut self,
        offset: u16,
        function: FunctionCode,
        signed: bool,
    ) -> Result<i32, CommunicationError>;

    fn release(&mut self);
}

/// Modbus ASCII transport over a local serial port
pub struct AsciiSerialTransport {
    /// 串口名称（如 "COM4" 或 "/dev/ttyUSB0"）
    port_name: String,
    /// Modbus 从站地址
    unit_id: u8,
    /// 串口句柄，configure 之后才存在
    port: Option<Box<dyn SerialPort>>,
    clear_buffers: bool,
    /// 单次请求/响应的总超时
    timeout: Duration,
}

impl AsciiSerialTransport {
    /// Create an unconfigured transport; no port is opened until `configure`.
    pub fn new(port_name: &str, unit_id: u8) -> Self {
        Self {
            port_name: port_name.to_string(),
            unit_id,
            port: None,
            clear_buffers: true,
            timeout: SerialSettings::default().timeout(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl ModbusTransport for AsciiSerialTransport {
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), CommunicationError> {
        settings.validate()?;

        let data_bits = match settings.data_bits {
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match settings.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };

        let port = serialport::new(&self.port_name, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(settings.timeout())
            .open()?;

        log::debug!(
            "Opened {} at {} baud ({:?}, unit {})",
            self.port_name,
            settings.baud_rate,
            settings.mode,
            self.unit_id
        );
        self.port = Some(port);
        self.clear_buffers = settings.clear_buffers_before_each_transaction;
        self.timeout = settings.timeout();
        Ok(())
    }

    fn read_register(
        &mut self,
        offset: u16,
        function: FunctionCode,
        signed: bool,
    ) -> Result<i32, CommunicationError> {
        let port = self.port.as_mut().ok_or(CommunicationError::NotConfigured)?;
        if self.clear_buffers {
            port.clear(ClearBuffer::All)?;
        }
        let raw = transact(&mut **port, self.unit_id, function, offset, self.timeout)?;
        Ok(interpret_word(raw, signed))
    }

    fn release(&mut self) {
        // 串口在 drop 时关闭
        if self.port.take().is_some() {
            log::debug!("Closed {}", self.port_name);
        }
    }
}

impl fmt::Debug for AsciiSerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsciiSerialTransport")
            .field("port_name", &self.port_name)
            .field("unit_id", &self.unit_id)
            .field("open", &self.port.is_some())
            .finish()
    }
}

/// Send one single-register read and return the raw word from the reply.
/// The whole exchange must finish within `timeout`.
fn transact<S: Read + Write + ?Sized>(
    stream: &mut S,
    unit_id: u8,
    function: FunctionCode,
    offset: u16,
    timeout: Duration,
) -> Result<u16, CommunicationError> {
    let deadline = Instant::now() + timeout;
    let (mreq, request) = encode_request(unit_id, function, offset)?;
    log::trace!(
        "-> unit {} fc {} offset {}: {}",
        unit_id,
        function,
        offset,
        String::from_utf8_lossy(&request).trim_end()
    );
    stream.write_all(&request)?;
    stream.flush()?;

    let response = read_frame(stream, deadline)?;
    log::trace!("<- {}", String::from_utf8_lossy(&response).trim_end());
    decode_response(&mreq, unit_id, &response)
}

fn encode_request(
    unit_id: u8,
    function: FunctionCode,
    offset: u16,
) -> Result<(ModbusRequest, Vec<u8>), CommunicationError> {
    let mut mreq = ModbusRequest::new(unit_id, ModbusProto::Ascii);
    let mut request = Vec::new();
    match function {
        FunctionCode::ReadHoldingRegisters => mreq.generate_get_holdings(offset, 1, &mut request),
        FunctionCode::ReadInputRegisters => mreq.generate_get_inputs(offset, 1, &mut request),
    }
    .map_err(|e| CommunicationError::Framing(format!("cannot build request: {:?}", e)))?;

    let mut frame = Vec::new();
    generate_ascii_frame(&request, &mut frame)
        .map_err(|e| CommunicationError::Framing(format!("cannot encode request: {:?}", e)))?;
    Ok((mreq, frame))
}

/// Read bytes up to and including the CR LF that ends an ASCII frame.
/// Up to `MAX_LEADING_NOISE` bytes before the `:` start marker are discarded.
fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    deadline: Instant,
) -> Result<Vec<u8>, CommunicationError> {
    let mut frame = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    let mut discarded = 0usize;
    loop {
        if Instant::now() >= deadline {
            return Err(CommunicationError::Timeout);
        }
        match reader.read(&mut byte) {
            Ok(0) => return Err(CommunicationError::Timeout),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(CommunicationError::Timeout)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        if frame.is_empty() && byte[0] != b':' {
            discarded += 1;
            if discarded > MAX_LEADING_NOISE {
                return Err(CommunicationError::Framing(format!(
                    "no frame start after {} bytes",
                    discarded
                )));
            }
            continue;
        }
        frame.push(byte[0]);
        if frame.ends_with(b"\r\n") {
            return Ok(frame);
        }
        if frame.len() > MAX_ASCII_FRAME_LEN {
            return Err(CommunicationError::Framing(
                "frame exceeds maximum ASCII length".to_string(),
            ));
        }
    }
}

fn decode_response(
    mreq: &ModbusRequest,
    unit_id: u8,
    frame: &[u8],
) -> Result<u16, CommunicationError> {
    let hex = frame
        .strip_prefix(b":")
        .and_then(|f| f.strip_suffix(b"\r\n"))
        .ok_or_else(|| CommunicationError::Framing("missing start or end marker".to_string()))?;
    if hex.is_empty() || hex.len() % 2 != 0 {
        return Err(CommunicationError::Framing(format!(
            "odd or empty payload ({} chars)",
            hex.len()
        )));
    }

    let mut buf: ModbusFrameBuf = [0; 256];
    let len = parse_ascii_frame(hex, hex.len(), &mut buf, 0)
        .map_err(|e| CommunicationError::Framing(format!("invalid hex payload: {:?}", e)))?
        as usize;
    // unit + function + one data byte + LRC at minimum
    if len < 4 {
        return Err(CommunicationError::Framing(format!("short frame ({} bytes)", len)));
    }
    let body = &buf[..len];

    let expected = lrc(&body[..len - 1]);
    let actual = body[len - 1];
    if expected != actual {
        return Err(CommunicationError::Checksum { expected, actual });
    }
    if body[0] != unit_id {
        return Err(CommunicationError::Framing(format!(
            "reply from unit {} while talking to unit {}",
            body[0], unit_id
        )));
    }
    if body[1] & 0x80 != 0 {
        return Err(CommunicationError::Exception(body[2]));
    }

    let mut values: Vec<u16> = Vec::with_capacity(1);
    mreq.parse_u16(body, &mut values).map_err(|e| match e {
        ErrorKind::FrameCRCError => CommunicationError::Checksum { expected, actual },
        other => CommunicationError::Framing(format!("unexpected reply: {:?}", other)),
    })?;
    values
        .first()
        .copied()
        .ok_or_else(|| CommunicationError::Framing("reply carried no registers".to_string()))
}

/// Two's complement of the byte sum
fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)).wrapping_neg()
}
