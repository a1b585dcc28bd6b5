use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;

pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("transport is closed")]
    Closed,
}

/// Blocking byte channel to the bridge device.
///
/// `read` never blocks past `timeout`: it returns whatever arrived in time,
/// possibly nothing. Deciding whether a short read is fatal is up to the caller.
pub trait ByteTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Drop anything received but not yet read.
    fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);
}

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(500))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| TransportError::Open {
                port: port_name.to_string(),
                source: e,
            })?;

        tracing::info!(port = port_name, baud, "serial port opened");

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl ByteTransport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut got = 0usize;

        while got < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)?;
            match port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(k) => got += k,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buf.truncate(got);
        Ok(buf)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.name, "serial port closed");
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
