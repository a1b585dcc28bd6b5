use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::hydrabus::{self, BridgeProfile, SpiConfig, SpiConfigError};
use crate::traffic::{hex_bytes, TrafficObserver};
use crate::transport::{ByteTransport, TransportError};

pub const STEP_BINARY_MODE: &str = "binary mode entry";
pub const STEP_SPI_MODE: &str = "SPI mode entry";
pub const STEP_SPI_CONFIG: &str = "SPI configuration";
pub const STEP_SPI_SPEED: &str = "SPI speed";
pub const STEP_CS_LOW: &str = "cannot switch chip-select low";
pub const STEP_CS_HIGH: &str = "cannot switch chip-select high";
pub const STEP_EXIT: &str = "terminal mode restore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMode {
    Terminal,
    Binary,
    Spi,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on every acknowledgment/reply read.
    pub read_timeout: Duration,
    /// How many mode-entry bytes to send before giving up.
    pub entry_attempts: usize,
    /// How long to wait for the binary-mode banner after each entry byte.
    pub entry_poll: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            entry_attempts: 20,
            entry_poll: Duration::from_millis(50),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{step}: expected [{}], got [{}]", hex_bytes(.expected), hex_bytes(.actual))]
    Mismatch {
        step: String,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    #[error("{step}: short read, expected {expected} byte(s), got {got}")]
    ShortRead {
        step: String,
        expected: usize,
        got: usize,
    },

    #[error("{step}: bridge is in {actual:?} mode, expected {expected:?}")]
    WrongMode {
        step: String,
        expected: BridgeMode,
        actual: BridgeMode,
    },

    #[error("{step}: transfer too large (write {write}, read {read}, max {max})")]
    TransferTooLarge {
        step: String,
        write: usize,
        read: usize,
        max: usize,
    },

    #[error(transparent)]
    Config(#[from] SpiConfigError),
}

impl BridgeError {
    /// True when the device stopped answering rather than answering wrong.
    pub fn is_short_read(&self) -> bool {
        matches!(self, BridgeError::ShortRead { .. })
    }
}

fn expect_reply(step: &str, expected: &[u8], actual: Vec<u8>) -> Result<(), BridgeError> {
    if actual.len() < expected.len() {
        return Err(BridgeError::ShortRead {
            step: step.to_string(),
            expected: expected.len(),
            got: actual.len(),
        });
    }
    if actual != expected {
        return Err(BridgeError::Mismatch {
            step: step.to_string(),
            expected: expected.to_vec(),
            actual,
        });
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// One connection to the bridge, from terminal mode to terminal mode.
///
/// Once the first mode-entry byte has gone out, the terminal-mode restore
/// sequence is owed: it is sent exactly once, by [`BridgeSession::close`] or on drop.
pub struct BridgeSession<T: ByteTransport> {
    transport: T,
    profile: &'static BridgeProfile,
    opts: SessionOptions,
    mode: BridgeMode,
    bus: Option<SpiConfig>,
    chip_selected: bool,
    exit_owed: bool,
    observer: Option<Box<dyn TrafficObserver>>,
}

impl<T: ByteTransport> BridgeSession<T> {
    pub fn new(transport: T, profile: &'static BridgeProfile, opts: SessionOptions) -> Self {
        Self {
            transport,
            profile,
            opts,
            mode: BridgeMode::Terminal,
            bus: None,
            chip_selected: false,
            exit_owed: false,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TrafficObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    pub fn bus(&self) -> Option<&SpiConfig> {
        self.bus.as_ref()
    }

    pub fn chip_selected(&self) -> bool {
        self.chip_selected
    }

    /// Resynchronize into binary mode. Returns how many entry bytes it took.
    ///
    /// The device may be anywhere in a terminal line, so the entry byte is
    /// repeated until the banner shows up somewhere in what came back.
    pub fn enter_binary_mode(&mut self) -> Result<usize, BridgeError> {
        let entry = [self.profile.mode_entry];
        let banner = self.profile.binary_ack;
        let mut seen: Vec<u8> = Vec::new();

        for attempt in 1..=self.opts.entry_attempts {
            self.exit_owed = true;
            self.notify_before(STEP_BINARY_MODE, &entry);
            self.transport.write(&entry)?;
            let got = self.transport.read(banner.len(), self.opts.entry_poll)?;
            self.notify_after(STEP_BINARY_MODE, &got);
            seen.extend_from_slice(&got);

            if contains(&seen, banner) {
                self.drain_entry_echoes()?;
                self.mode = BridgeMode::Binary;
                self.bus = None;
                self.chip_selected = false;
                tracing::debug!(attempt, "bridge in binary mode");
                return Ok(attempt);
            }
        }

        tracing::debug!(
            attempts = self.opts.entry_attempts,
            received = seen.len(),
            "no binary mode banner"
        );
        if seen.is_empty() {
            return Err(BridgeError::ShortRead {
                step: STEP_BINARY_MODE.to_string(),
                expected: banner.len(),
                got: 0,
            });
        }
        let tail = seen.len().saturating_sub(16);
        Err(BridgeError::Mismatch {
            step: STEP_BINARY_MODE.to_string(),
            expected: banner.to_vec(),
            actual: seen.split_off(tail),
        })
    }

    pub fn enter_spi_mode(&mut self) -> Result<(), BridgeError> {
        self.require_mode(STEP_SPI_MODE, BridgeMode::Binary)?;
        let reply = self.exchange(
            STEP_SPI_MODE,
            &[self.profile.spi_select],
            self.profile.spi_ack.len(),
        )?;
        expect_reply(STEP_SPI_MODE, self.profile.spi_ack, reply)?;
        self.mode = BridgeMode::Spi;
        tracing::debug!("bridge in SPI mode");
        Ok(())
    }

    /// Apply `cfg` as a whole. Nothing is recorded unless both bytes are acknowledged.
    pub fn configure_spi(&mut self, cfg: SpiConfig) -> Result<(), BridgeError> {
        self.require_mode(STEP_SPI_CONFIG, BridgeMode::Spi)?;
        let speed = cfg.speed_selector()?;
        self.bus = None;

        self.control(STEP_SPI_CONFIG, cfg.config_byte(self.profile))?;
        self.control(STEP_SPI_SPEED, speed)?;

        self.bus = Some(cfg);
        tracing::debug!(?cfg, "SPI configured");
        Ok(())
    }

    pub fn select_low(&mut self) -> Result<(), BridgeError> {
        self.require_mode(STEP_CS_LOW, BridgeMode::Spi)?;
        self.control(STEP_CS_LOW, self.profile.cs_low)?;
        self.chip_selected = true;
        Ok(())
    }

    pub fn select_high(&mut self) -> Result<(), BridgeError> {
        self.require_mode(STEP_CS_HIGH, BridgeMode::Spi)?;
        self.control(STEP_CS_HIGH, self.profile.cs_high)?;
        self.chip_selected = false;
        Ok(())
    }

    /// Write `payload` on the SPI bus, then clock in `read_len` bytes.
    pub fn transfer(
        &mut self,
        step: &str,
        payload: &[u8],
        read_len: usize,
    ) -> Result<Vec<u8>, BridgeError> {
        self.require_mode(step, BridgeMode::Spi)?;
        if payload.len() > hydrabus::MAX_TRANSFER || read_len > hydrabus::MAX_TRANSFER {
            return Err(BridgeError::TransferTooLarge {
                step: step.to_string(),
                write: payload.len(),
                read: read_len,
                max: hydrabus::MAX_TRANSFER,
            });
        }

        let header =
            hydrabus::write_then_read_header(self.profile, payload.len() as u16, read_len as u16);
        let mut frame = Vec::with_capacity(header.len() + payload.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(payload);

        self.notify_before(step, &frame);
        self.transport.write(&frame)?;

        let ack = self.transport.read(1, self.opts.read_timeout)?;
        if let Err(e) = expect_reply(step, &[self.profile.control_ack], ack.clone()) {
            self.notify_after(step, &ack);
            return Err(e);
        }

        let reply = self.transport.read(read_len, self.opts.read_timeout)?;
        let mut seen = ack;
        seen.extend_from_slice(&reply);
        self.notify_after(step, &seen);

        if reply.len() < read_len {
            return Err(BridgeError::ShortRead {
                step: step.to_string(),
                expected: read_len,
                got: reply.len(),
            });
        }
        tracing::trace!(step, reply = %hex_bytes(&reply), "transfer");
        Ok(reply)
    }

    /// Every entry byte sent after the device switched is answered with another
    /// banner, and those may still be in flight when the first one matched.
    fn drain_entry_echoes(&mut self) -> Result<(), BridgeError> {
        let mut dropped = 0usize;
        for _ in 0..self.opts.entry_attempts {
            let extra = self.transport.read(64, self.opts.entry_poll)?;
            if extra.is_empty() {
                break;
            }
            dropped += extra.len();
        }
        self.transport.clear_input()?;
        if dropped > 0 {
            tracing::trace!(dropped, "discarded late binary mode banners");
        }
        Ok(())
    }

    /// Send the terminal-mode restore sequence if it is still owed.
    pub fn exit_binary_mode(&mut self) -> Result<(), BridgeError> {
        if !self.exit_owed {
            return Ok(());
        }
        self.exit_owed = false;
        self.mode = BridgeMode::Terminal;
        self.bus = None;
        self.chip_selected = false;

        let seq = self.profile.exit_sequence;
        self.notify_before(STEP_EXIT, seq);
        self.transport.write(seq)?;
        self.notify_after(STEP_EXIT, &[]);
        tracing::debug!("bridge back in terminal mode");
        Ok(())
    }

    /// Restore terminal mode and release the transport.
    pub fn close(mut self) -> Result<(), BridgeError> {
        let r = self.exit_binary_mode();
        self.transport.close();
        r
    }

    fn control(&mut self, step: &str, byte: u8) -> Result<(), BridgeError> {
        let reply = self.exchange(step, &[byte], 1)?;
        expect_reply(step, &[self.profile.control_ack], reply)
    }

    fn exchange(
        &mut self,
        step: &str,
        command: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>, BridgeError> {
        self.notify_before(step, command);
        self.transport.write(command)?;
        let reply = self.transport.read(reply_len, self.opts.read_timeout)?;
        self.notify_after(step, &reply);
        Ok(reply)
    }

    fn require_mode(&self, step: &str, expected: BridgeMode) -> Result<(), BridgeError> {
        if self.mode != expected {
            return Err(BridgeError::WrongMode {
                step: step.to_string(),
                expected,
                actual: self.mode,
            });
        }
        Ok(())
    }

    fn notify_before(&mut self, step: &str, command: &[u8]) {
        if let Some(o) = self.observer.as_mut() {
            o.before(step, command);
        }
    }

    fn notify_after(&mut self, step: &str, reply: &[u8]) {
        if let Some(o) = self.observer.as_mut() {
            o.after(step, reply);
        }
    }
}

impl<T: ByteTransport> Drop for BridgeSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.exit_binary_mode() {
            tracing::warn!("unable to restore terminal mode: {e}");
        }
        self.transport.close();
    }
}
