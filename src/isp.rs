use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::bridge::{BridgeError, BridgeSession};
use crate::chips::{self, ChipProfile, Signature};
use crate::transport::ByteTransport;

pub const STEP_PROGRAM_ENABLE: &str = "program enable";

/// Word address in program memory (14 bits), sent as segment and offset bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FlashAddress(u16);

impl FlashAddress {
    pub fn new(addr: u16) -> Option<Self> {
        if (addr as usize) < chips::MAX_FLASH_WORDS {
            Some(Self(addr))
        } else {
            None
        }
    }

    pub fn from_parts(segment: u8, offset: u8) -> Option<Self> {
        Self::new(u16::from_be_bytes([segment, offset]))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn segment(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn offset(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for FlashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WordHalf {
    Low,
    High,
}

impl WordHalf {
    pub fn opcode(self) -> u8 {
        match self {
            WordHalf::Low => chips::ISP_READ_FLASH_LOW,
            WordHalf::High => chips::ISP_READ_FLASH_HIGH,
        }
    }
}

impl fmt::Display for WordHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WordHalf::Low => "low",
            WordHalf::High => "high",
        })
    }
}

#[derive(Error, Debug)]
pub enum IspError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(
        "signature byte {index} mismatch: expected 0x{expected:02X}, got 0x{actual:02X} (wrong or missing chip?)"
    )]
    Identity { index: u8, expected: u8, actual: u8 },

    #[error("signature index {0} out of range")]
    SignatureIndex(u8),

    #[error("flash address {address} is beyond the chip's {words} words")]
    AddressOutOfRange { address: FlashAddress, words: usize },

    #[error("cannot read {words} words, chip has {max}")]
    SweepTooLarge { words: usize, max: usize },
}

/// ISP command sequencer for one chip-selected target.
///
/// Only obtainable through [`IspSequencer::program_enable`], so every read
/// is issued after exactly one program-enable handshake.
pub struct IspSequencer<'s, T: ByteTransport> {
    session: &'s mut BridgeSession<T>,
    chip: &'static ChipProfile,
    enable_reply: [u8; 4],
}

impl<'s, T: ByteTransport> IspSequencer<'s, T> {
    pub fn program_enable(
        session: &'s mut BridgeSession<T>,
        chip: &'static ChipProfile,
    ) -> Result<Self, IspError> {
        let reply = session.transfer(STEP_PROGRAM_ENABLE, &chips::ISP_PROGRAM_ENABLE, 4)?;
        let mut enable_reply = [0u8; 4];
        enable_reply.copy_from_slice(&reply);
        tracing::debug!(reply = ?enable_reply, "programming enabled");

        Ok(Self {
            session,
            chip,
            enable_reply,
        })
    }

    /// Bytes clocked back during program enable. Diagnostic only.
    pub fn enable_reply(&self) -> [u8; 4] {
        self.enable_reply
    }

    pub fn chip(&self) -> &'static ChipProfile {
        self.chip
    }

    /// Read signature byte `index` and check it against the chip profile.
    pub fn read_signature_byte(&mut self, index: u8) -> Result<u8, IspError> {
        let expected = *self
            .chip
            .signature
            .0
            .get(index as usize)
            .ok_or(IspError::SignatureIndex(index))?;

        let step = format!("signature byte {index}");
        let reply = self
            .session
            .transfer(&step, &[chips::ISP_READ_SIGNATURE, 0x00, index], 1)?;
        let actual = reply[0];

        if actual != expected {
            return Err(IspError::Identity {
                index,
                expected,
                actual,
            });
        }
        Ok(actual)
    }

    /// Check all three signature bytes in order, stopping at the first mismatch.
    pub fn verify_signature<F>(&mut self, mut on_byte: F) -> Result<Signature, IspError>
    where
        F: FnMut(u8, u8),
    {
        let mut sig = [0u8; 3];
        for (i, slot) in sig.iter_mut().enumerate() {
            let index = i as u8;
            *slot = self.read_signature_byte(index)?;
            on_byte(index, *slot);
        }
        Ok(Signature(sig))
    }

    pub fn read_flash_byte(&mut self, address: FlashAddress, half: WordHalf) -> Result<u8, IspError> {
        if address.value() as usize >= self.chip.flash_words {
            return Err(IspError::AddressOutOfRange {
                address,
                words: self.chip.flash_words,
            });
        }

        let step = format!("read flash {half} @ {address}");
        let reply = self.session.transfer(
            &step,
            &[half.opcode(), address.segment(), address.offset()],
            1,
        )?;
        Ok(reply[0])
    }
}
