use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub const VID: u16 = 0x1D50;
pub const PID: u16 = 0x60A7;

/// Largest payload a single write-then-read frame may carry.
pub const MAX_TRANSFER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeType {
    #[serde(rename = "hydrabus")]
    HydraBus,
}

impl BridgeType {
    pub fn profile(self) -> &'static BridgeProfile {
        match self {
            BridgeType::HydraBus => &HYDRABUS,
        }
    }
}

/// Fixed wire constants of one bridge firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeProfile {
    pub name: &'static str,
    pub mode_entry: u8,
    pub binary_ack: &'static [u8],
    pub spi_select: u8,
    pub spi_ack: &'static [u8],
    pub control_ack: u8,
    pub spi_config: u8,
    pub cs_low: u8,
    pub cs_high: u8,
    pub write_then_read: u8,
    pub exit_sequence: &'static [u8],
}

pub static HYDRABUS: BridgeProfile = BridgeProfile {
    name: "HydraBus",
    mode_entry: 0x00,
    binary_ack: b"BBIO1",
    spi_select: 0x01,
    spi_ack: b"SPI1",
    control_ack: 0x01,
    spi_config: 0b1000_0000,
    cs_low: 0b0000_0010,
    cs_high: 0b0000_0011,
    write_then_read: 0b0000_0101,
    exit_sequence: &[0x00, 0x0F],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiDevice {
    Spi1,
    Spi2,
}

impl SpiDevice {
    fn config_bit(self) -> u8 {
        match self {
            SpiDevice::Spi1 => 1,
            SpiDevice::Spi2 => 0,
        }
    }

    fn speed_table(self) -> &'static [SpiSpeed; 8] {
        use SpiSpeed::*;
        match self {
            SpiDevice::Spi1 => &[K320, K650, M1_31, M2_62, M5_25, M10_5, M21, M42],
            SpiDevice::Spi2 => &[K160, K320, K650, M1_31, M2_62, M5_25, M10_5, M21],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    IdleLow,
    IdleHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Leading,
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpiSpeed {
    #[serde(rename = "160k")]
    K160,
    #[serde(rename = "320k")]
    K320,
    #[serde(rename = "650k")]
    K650,
    #[serde(rename = "1.31m")]
    M1_31,
    #[serde(rename = "2.62m")]
    M2_62,
    #[serde(rename = "5.25m")]
    M5_25,
    #[serde(rename = "10.5m")]
    M10_5,
    #[serde(rename = "21m")]
    M21,
    #[serde(rename = "42m")]
    M42,
}

impl SpiSpeed {
    pub fn label(self) -> &'static str {
        match self {
            SpiSpeed::K160 => "160k",
            SpiSpeed::K320 => "320k",
            SpiSpeed::K650 => "650k",
            SpiSpeed::M1_31 => "1.31m",
            SpiSpeed::M2_62 => "2.62m",
            SpiSpeed::M5_25 => "5.25m",
            SpiSpeed::M10_5 => "10.5m",
            SpiSpeed::M21 => "21m",
            SpiSpeed::M42 => "42m",
        }
    }

    /// Speed selector byte for `device`, or None when that device cannot run at this rate.
    pub fn selector(self, device: SpiDevice) -> Option<u8> {
        device
            .speed_table()
            .iter()
            .position(|s| *s == self)
            .map(|i| 0b0110_0000 | i as u8)
    }
}

impl fmt::Display for SpiSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpiConfigError {
    #[error("SPI speed {speed} is not available on {device:?}")]
    SpeedUnavailable { speed: SpiSpeed, device: SpiDevice },
}

/// Bus settings for one session. Built once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpiConfig {
    pub device: SpiDevice,
    pub polarity: Polarity,
    pub phase: Phase,
    pub speed: SpiSpeed,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            device: SpiDevice::Spi2,
            polarity: Polarity::IdleLow,
            phase: Phase::Leading,
            speed: SpiSpeed::M2_62,
        }
    }
}

impl SpiConfig {
    pub fn config_byte(&self, profile: &BridgeProfile) -> u8 {
        let polarity = match self.polarity {
            Polarity::IdleLow => 0,
            Polarity::IdleHigh => 1,
        };
        let phase = match self.phase {
            Phase::Leading => 0,
            Phase::Trailing => 1,
        };
        profile.spi_config | polarity << 3 | phase << 2 | self.device.config_bit()
    }

    pub fn speed_selector(&self) -> Result<u8, SpiConfigError> {
        self.speed
            .selector(self.device)
            .ok_or(SpiConfigError::SpeedUnavailable {
                speed: self.speed,
                device: self.device,
            })
    }
}

/// Header of a write-then-read frame: opcode, write length, read length (big endian).
pub fn write_then_read_header(profile: &BridgeProfile, write_len: u16, read_len: u16) -> [u8; 5] {
    let [w_hi, w_lo] = write_len.to_be_bytes();
    let [r_hi, r_lo] = read_len.to_be_bytes();
    [profile.write_then_read, w_hi, w_lo, r_hi, r_lo]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_byte_bit_packing() {
        let cfg = SpiConfig::default();
        assert_eq!(cfg.config_byte(&HYDRABUS), 0b1000_0000);

        let cfg = SpiConfig {
            device: SpiDevice::Spi1,
            polarity: Polarity::IdleHigh,
            phase: Phase::Trailing,
            speed: SpiSpeed::M42,
        };
        assert_eq!(cfg.config_byte(&HYDRABUS), 0b1000_1101);
    }

    #[test]
    fn test_speed_table_differs_per_device() {
        assert_eq!(SpiSpeed::M2_62.selector(SpiDevice::Spi1), Some(0b0110_0011));
        assert_eq!(SpiSpeed::M2_62.selector(SpiDevice::Spi2), Some(0b0110_0100));
        assert_eq!(SpiSpeed::K160.selector(SpiDevice::Spi1), None);
        assert_eq!(SpiSpeed::M42.selector(SpiDevice::Spi2), None);
    }

    #[test]
    fn test_unavailable_speed_is_a_config_error() {
        let cfg = SpiConfig {
            speed: SpiSpeed::M42,
            ..SpiConfig::default()
        };
        assert_eq!(
            cfg.speed_selector().unwrap_err(),
            SpiConfigError::SpeedUnavailable {
                speed: SpiSpeed::M42,
                device: SpiDevice::Spi2
            }
        );
    }

    #[test]
    fn test_speed_displays_as_cli_label() {
        assert_eq!(SpiSpeed::M2_62.to_string(), "2.62m");
        assert_eq!(SpiSpeed::K160.to_string(), "160k");
    }

    #[test]
    fn test_write_then_read_header() {
        assert_eq!(
            write_then_read_header(&HYDRABUS, 4, 4),
            [0x05, 0x00, 0x04, 0x00, 0x04]
        );
        assert_eq!(
            write_then_read_header(&HYDRABUS, 3, 0x0102),
            [0x05, 0x00, 0x03, 0x01, 0x02]
        );
    }
}
