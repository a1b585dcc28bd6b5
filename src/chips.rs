use std::fmt;

use serde::Serialize;

/// ISP opcodes shared by the classic AVR serial programming instruction set.
pub const ISP_PROGRAM_ENABLE: [u8; 4] = [0xAC, 0x53, 0x00, 0x00];
pub const ISP_READ_SIGNATURE: u8 = 0x30;
pub const ISP_READ_FLASH_LOW: u8 = 0x20;
pub const ISP_READ_FLASH_HIGH: u8 = 0x28;

/// Largest word address the three-byte ISP read command can carry (14 bits).
pub const MAX_FLASH_WORDS: usize = 1 << 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipType {
    Atmega328p,
}

impl ChipType {
    pub const ALL: &'static [ChipType] = &[ChipType::Atmega328p];

    pub fn profile(self) -> &'static ChipProfile {
        match self {
            ChipType::Atmega328p => &ATMEGA328P,
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Signature(pub [u8; 3]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a:02X} {b:02X} {c:02X}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChipProfile {
    pub chip: ChipType,
    /// Stable lowercase identifier used on the command line.
    pub id: &'static str,
    pub name: &'static str,
    pub signature: Signature,
    /// Program memory size in 16-bit words.
    pub flash_words: usize,
}

impl ChipProfile {
    pub fn image_len(&self) -> usize {
        self.flash_words * 2
    }
}

pub static ATMEGA328P: ChipProfile = ChipProfile {
    chip: ChipType::Atmega328p,
    id: "atmega328p",
    name: "ATmega328P",
    signature: Signature([0x1E, 0x95, 0x0F]),
    flash_words: 16_384,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_table_is_consistent() {
        for chip in ChipType::ALL {
            let p = chip.profile();
            assert_eq!(p.chip, *chip);
            assert!(p.flash_words <= MAX_FLASH_WORDS);
            assert_eq!(p.id, p.name.to_ascii_lowercase());
        }
    }

    #[test]
    fn test_atmega328p_profile() {
        let p = ChipType::Atmega328p.profile();
        assert_eq!(p.signature, Signature([0x1E, 0x95, 0x0F]));
        assert_eq!(p.image_len(), 32_768);
        assert_eq!(p.signature.to_string(), "1E 95 0F");
    }
}
