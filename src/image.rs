use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::chips;
use crate::isp::{FlashAddress, IspError, IspSequencer, WordHalf};
use crate::transport::ByteTransport;

pub const PROGRESS_INTERVAL: usize = 0x100;

/// Program memory as stored on the chip: low byte then high byte per word,
/// words in ascending address order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    data: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to move image into place at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

impl FlashImage {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn words(&self) -> usize {
        self.data.len() / 2
    }

    /// (low, high) bytes of word `k`.
    pub fn word(&self, k: usize) -> Option<(u8, u8)> {
        let lo = *self.data.get(2 * k)?;
        let hi = *self.data.get(2 * k + 1)?;
        Some((lo, hi))
    }

    /// Write the image so that `path` either holds the complete image or is untouched.
    pub fn write_atomic(&self, path: &Path) -> Result<(), ImageError> {
        let io_err = |source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&self.data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|source| ImageError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %path.display(), bytes = self.data.len(), "image written");
        Ok(())
    }
}

/// Read `words` program-memory words, low byte before high byte, in ascending order.
///
/// `on_progress(address, words)` fires every `interval` addresses and once at the end.
pub fn assemble<T, F>(
    isp: &mut IspSequencer<'_, T>,
    words: usize,
    interval: usize,
    mut on_progress: F,
) -> Result<FlashImage, IspError>
where
    T: ByteTransport,
    F: FnMut(usize, usize),
{
    let max = isp.chip().flash_words.min(chips::MAX_FLASH_WORDS);
    if words > max {
        return Err(IspError::SweepTooLarge { words, max });
    }
    let interval = interval.max(1);

    let mut data = Vec::with_capacity(words * 2);
    for a in 0..words {
        if a % interval == 0 {
            on_progress(a, words);
        }
        let address = FlashAddress::new(a as u16).ok_or(IspError::SweepTooLarge { words, max })?;
        data.push(isp.read_flash_byte(address, WordHalf::Low)?);
        data.push(isp.read_flash_byte(address, WordHalf::High)?);
    }
    on_progress(words, words);

    Ok(FlashImage { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeError, BridgeSession, SessionOptions};
    use crate::chips::ATMEGA328P;
    use crate::hydrabus::{SpiConfig, HYDRABUS};
    use crate::sim::{Fault, SimBridge};

    fn selected(sim: &SimBridge) -> BridgeSession<SimBridge> {
        let mut s = BridgeSession::new(sim.clone(), &HYDRABUS, SessionOptions::default());
        s.enter_binary_mode().unwrap();
        s.enter_spi_mode().unwrap();
        s.configure_spi(SpiConfig::default()).unwrap();
        s.select_low().unwrap();
        s
    }

    #[test]
    fn test_full_sweep_matches_chip_contents() {
        let sim = SimBridge::atmega328p();
        let mut s = selected(&sim);
        let mut isp = IspSequencer::program_enable(&mut s, &ATMEGA328P).unwrap();

        let mut progress = Vec::new();
        let img = assemble(&mut isp, 16_384, PROGRESS_INTERVAL, |a, n| {
            progress.push((a, n))
        })
        .unwrap();

        assert_eq!(img.len(), 32_768);
        for a in 0..16_384usize {
            assert_eq!(img.as_bytes()[2 * a], (a % 256) as u8);
            assert_eq!(img.as_bytes()[2 * a + 1], ((a >> 8) % 256) as u8);
        }
        assert_eq!(progress.len(), 16_384 / PROGRESS_INTERVAL + 1);
        assert_eq!(progress[1], (0x100, 16_384));
        assert_eq!(progress.last(), Some(&(16_384, 16_384)));
    }

    #[test]
    fn test_each_address_read_once_low_then_high() {
        let sim = SimBridge::atmega328p();
        let mut s = selected(&sim);
        let mut isp = IspSequencer::program_enable(&mut s, &ATMEGA328P).unwrap();

        let img = assemble(&mut isp, 300, PROGRESS_INTERVAL, |_, _| {}).unwrap();
        assert_eq!(img.words(), 300);

        let expected: Vec<(u8, u16)> = (0..300u16)
            .flat_map(|a| [(0x20, a), (0x28, a)])
            .collect();
        assert_eq!(sim.flash_reads(), expected);
        assert_eq!(img.word(0x12B), Some((0x2B, 0x01)));
        assert_eq!(img.word(300), None);
    }

    #[test]
    fn test_sweep_stops_at_first_failure() {
        let sim = SimBridge::atmega328p();
        let mut s = selected(&sim);
        let mut isp = IspSequencer::program_enable(&mut s, &ATMEGA328P).unwrap();
        let before = sim.replies();
        // Fourth flash read: address 1, high half.
        sim.inject(Fault::DropReply {
            nth_reply: before + 4,
        });

        let err = assemble(&mut isp, 16, PROGRESS_INTERVAL, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            IspError::Bridge(BridgeError::ShortRead { ref step, .. }) if step == "read flash high @ 0x0001"
        ));
        assert_eq!(sim.flash_reads().len(), 4);
    }

    #[test]
    fn test_sweep_larger_than_chip_is_rejected() {
        let sim = SimBridge::atmega328p();
        let mut s = selected(&sim);
        let mut isp = IspSequencer::program_enable(&mut s, &ATMEGA328P).unwrap();

        let err = assemble(&mut isp, 16_385, PROGRESS_INTERVAL, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            IspError::SweepTooLarge {
                words: 16_385,
                max: 16_384
            }
        ));
        assert!(sim.flash_reads().is_empty());
    }

    #[test]
    fn test_write_atomic_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump").join("flash.bin");

        FlashImage::from_bytes(vec![1, 2, 3, 4])
            .write_atomic(&path)
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);

        FlashImage::from_bytes(vec![9, 9])
            .write_atomic(&path)
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 9]);

        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_reports_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = FlashImage::from_bytes(vec![0; 4])
            .write_atomic(&blocker.join("flash.bin"))
            .unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }
}
