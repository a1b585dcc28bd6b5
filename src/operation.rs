use std::path::PathBuf;

use crate::{chips::Signature, hydrabus::SpiConfig};

#[derive(Debug, Clone)]
pub enum DumpEvent {
    PortOpen {
        port: String,
        baud: u32,
    },
    BinaryMode {
        attempts: usize,
    },
    SpiMode,
    BusConfigured {
        config: SpiConfig,
    },
    ChipSelect {
        asserted: bool,
    },

    ProgramEnabled {
        reply: [u8; 4],
    },
    SignatureByte {
        index: u8,
        value: u8,
    },
    SignatureVerified {
        chip: &'static str,
        signature: Signature,
    },

    ReadStart {
        words: usize,
    },
    Progress {
        address: usize,
        words: usize,
    },
    ReadDone {
        bytes: usize,
    },

    ImageWritten {
        path: PathBuf,
        bytes: usize,
    },
    SessionClosed,
}
