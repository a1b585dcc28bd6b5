use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::{
    bridge::{BridgeError, BridgeSession, SessionOptions},
    chips::ChipType,
    hydrabus::{BridgeType, SpiConfig, SpiConfigError},
    image::{self, FlashImage, ImageError},
    isp::{IspError, IspSequencer},
    operation::DumpEvent,
    targets::{self, PortInfo},
    terminal::{self, Exchange},
    traffic::{TrafficLog, TrafficObserver},
    transport::{ByteTransport, SerialTransport, TransportError, DEFAULT_BAUD},
};

#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Serial port of the bridge. `None` picks the only HydraBus attached.
    ///
    /// Example: "COM4" or "/dev/ttyACM0".
    pub port: Option<String>,
    pub baud: u32,

    pub bridge: BridgeType,
    pub chip: ChipType,
    pub spi: SpiConfig,

    pub session: SessionOptions,

    /// Addresses between two progress events.
    pub progress_interval: usize,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD,
            bridge: BridgeType::HydraBus,
            chip: ChipType::Atmega328p,
            spi: SpiConfig::default(),
            session: SessionOptions::default(),
            progress_interval: image::PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DumpErrorKind {
    Connection,
    Protocol,
    Identity,
    Output,
    InvalidConfig,
}

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("no HydraBus found")]
    NoDevice,

    #[error("multiple HydraBus devices found ({count}); use --port")]
    AmbiguousPort { count: usize },

    #[error("port discovery failed: {source}")]
    DiscoveryFailed {
        #[source]
        source: targets::DiscoverError,
    },

    #[error("unable to open bridge: {source}")]
    Open {
        #[source]
        source: TransportError,
    },

    #[error("invalid configuration: {source}")]
    InvalidConfig {
        #[source]
        source: SpiConfigError,
    },

    #[error("bridge: {source}")]
    Bridge {
        #[source]
        source: BridgeError,
    },

    #[error("target: {source}")]
    Isp {
        #[source]
        source: IspError,
    },

    #[error("unable to save image: {source}")]
    Output {
        #[source]
        source: ImageError,
    },

    #[error("terminal probe: {source}")]
    Probe {
        #[source]
        source: TransportError,
    },

    #[error("unable to create traffic log {path}: {source}")]
    TrafficLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DumpError {
    pub fn kind(&self) -> DumpErrorKind {
        match self {
            DumpError::NoDevice
            | DumpError::DiscoveryFailed { .. }
            | DumpError::Open { .. }
            | DumpError::Probe { .. } => DumpErrorKind::Connection,
            DumpError::AmbiguousPort { .. } | DumpError::InvalidConfig { .. } => {
                DumpErrorKind::InvalidConfig
            }
            DumpError::Bridge { source } => bridge_kind(source),
            DumpError::Isp { source } => match source {
                IspError::Identity { .. } => DumpErrorKind::Identity,
                IspError::SweepTooLarge { .. } => DumpErrorKind::InvalidConfig,
                IspError::Bridge(b) => bridge_kind(b),
                IspError::SignatureIndex(_) | IspError::AddressOutOfRange { .. } => {
                    DumpErrorKind::Protocol
                }
            },
            DumpError::Output { .. } | DumpError::TrafficLog { .. } => DumpErrorKind::Output,
        }
    }
}

fn bridge_kind(e: &BridgeError) -> DumpErrorKind {
    match e {
        BridgeError::Transport(_) => DumpErrorKind::Connection,
        BridgeError::Config(_) => DumpErrorKind::InvalidConfig,
        _ => DumpErrorKind::Protocol,
    }
}

impl From<BridgeError> for DumpError {
    fn from(source: BridgeError) -> Self {
        DumpError::Bridge { source }
    }
}

impl From<IspError> for DumpError {
    fn from(source: IspError) -> Self {
        match source {
            IspError::Bridge(source) => DumpError::Bridge { source },
            source => DumpError::Isp { source },
        }
    }
}

/// Dump the chip's program memory through a HydraBus on a serial port into `output`.
pub fn dump_to_file<F>(
    opts: &DumpOptions,
    output: &Path,
    traffic_log: Option<&Path>,
    mut on_event: F,
) -> Result<FlashImage, DumpError>
where
    F: FnMut(DumpEvent),
{
    validate(opts)?;
    let port = resolve_port(opts)?;

    let observer = match traffic_log {
        Some(path) => Some(open_traffic_log(path)?),
        None => None,
    };

    let transport =
        SerialTransport::open(&port, opts.baud).map_err(|e| DumpError::Open { source: e })?;
    on_event(DumpEvent::PortOpen {
        port,
        baud: opts.baud,
    });

    dump_with_transport(transport, opts, output, observer, on_event)
}

/// Like [`dump_to_file`], over an already open transport.
pub fn dump_with_transport<T, F>(
    transport: T,
    opts: &DumpOptions,
    output: &Path,
    observer: Option<Box<dyn TrafficObserver>>,
    mut on_event: F,
) -> Result<FlashImage, DumpError>
where
    T: ByteTransport,
    F: FnMut(DumpEvent),
{
    let image = read_flash(transport, opts, observer, &mut on_event)?;

    image
        .write_atomic(output)
        .map_err(|e| DumpError::Output { source: e })?;
    on_event(DumpEvent::ImageWritten {
        path: output.to_path_buf(),
        bytes: image.len(),
    });
    Ok(image)
}

/// Run one bridge session and return the chip's full program memory.
///
/// The bridge is back in terminal mode when this returns, whatever the outcome.
pub fn read_flash<T, F>(
    transport: T,
    opts: &DumpOptions,
    observer: Option<Box<dyn TrafficObserver>>,
    on_event: &mut F,
) -> Result<FlashImage, DumpError>
where
    T: ByteTransport,
    F: FnMut(DumpEvent),
{
    validate(opts)?;

    let mut session = BridgeSession::new(transport, opts.bridge.profile(), opts.session.clone());
    if let Some(o) = observer {
        session = session.with_observer(o);
    }

    let result = run_session(&mut session, opts, on_event);

    match session.close() {
        Ok(()) => on_event(DumpEvent::SessionClosed),
        Err(e) => tracing::warn!("unable to restore terminal mode: {e}"),
    }
    result
}

fn run_session<T, F>(
    session: &mut BridgeSession<T>,
    opts: &DumpOptions,
    on_event: &mut F,
) -> Result<FlashImage, DumpError>
where
    T: ByteTransport,
    F: FnMut(DumpEvent),
{
    let attempts = session.enter_binary_mode()?;
    on_event(DumpEvent::BinaryMode { attempts });

    session.enter_spi_mode()?;
    on_event(DumpEvent::SpiMode);

    session.configure_spi(opts.spi)?;
    on_event(DumpEvent::BusConfigured { config: opts.spi });

    session.select_low()?;
    on_event(DumpEvent::ChipSelect { asserted: true });

    let chip = opts.chip.profile();
    let image = {
        let mut isp = IspSequencer::program_enable(session, chip)?;
        on_event(DumpEvent::ProgramEnabled {
            reply: isp.enable_reply(),
        });

        let signature =
            isp.verify_signature(|index, value| on_event(DumpEvent::SignatureByte { index, value }))?;
        on_event(DumpEvent::SignatureVerified {
            chip: chip.name,
            signature,
        });
        tracing::info!(chip = chip.name, %signature, "signature verified");

        on_event(DumpEvent::ReadStart {
            words: chip.flash_words,
        });
        image::assemble(
            &mut isp,
            chip.flash_words,
            opts.progress_interval,
            |address, words| on_event(DumpEvent::Progress { address, words }),
        )?
    };
    on_event(DumpEvent::ReadDone { bytes: image.len() });

    session.select_high()?;
    on_event(DumpEvent::ChipSelect { asserted: false });

    Ok(image)
}

/// Run a console script against the bridge in terminal mode.
///
/// Only `port` and `baud` of `opts` are used.
pub fn probe_port<F>(
    opts: &DumpOptions,
    script: &[String],
    settle: Duration,
    on_exchange: F,
) -> Result<Vec<Exchange>, DumpError>
where
    F: FnMut(&Exchange),
{
    let port = resolve_port(opts)?;
    let mut transport =
        SerialTransport::open(&port, opts.baud).map_err(|e| DumpError::Open { source: e })?;
    let out = terminal::run_script(&mut transport, script, settle, on_exchange)
        .map_err(|e| DumpError::Probe { source: e })?;
    transport.close();
    Ok(out)
}

fn resolve_port(opts: &DumpOptions) -> Result<String, DumpError> {
    match &opts.port {
        Some(p) => Ok(p.clone()),
        None => {
            let ports = targets::discover_ports()
                .map_err(|e| DumpError::DiscoveryFailed { source: e })?;
            pick_port(&ports)
        }
    }
}

fn validate(opts: &DumpOptions) -> Result<(), DumpError> {
    opts.spi
        .speed_selector()
        .map_err(|e| DumpError::InvalidConfig { source: e })?;
    Ok(())
}

fn open_traffic_log(path: &Path) -> Result<Box<dyn TrafficObserver>, DumpError> {
    let log = TrafficLog::create(path).map_err(|e| DumpError::TrafficLog {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Box::new(log))
}

pub(crate) fn pick_port(ports: &[PortInfo]) -> Result<String, DumpError> {
    let hydrabus: Vec<&PortInfo> = ports.iter().filter(|p| p.is_hydrabus).collect();
    match hydrabus.as_slice() {
        [] => Err(DumpError::NoDevice),
        [one] => Ok(one.port_name.clone()),
        many => Err(DumpError::AmbiguousPort { count: many.len() }),
    }
}
