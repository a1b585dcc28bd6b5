use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use hydra_isp_dump::terminal;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum JsonProgressArg {
    /// Emit every progress event (one per 256 words).
    All,
    /// Emit a progress event only when the percentage changes.
    Percent,
    /// Do not emit progress events.
    None,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ChipArg {
    Atmega328p,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SpiDeviceArg {
    Spi1,
    Spi2,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PolarityArg {
    IdleLow,
    IdleHigh,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PhaseArg {
    Leading,
    Trailing,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SpeedArg {
    #[value(name = "160k")]
    K160,
    #[value(name = "320k")]
    K320,
    #[value(name = "650k")]
    K650,
    #[value(name = "1.31m")]
    M1_31,
    #[value(name = "2.62m")]
    M2_62,
    #[value(name = "5.25m")]
    M5_25,
    #[value(name = "10.5m")]
    M10_5,
    #[value(name = "21m")]
    M21,
    #[value(name = "42m")]
    M42,
}

#[derive(Parser)]
#[command(name = "hydra-isp-dump")]
#[command(about = "Read AVR program memory over ISP through a HydraBus SPI bridge")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Dump the whole flash of the target chip to a binary file.
    Dump(DumpArgs),

    /// Send console commands to the bridge in terminal mode and show the replies.
    Probe(ProbeArgs),

    /// List USB serial ports, flagging HydraBus devices.
    List(ListArgs),

    /// Show the supported chips.
    Chips(ChipsArgs),
}

#[derive(Parser, Clone)]
pub struct ConnectionArgs {
    /// Serial port of the HydraBus (e.g. COM4, /dev/ttyACM0).
    ///
    /// Defaults to the only HydraBus attached.
    #[arg(long, short)]
    pub port: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
}

#[derive(Parser, Clone)]
pub struct BusArgs {
    /// Target chip.
    #[arg(long, value_enum, default_value_t = ChipArg::Atmega328p)]
    pub chip: ChipArg,

    /// HydraBus SPI peripheral wired to the target.
    #[arg(long, value_enum, default_value_t = SpiDeviceArg::Spi2)]
    pub device: SpiDeviceArg,

    /// Clock idle level.
    #[arg(long, value_enum, default_value_t = PolarityArg::IdleLow)]
    pub polarity: PolarityArg,

    /// Clock edge data is sampled on.
    #[arg(long, value_enum, default_value_t = PhaseArg::Leading)]
    pub phase: PhaseArg,

    /// SPI clock rate. Not every rate exists on both devices.
    #[arg(long, value_enum, default_value_t = SpeedArg::M2_62)]
    pub speed: SpeedArg,

    /// Max time to wait for each reply from the bridge.
    #[arg(long, default_value_t = 1000)]
    pub read_timeout_ms: u64,

    /// Binary-mode entry bytes to send before giving up.
    #[arg(long, default_value_t = 20)]
    pub entry_attempts: usize,

    /// Time to wait for the binary-mode banner after each entry byte.
    #[arg(long, default_value_t = 50)]
    pub entry_poll_ms: u64,
}

#[derive(Parser)]
pub struct DumpArgs {
    /// Output file for the flash image (parent directories are created).
    pub output: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub bus: BusArgs,

    /// Record every framed command/reply pair to this file.
    #[arg(long)]
    pub traffic_log: Option<PathBuf>,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include monotonic timestamps in JSON events (milliseconds since process start).
    #[arg(long, requires = "json")]
    pub json_timestamps: bool,

    /// JSON progress verbosity.
    #[arg(long, value_enum, default_value_t = JsonProgressArg::Percent, requires = "json")]
    pub json_progress: JsonProgressArg,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Script file, one console command per line (`#` starts a comment).
    ///
    /// Defaults to a built-in script that enables programming and reads the signature.
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Time to let the console answer before reading its reply.
    #[arg(long, default_value_t = terminal::DEFAULT_SETTLE.as_millis() as u64)]
    pub settle_ms: u64,

    /// Write a command/reply transcript to this file.
    #[arg(long)]
    pub transcript: Option<PathBuf>,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include monotonic timestamps in JSON events (milliseconds since process start).
    #[arg(long, requires = "json")]
    pub json_timestamps: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ChipsArgs {
    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_settle_defaults_to_library_constant() {
        let cli = Cli::try_parse_from(["hydra-isp-dump", "probe"]).unwrap();
        let Command::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.settle_ms, terminal::DEFAULT_SETTLE.as_millis() as u64);
        assert_eq!(args.settle_ms, 500);
    }
}
