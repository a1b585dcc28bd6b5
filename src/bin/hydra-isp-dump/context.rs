use std::time::Duration;

use hydra_isp_dump::api::DumpOptions;
use hydra_isp_dump::bridge::SessionOptions;
use hydra_isp_dump::chips::ChipType;
use hydra_isp_dump::hydrabus::{Phase, Polarity, SpiConfig, SpiDevice, SpiSpeed};

use crate::cli;

pub fn connection_opts(args: &cli::ConnectionArgs) -> DumpOptions {
    DumpOptions {
        port: args.port.clone(),
        baud: args.baud,
        ..Default::default()
    }
}

pub fn dump_opts(conn: &cli::ConnectionArgs, bus: &cli::BusArgs) -> DumpOptions {
    DumpOptions {
        chip: chip(bus.chip),
        spi: spi_config(bus),
        session: SessionOptions {
            read_timeout: Duration::from_millis(bus.read_timeout_ms),
            entry_attempts: bus.entry_attempts,
            entry_poll: Duration::from_millis(bus.entry_poll_ms),
        },
        ..connection_opts(conn)
    }
}

fn chip(arg: cli::ChipArg) -> ChipType {
    match arg {
        cli::ChipArg::Atmega328p => ChipType::Atmega328p,
    }
}

fn spi_config(bus: &cli::BusArgs) -> SpiConfig {
    SpiConfig {
        device: match bus.device {
            cli::SpiDeviceArg::Spi1 => SpiDevice::Spi1,
            cli::SpiDeviceArg::Spi2 => SpiDevice::Spi2,
        },
        polarity: match bus.polarity {
            cli::PolarityArg::IdleLow => Polarity::IdleLow,
            cli::PolarityArg::IdleHigh => Polarity::IdleHigh,
        },
        phase: match bus.phase {
            cli::PhaseArg::Leading => Phase::Leading,
            cli::PhaseArg::Trailing => Phase::Trailing,
        },
        speed: speed(bus.speed),
    }
}

fn speed(arg: cli::SpeedArg) -> SpiSpeed {
    match arg {
        cli::SpeedArg::K160 => SpiSpeed::K160,
        cli::SpeedArg::K320 => SpiSpeed::K320,
        cli::SpeedArg::K650 => SpiSpeed::K650,
        cli::SpeedArg::M1_31 => SpiSpeed::M1_31,
        cli::SpeedArg::M2_62 => SpiSpeed::M2_62,
        cli::SpeedArg::M5_25 => SpiSpeed::M5_25,
        cli::SpeedArg::M10_5 => SpiSpeed::M10_5,
        cli::SpeedArg::M21 => SpiSpeed::M21,
        cli::SpeedArg::M42 => SpiSpeed::M42,
    }
}
