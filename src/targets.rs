use serde::Serialize;
use thiserror::Error;

use crate::hydrabus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub is_hydrabus: bool,
}

impl PortInfo {
    pub fn usb(port_name: String, usb: serialport::UsbPortInfo) -> Self {
        Self {
            is_hydrabus: usb.vid == hydrabus::VID && usb.pid == hydrabus::PID,
            port_name,
            vid: usb.vid,
            pid: usb.pid,
            serial_number: usb.serial_number,
            manufacturer: usb.manufacturer,
            product: usb.product,
        }
    }
}

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("serial discovery failed: {0}")]
    Serial(#[from] serialport::Error),
}

/// USB serial ports, HydraBus devices first, then by port name.
pub fn discover_ports() -> Result<Vec<PortInfo>, DiscoverError> {
    let mut out: Vec<PortInfo> = Vec::new();

    for p in serialport::available_ports()? {
        let serialport::SerialPortInfo {
            port_name,
            port_type,
        } = p;

        let serialport::SerialPortType::UsbPort(usb) = port_type else {
            continue;
        };
        out.push(PortInfo::usb(port_name, usb));
    }

    sort_ports(&mut out);
    Ok(out)
}

fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| {
        b.is_hydrabus
            .cmp(&a.is_hydrabus)
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
}
