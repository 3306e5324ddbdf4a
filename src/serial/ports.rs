//! Serial port discovery for `--list`
//!
//! Prints one line per port the system reports, followed by a ready-made
//! command line that logs all of them.

use crate::serial::baud;
use anyhow::{Context, Result};
use colored::Colorize;
use serialport::{SerialPortInfo, SerialPortType};

/// A port reported by the system
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPort {
    pub path: String,
    /// Bus and identity, e.g. `usb 0403:6001 FTDI FT232R [A1]`
    pub summary: String,
}

impl From<SerialPortInfo> for DetectedPort {
    fn from(info: SerialPortInfo) -> Self {
        Self {
            summary: describe(&info.port_type),
            path: info.port_name,
        }
    }
}

fn describe(kind: &SerialPortType) -> String {
    match kind {
        SerialPortType::UsbPort(usb) => {
            let mut summary = format!("usb {:04x}:{:04x}", usb.vid, usb.pid);
            for part in [&usb.manufacturer, &usb.product].into_iter().flatten() {
                summary.push(' ');
                summary.push_str(part);
            }
            if let Some(serial) = &usb.serial_number {
                summary.push_str(&format!(" [{}]", serial));
            }
            summary
        }
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown bus".to_string(),
    }
}

/// Ports the system currently reports, sorted by path
pub fn detect() -> Result<Vec<DetectedPort>> {
    let mut ports: Vec<DetectedPort> = serialport::available_ports()
        .context("Failed to enumerate serial ports")?
        .into_iter()
        .map(DetectedPort::from)
        .collect();
    ports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ports)
}

/// The command that would log every port in `ports`
fn suggested_command(ports: &[DetectedPort]) -> String {
    let mut command = String::from("serial-multilog");
    for port in ports {
        command.push(' ');
        command.push_str(&port.path);
    }
    command
}

pub fn print_ports() -> Result<()> {
    let ports = detect()?;

    if ports.is_empty() {
        println!("{}", "no serial ports detected".yellow());
        println!("ports the system does not enumerate can still be given by path");
    } else {
        let width = ports.iter().map(|p| p.path.len()).max().unwrap_or(0);
        for port in &ports {
            println!(
                "{}  {}",
                format!("{:<width$}", port.path, width = width).bold(),
                port.summary
            );
        }
        println!("\n{}", suggested_command(&ports).cyan());
    }
    println!("\nsupported baud rates: {}", baud::supported_list());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(serial_number: Option<&str>, product: Option<&str>) -> SerialPortType {
        SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: serial_number.map(str::to_string),
            manufacturer: Some("FTDI".to_string()),
            product: product.map(str::to_string),
        })
    }

    #[test]
    fn test_usb_summary() {
        assert_eq!(
            describe(&usb(Some("A1"), Some("FT232R"))),
            "usb 0403:6001 FTDI FT232R [A1]"
        );
        assert_eq!(describe(&usb(None, None)), "usb 0403:6001 FTDI");
    }

    #[test]
    fn test_other_buses() {
        assert_eq!(describe(&SerialPortType::PciPort), "pci");
        assert_eq!(describe(&SerialPortType::Unknown), "unknown bus");
    }

    #[test]
    fn test_suggested_command_lists_every_port() {
        let ports: Vec<DetectedPort> = ["/dev/ttyACM0", "/dev/ttyUSB0"]
            .iter()
            .map(|path| DetectedPort {
                path: path.to_string(),
                summary: String::new(),
            })
            .collect();
        assert_eq!(
            suggested_command(&ports),
            "serial-multilog /dev/ttyACM0 /dev/ttyUSB0"
        );
    }
}
