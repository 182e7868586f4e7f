//! Serial port transport
//!
//! Direct USB / RS-232 connection to a controller.
//!
//! Supports:
//! - Port enumeration filtered to likely CNC devices
//! - 8N1 links at a configurable baud rate
//! - A reader thread feeding the session's event channel

use super::{Communicator, ConnectionParams, TransportEvent};
use machlink_core::{ConnectionError, Error, PortEntry, Result};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Read timeout; bounds how long the reader takes to notice a close
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// List available serial ports on the system
///
/// Filters ports to include only CNC controller patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<PortEntry>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::SerialError {
            reason: format!("failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| PortEntry {
            path: port.port_name.clone(),
            description: port_description(port),
            manufacturer: match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => usb.manufacturer.clone(),
                _ => None,
            },
        })
        .collect())
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Write half of a serial link
pub struct SerialCommunicator {
    port: Box<dyn serialport::SerialPort>,
    target: String,
    stop: Arc<AtomicBool>,
}

impl Communicator for SerialCommunicator {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.port
            .write_all(data)
            .and_then(|_| self.port.flush())
            .map_err(|e| ConnectionError::SerialError {
                reason: e.to_string(),
            })?;
        Ok(data.len())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for SerialCommunicator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Open the port and start its reader thread. Blocking.
pub(crate) fn open(
    params: &ConnectionParams,
    events: UnboundedSender<TransportEvent>,
) -> Result<Box<dyn Communicator>> {
    let port = serialport::new(&params.target, params.baud_rate)
        .timeout(READ_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", params.target, e);
            failed(params, e)
        })?;
    let reader = port.try_clone().map_err(|e| failed(params, e))?;

    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = Arc::clone(&stop);
    let name = params.target.clone();
    std::thread::Builder::new()
        .name(format!("serial-{}", name))
        .spawn(move || read_loop(reader, events, reader_stop, name))
        .map_err(Error::from)?;

    tracing::info!("Serial port {} open at {} baud", params.target, params.baud_rate);
    Ok(Box::new(SerialCommunicator {
        port,
        target: params.target.clone(),
        stop,
    }))
}

fn failed(params: &ConnectionParams, e: serialport::Error) -> Error {
    ConnectionError::FailedToOpen {
        target: params.target.clone(),
        reason: e.to_string(),
    }
    .into()
}

fn read_loop(
    mut port: Box<dyn serialport::SerialPort>,
    events: UnboundedSender<TransportEvent>,
    stop: Arc<AtomicBool>,
    name: String,
) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if events.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!("Serial port {} read failed: {}", name, e);
                let _ = events.send(TransportEvent::Closed(Some(e.to_string())));
                return;
            }
        }
    }
    tracing::debug!("Serial reader for {} stopped", name);
    let _ = events.send(TransportEvent::Closed(None));
}
