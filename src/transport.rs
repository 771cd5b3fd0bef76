use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};

/// Byte-stream seam between [`crate::link::DeviceLink`] and the physical
/// medium.
///
/// Production uses [`SerialTransport`]; tests drive the link with scripted
/// in-memory transports. The reader thread works on a `try_clone` of the
/// handle while the caller thread keeps the original for command writes, so
/// implementations must make clones observe a shared stream.
pub trait LinkTransport: Send {
    /// Read up to `buf.len()` bytes. Blocks at most the configured read
    /// timeout; a timeout surfaces as `io::ErrorKind::TimedOut`.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `bytes` to the device.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Drop everything currently buffered on the inbound side. Used by the
    /// connect handshake to discard boot/calibration chatter unparsed.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Duplicate the handle for the background reader thread.
    fn try_clone(&self) -> io::Result<Box<dyn LinkTransport>>;
}

/// [`LinkTransport`] over a host serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate` with the given read timeout.
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> serialport::Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(read_timeout)
            .open()?;
        Ok(Self { port })
    }
}

impl LinkTransport for SerialTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Box<dyn LinkTransport>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(Self { port }))
    }
}

/// Enumerate host serial ports as `(name, description)` pairs for operator
/// selection. Stateless; safe to call whether or not a link is open.
pub fn list_ports() -> serialport::Result<Vec<(String, String)>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let description = match info.port_type {
                SerialPortType::UsbPort(usb) => {
                    let product = usb.product.unwrap_or_else(|| "USB serial device".into());
                    match usb.serial_number {
                        Some(serial) => format!("{} (S/N {})", product, serial),
                        None => product,
                    }
                }
                SerialPortType::PciPort => "PCI serial port".into(),
                SerialPortType::BluetoothPort => "Bluetooth serial port".into(),
                SerialPortType::Unknown => "Serial port".into(),
            };
            (info.port_name, description)
        })
        .collect())
}
