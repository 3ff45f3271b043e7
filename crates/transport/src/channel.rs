// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Anything the transport can frame request/reply traffic over.
pub trait DeviceStream: Read + Write + Send {
    /// Best-effort read timeout; serial and TCP both support this, a test
    /// fake may ignore it.
    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;
}

impl DeviceStream for Box<dyn serialport::SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout)
    }
}

impl DeviceStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, Some(timeout))
    }
}

/// A `device` config value names either a serial path or a `host:port` pair
/// (spec.md §6). This is the only piece of "serial port enumeration" this
/// crate does; choosing among several ports is an external UX concern.
pub fn available_serial_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}

pub fn open_serial(path: &str, baud_rate: u32) -> std::io::Result<Box<dyn serialport::SerialPort>> {
    serialport::new(path, baud_rate)
        .timeout(Duration::from_secs(5))
        .open()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

pub fn open_tcp(addr: &str) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Parses the `device` config option: `host:port` is treated as TCP if the
/// port half parses as a number, everything else as a serial path.
pub fn is_tcp_target(device: &str) -> Option<(&str, u16)> {
    let (host, port) = device.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_tcp_target_recognizes_host_port() {
        assert_eq!(is_tcp_target("192.168.1.5:26000"), Some(("192.168.1.5", 26000)));
    }

    #[test]
    fn is_tcp_target_rejects_serial_paths() {
        assert_eq!(is_tcp_target("/dev/ttyUSB0"), None);
        assert_eq!(is_tcp_target("COM3"), None);
    }
}
