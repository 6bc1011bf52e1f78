//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio_serial::{SerialPort, SerialPortBuilderExt};

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read up to `buf.len()` bytes
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of bytes already buffered for reading
    fn bytes_to_read(&self) -> io::Result<u32>;

    /// Discard buffered input
    fn clear_input(&self) -> io::Result<()>;
}

/// Opens serial ports and lists the ones available on the host
pub trait PortOpener: Send + Sync {
    fn open(&self, path: &str, baud_rate: u32) -> io::Result<Box<dyn SerialPortIO>>;

    fn available_ports(&self) -> io::Result<Vec<String>>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }

    fn bytes_to_read(&self) -> io::Result<u32> {
        SerialPort::bytes_to_read(&self.port).map_err(io::Error::from)
    }

    fn clear_input(&self) -> io::Result<()> {
        SerialPort::clear(&self.port, tokio_serial::ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Opens real ports through tokio-serial with 8N1 framing, no flow control
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialOpener;

impl PortOpener for TokioSerialOpener {
    fn open(&self, path: &str, baud_rate: u32) -> io::Result<Box<dyn SerialPortIO>> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;

        Ok(Box::new(TokioSerialPort::new(port)))
    }

    fn available_ports(&self) -> io::Result<Vec<String>> {
        let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}
