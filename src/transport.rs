//! Byte transport to the radio modem

use crate::config::SerialConfig;
use crate::error::{GatewayError, Result};
use crate::logging::{StructuredLogger, get_logger};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Bidirectional byte stream the command session talks through
#[async_trait]
pub trait Transport: Send {
    /// Drop any bytes received but not yet read
    async fn clear_input(&mut self) -> Result<()>;

    /// Write one complete frame
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Bytes that arrive within `wait`; empty when nothing did
    async fn read_available(&mut self, wait: Duration) -> Result<Vec<u8>>;
}

/// Serial line to the modem, 8N1
pub struct SerialTransport {
    port: SerialStream,
    name: String,
    logger: StructuredLogger,
}

impl SerialTransport {
    /// Open the configured serial port
    pub async fn open(config: &SerialConfig) -> Result<Self> {
        let logger = get_logger("transport");
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()
            .map_err(|e| {
                GatewayError::transport(format!("Failed to open {}: {}", config.port, e))
            })?;

        logger.info(&format!(
            "Opened serial port {} @ {} baud",
            config.port, config.baud_rate
        ));

        // Modem needs a moment after the line comes up
        if config.open_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.open_settle_ms)).await;
        }

        Ok(Self {
            port,
            name: config.port.clone(),
            logger,
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(|e| {
            GatewayError::transport(format!("Failed to flush {}: {}", self.name, e))
        })
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.port.write_all(frame).await.map_err(|e| {
            GatewayError::transport(format!("Serial write to {} failed: {}", self.name, e))
        })?;
        self.port.flush().await.map_err(|e| {
            GatewayError::transport(format!("Serial flush of {} failed: {}", self.name, e))
        })?;
        self.logger.trace(&format!("TX {:02X?}", frame));
        Ok(())
    }

    async fn read_available(&mut self, wait: Duration) -> Result<Vec<u8>> {
        let bytes = read_chunk(&mut self.port, &self.name, wait).await?;
        if !bytes.is_empty() {
            self.logger.trace(&format!("RX {:02X?}", bytes));
        }
        Ok(bytes)
    }
}

/// One read bounded by `wait`; end of stream means the device went away
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    name: &str,
    wait: Duration,
) -> Result<Vec<u8>> {
    let mut buf = [0u8; 256];
    match tokio::time::timeout(wait, reader.read(&mut buf)).await {
        Err(_) => Ok(Vec::new()),
        Ok(Ok(0)) => Err(GatewayError::transport(format!(
            "Serial line {} closed",
            name
        ))),
        Ok(Ok(n)) => Ok(buf[..n].to_vec()),
        Ok(Err(e)) => Err(GatewayError::transport(format!(
            "Serial read from {} failed: {}",
            name, e
        ))),
    }
}
