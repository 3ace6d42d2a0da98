//! # loragate - LoRa telemetry gateway core
//!
//! Polls a battery-powered, duty-cycled sensor endpoint over a LoRa radio
//! modem on a serial line, validates its readings, keeps a persistent
//! coulomb-counting estimate of the endpoint's battery, drives threshold
//! alarms and publishes a JSON snapshot for the protocol adapters
//! (Modbus, OPC-UA, web UI) running next to it.
//!
//! ## Architecture
//!
//! - `codec`: frame building, CRC-16 and response decoding
//! - `link`: header-based frame synchronisation over the byte stream
//! - `transport`: serial line abstraction
//! - `session`: one polling cycle, link quality and radio reconfiguration
//! - `battery`: coulomb counting and battery life estimate
//! - `alarm`: edge-triggered relay alarms
//! - `snapshot`: sensor snapshot and link health files
//! - `gateway`: the polling loop
//! - `persistence`: atomic JSON files and one-shot flag files
//! - `config`: YAML process configuration and UI-owned JSON settings
//! - `logging`: structured logging and tracing

pub mod alarm;
pub mod battery;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod link;
pub mod logging;
pub mod persistence;
pub mod session;
pub mod snapshot;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use transport::{SerialTransport, Transport};

/// Build version reported at startup
pub const VERSION: &str = env!("APP_VERSION");
