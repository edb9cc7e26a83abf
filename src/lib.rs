//! # rbtctl - Bluetooth Device Manager
//!
//! `rbtctl` manages nearby Bluetooth devices by driving `bluetoothctl` through
//! its interactive text interface. Every command runs in a fresh tool process
//! with its own timeout; replies are parsed with configurable patterns, and
//! connection attempts across discovered devices run on a bounded pool.
//!
//! ## Features
//!
//! - **Process per Command**: No tool process outlives the command that spawned it
//! - **Timeouts**: Per-command overrides resolved once from configuration
//! - **Pattern Parsing**: Scan and connected listings parsed by separate regexes
//! - **Bounded Rounds**: At most `max_connections` connect attempts at a time
//! - **Failure Isolation**: One misbehaving device never blocks the others
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rbtctl::session::BluetoothManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load config.yaml (or the bundled default) for the "default" channel
//!     let manager = BluetoothManager::from_config(None, "default")?;
//!
//!     for device in manager.discover_devices().await? {
//!         println!("{}  {}", device.address, device.name);
//!     }
//!
//!     let report = manager.manage_connections().await?;
//!     println!("connected: {:?}", report.connected());
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::BluetoothManager`] - Discovery, listing, and connection workflow
//! - [`session::ConnectionScheduler`] - Bounded connect rounds
//! - [`session::ToolExecutor`] - Control tool process management
//! - [`device::DevicePattern`] - Response parsing into [`device::Device`] records
//! - [`config`] - Channel-aware YAML configuration
//! - [`error::ManagerError`] - Error types for commands and configuration

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod session;
