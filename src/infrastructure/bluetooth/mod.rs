//! Bluetooth Module
//!
//! Reads telemetry from a Zephyr HxM heart-rate monitor over a bonded
//! RFCOMM link.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     MonitorService                       │
//! │  (Main coordinator - single event source for the UI)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌─────────────┐  ┌───────────┐
//! │  Scanner  │  │ Connection  │  │ Protocol  │
//! │           │  │             │  │           │
//! │ - Bonded  │  │ - Stream    │  │ - Frame   │
//! │   lookup  │  │ - Read loop │  │   layout  │
//! │ - Prefix  │  │ - States    │  │ - Decode  │
//! └───────────┘  └─────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - HxM frame layout and decoding
//! - [`scanner`] - Bonded device enumeration and selection
//! - [`connection`] - Stream connection and session state machine
//! - [`service`] - Main service coordinator
//! - [`error`] - Discovery and connection errors

pub mod connection;
pub mod error;
pub mod protocol;
pub mod scanner;
pub mod service;

// Re-export main service for convenience
pub use service::MonitorService;
