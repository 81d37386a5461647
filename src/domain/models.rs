use crate::infrastructure::bluetooth::protocol::HeartRateFrame;
use serde::{Deserialize, Serialize};

/// A bonded (already paired) device as enumerated by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: String,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Resting,
    Connecting,
    /// Carries the name of the connected device
    Connected(String),
    Failed,
    /// Reported by the service when no bonded device matched. Never held
    /// as a session state.
    NoPairedDevice,
}

impl ConnectionState {
    /// Connecting or connected, i.e. a session currently owns the link
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected(_))
    }
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    StateChanged(ConnectionState),
    ReadingReceived(HeartRateFrame),
    Notice(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}
