//! Monitor Service Module
//!
//! Main service that coordinates bonded-device lookup, the connection
//! session and event delivery for the HxM.

use crate::domain::models::{
    ConnectionState, DeviceDescriptor, MessageSeverity, MonitorEvent, StatusMessage,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{
    connection::{ConnectionSession, Connector, SessionCell, SessionConfig},
    error::MonitorError,
    scanner::{BondedDevices, DeviceSelector},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Process-scoped coordinator; the only source of events for the observer
pub struct MonitorService {
    cell: Arc<SessionCell>,
    registry: Arc<dyn BondedDevices>,
    connector: Arc<dyn Connector>,
    selector: DeviceSelector,
    config: SessionConfig,
    session: Option<ConnectionSession>,
}

impl MonitorService {
    /// Create the service together with the single event stream its
    /// observer consumes.
    pub fn new(
        registry: Arc<dyn BondedDevices>,
        connector: Arc<dyn Connector>,
        selector: DeviceSelector,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let service = Self {
            cell: SessionCell::new(event_sender),
            registry,
            connector,
            selector,
            config,
            session: None,
        };
        (service, event_receiver)
    }

    pub fn from_settings(
        settings: &Settings,
        registry: Arc<dyn BondedDevices>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let selector = DeviceSelector::new(
            settings.device_name_prefix.clone(),
            settings.selection_policy,
        );
        let config = SessionConfig {
            connect_timeout: settings.connect_timeout(),
            dump_frames: settings.log_frame_dump,
        };
        Self::new(registry, connector, selector, config)
    }

    pub fn state(&self) -> ConnectionState {
        self.cell.state()
    }

    /// Look up the bonded HxM and connect to it.
    ///
    /// Returns `true` if a connection attempt was started. Safe to trigger
    /// repeatedly: ignored while a session is connecting or connected.
    pub fn scan_and_connect(&mut self) -> bool {
        if self.state().is_active() {
            debug!("Scan ignored, a session is already active");
            return false;
        }

        match self.selector.find(self.registry.as_ref()) {
            Ok(device) => self.connect(device),
            Err(MonitorError::DeviceNotFound { prefix }) => {
                info!("No bonded device starts with '{}'", prefix);
                self.cell.publish(MonitorEvent::Notice(StatusMessage::new(
                    format!("No paired device name starts with {}", prefix),
                    MessageSeverity::Warning,
                )));
                self.cell
                    .publish(MonitorEvent::StateChanged(ConnectionState::NoPairedDevice));
                false
            }
            Err(e) => {
                error!("Bonded device lookup failed: {}", e);
                self.cell.publish(MonitorEvent::Notice(StatusMessage::new(
                    e.to_string(),
                    MessageSeverity::Error,
                )));
                self.cell
                    .publish(MonitorEvent::StateChanged(ConnectionState::Failed));
                self.cell
                    .publish(MonitorEvent::StateChanged(ConnectionState::Resting));
                false
            }
        }
    }

    /// Connect to a specific device, bypassing the bonded-device lookup
    pub fn connect(&mut self, device: DeviceDescriptor) -> bool {
        if self.state().is_active() {
            debug!("Connect to {} ignored, a session is already active", device.name);
            return false;
        }

        let mut session =
            ConnectionSession::new(self.cell.clone(), self.connector.clone(), self.config.clone());
        let started = session.connect(device);
        if started {
            // Replacing the finished session drops its worker handle
            self.session = Some(session);
        } else {
            warn!("Connection attempt lost a race with another session");
        }
        started
    }

    /// Stop the active session, if any
    pub fn stop(&mut self) {
        match self.session.as_mut() {
            Some(session) => session.stop(),
            None => debug!("Stop requested with no session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::SelectionPolicy;
    use crate::infrastructure::bluetooth::connection::tests::{
        next_event, next_state_or_reading, MockConnector,
    };
    use crate::infrastructure::bluetooth::protocol::{encode, sample_frame};
    use crate::infrastructure::bluetooth::scanner::SettingsRegistry;
    use tokio::io::AsyncWriteExt;

    fn registry(devices: &[(&str, &str)]) -> Arc<SettingsRegistry> {
        Arc::new(SettingsRegistry::new(
            devices
                .iter()
                .map(|(n, a)| DeviceDescriptor::new(*n, *a))
                .collect(),
        ))
    }

    fn states(events: &[MonitorEvent]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::StateChanged(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_end_to_end_event_order() {
        let (client, mut device) = tokio::io::duplex(256);
        let (mut service, mut rx) = MonitorService::new(
            registry(&[("Phone", "/dev/rfcomm1"), ("HXM012345", "/dev/rfcomm0")]),
            MockConnector::with_streams(vec![client]),
            DeviceSelector::default(),
            SessionConfig::default(),
        );

        assert!(service.scan_and_connect());
        device.write_all(&encode(&sample_frame())).await.unwrap();
        drop(device);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_state_or_reading(&mut rx).await);
        }
        assert!(matches!(
            &seen[0],
            MonitorEvent::StateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            &seen[1],
            MonitorEvent::StateChanged(ConnectionState::Connected(name)) if name == "HXM012345"
        ));
        assert!(matches!(&seen[2], MonitorEvent::ReadingReceived(f) if f.heart_rate_bpm == 142));
        assert!(matches!(
            &seen[3],
            MonitorEvent::StateChanged(ConnectionState::Resting)
        ));
    }

    #[tokio::test]
    async fn test_rescan_while_connected_is_noop() {
        let (client, _device) = tokio::io::duplex(256);
        let (mut service, mut rx) = MonitorService::new(
            registry(&[("HXM1", "/dev/rfcomm0")]),
            MockConnector::with_streams(vec![client]),
            DeviceSelector::default(),
            SessionConfig::default(),
        );

        assert!(service.scan_and_connect());
        let mut seen = vec![next_event(&mut rx).await, next_event(&mut rx).await];
        assert!(!service.scan_and_connect());
        assert!(!service.scan_and_connect());
        service.stop();
        service.stop();
        seen.push(next_event(&mut rx).await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        while let Ok(e) = rx.try_recv() {
            seen.push(e);
        }

        assert_eq!(
            states(&seen),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected("HXM1".to_string()),
                ConnectionState::Resting,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_paired_device() {
        let (mut service, mut rx) = MonitorService::new(
            registry(&[("Headphones", "/dev/rfcomm3")]),
            MockConnector::hanging(),
            DeviceSelector::default(),
            SessionConfig::default(),
        );

        assert!(!service.scan_and_connect());
        assert!(matches!(next_event(&mut rx).await, MonitorEvent::Notice(_)));
        assert!(matches!(
            next_event(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::NoPairedDevice)
        ));
        assert_eq!(service.state(), ConnectionState::Resting);

        // Safe with no session
        service.stop();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_adapter_unavailable() {
        let (mut service, mut rx) = MonitorService::new(
            Arc::new(SettingsRegistry::unavailable()),
            MockConnector::hanging(),
            DeviceSelector::default(),
            SessionConfig::default(),
        );

        assert!(!service.scan_and_connect());
        match next_event(&mut rx).await {
            MonitorEvent::Notice(n) => assert_eq!(n.severity, MessageSeverity::Error),
            other => panic!("expected a notice, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Failed)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Resting)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_after_lost_link() {
        let (first, first_device) = tokio::io::duplex(256);
        let (second, _second_device) = tokio::io::duplex(256);
        // MockConnector pops from the back
        let (mut service, mut rx) = MonitorService::new(
            registry(&[("HXM1", "/dev/rfcomm0")]),
            MockConnector::with_streams(vec![second, first]),
            DeviceSelector::default(),
            SessionConfig::default(),
        );

        assert!(service.scan_and_connect());
        next_state_or_reading(&mut rx).await;
        next_state_or_reading(&mut rx).await;
        drop(first_device);
        assert!(matches!(
            next_state_or_reading(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Resting)
        ));

        assert!(service.scan_and_connect());
        assert!(matches!(
            next_state_or_reading(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            next_state_or_reading(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Connected(_))
        ));
        service.stop();
        assert!(matches!(
            next_state_or_reading(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Resting)
        ));
    }

    #[tokio::test]
    async fn test_from_settings_uses_prefix_and_policy() {
        let mut settings = Settings::default();
        settings.device_name_prefix = "HXM".to_string();
        settings.selection_policy = SelectionPolicy::LowestAddress;
        let (client, _device) = tokio::io::duplex(256);

        let (mut service, mut rx) = MonitorService::from_settings(
            &settings,
            registry(&[("HXM-B", "/dev/rfcomm9"), ("HXM-A", "/dev/rfcomm2")]),
            MockConnector::with_streams(vec![client]),
        );

        service.scan_and_connect();
        next_event(&mut rx).await;
        assert!(matches!(
            next_event(&mut rx).await,
            MonitorEvent::StateChanged(ConnectionState::Connected(name)) if name == "HXM-A"
        ));
        service.stop();
    }
}
