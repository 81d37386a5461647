//! Console observer: renders monitor events as log lines.

use crate::domain::models::{ConnectionState, MessageSeverity, MonitorEvent};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol::HeartRateFrame;
use crate::infrastructure::bluetooth::MonitorService;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Status line text for a connection state
pub fn status_text(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Resting => "not connected".to_string(),
        ConnectionState::Connecting => "connecting...".to_string(),
        ConnectionState::Connected(name) => format!("connected to {}", name),
        ConnectionState::Failed => "unable to connect".to_string(),
        ConnectionState::NoPairedDevice => "no HxM paired".to_string(),
    }
}

/// One-line summary of a reading
pub fn reading_text(frame: &HeartRateFrame) -> String {
    let mut text = format!(
        "HR {} bpm | beat #{} | battery {}% | {:.1} m | {:.2} m/s | {} strides",
        frame.heart_rate_bpm,
        frame.heart_beat_number,
        frame.battery_percent,
        frame.distance_m(),
        frame.speed_mps(),
        frame.strides,
    );
    if !frame.well_formed {
        text.push_str(" (malformed)");
    }
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    /// Link is down; scan again after the delay
    Reconnect(Duration),
}

/// What the console currently shows
pub struct ConsoleView {
    status: ConnectionState,
    latest: Option<HeartRateFrame>,
    readings: u64,
    auto_reconnect: Option<Duration>,
    was_connected: bool,
}

impl ConsoleView {
    pub fn new(auto_reconnect: Option<Duration>) -> Self {
        Self {
            status: ConnectionState::Resting,
            latest: None,
            readings: 0,
            auto_reconnect,
            was_connected: false,
        }
    }

    pub fn status(&self) -> &ConnectionState {
        &self.status
    }

    pub fn latest(&self) -> Option<&HeartRateFrame> {
        self.latest.as_ref()
    }

    pub fn readings(&self) -> u64 {
        self.readings
    }

    pub fn apply(&mut self, event: MonitorEvent) -> Option<ConsoleAction> {
        match event {
            MonitorEvent::StateChanged(state) => {
                info!("Status: {}", status_text(&state));
                let action = match &state {
                    ConnectionState::Connected(_) => {
                        self.was_connected = true;
                        None
                    }
                    ConnectionState::Resting if self.was_connected => {
                        self.was_connected = false;
                        self.auto_reconnect.map(ConsoleAction::Reconnect)
                    }
                    _ => None,
                };
                self.status = state;
                action
            }
            MonitorEvent::ReadingReceived(frame) => {
                self.readings += 1;
                info!("{}", reading_text(&frame));
                self.latest = Some(frame);
                None
            }
            MonitorEvent::Notice(notice) => {
                match notice.severity {
                    MessageSeverity::Error => error!("{}", notice.message),
                    MessageSeverity::Warning => warn!("{}", notice.message),
                    MessageSeverity::Info => info!("{}", notice.message),
                }
                None
            }
        }
    }
}

/// Drive the service until Ctrl-C or until the event stream ends
pub async fn run(
    mut service: MonitorService,
    mut events: mpsc::UnboundedReceiver<MonitorEvent>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let mut view = ConsoleView::new(
        settings
            .auto_reconnect
            .then(|| settings.reconnect_delay()),
    );
    let mut reconnect_at: Option<Instant> = None;

    service.scan_and_connect();

    loop {
        let deadline = reconnect_at;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Interrupted, stopping");
                service.stop();
                break;
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() => {
                reconnect_at = None;
                service.scan_and_connect();
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(ConsoleAction::Reconnect(delay)) = view.apply(event) {
                        info!("Reconnecting in {:?}", delay);
                        reconnect_at = Some(Instant::now() + delay);
                    }
                }
                None => break,
            },
        }
    }

    // Drain what the stop produced
    while let Ok(event) = events.try_recv() {
        view.apply(event);
    }
    info!(
        "Received {} readings, {}",
        view.readings(),
        status_text(view.status())
    );
    if let Some(last) = view.latest() {
        info!("Last reading: {}", reading_text(last));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StatusMessage;
    use crate::infrastructure::bluetooth::protocol::sample_frame;

    fn connected(name: &str) -> MonitorEvent {
        MonitorEvent::StateChanged(ConnectionState::Connected(name.to_string()))
    }

    #[test]
    fn test_status_texts() {
        assert_eq!(
            status_text(&ConnectionState::Connected("HXM012345".into())),
            "connected to HXM012345"
        );
        assert_eq!(status_text(&ConnectionState::NoPairedDevice), "no HxM paired");
    }

    #[test]
    fn test_reading_text_marks_malformed() {
        let mut frame = sample_frame();
        assert!(reading_text(&frame).starts_with("HR 142 bpm"));
        frame.well_formed = false;
        assert!(reading_text(&frame).ends_with("(malformed)"));
    }

    #[test]
    fn test_view_tracks_latest_reading() {
        let mut view = ConsoleView::new(None);
        view.apply(connected("HXM1"));
        view.apply(MonitorEvent::ReadingReceived(sample_frame()));
        view.apply(MonitorEvent::Notice(StatusMessage::new(
            "hello",
            MessageSeverity::Info,
        )));
        assert_eq!(view.readings(), 1);
        assert_eq!(view.latest().unwrap().heart_rate_bpm, 142);
        assert_eq!(view.status(), &ConnectionState::Connected("HXM1".into()));
    }

    #[test]
    fn test_reconnect_only_after_lost_link() {
        let delay = Duration::from_secs(5);
        let mut view = ConsoleView::new(Some(delay));

        // Failed attempt: no reconnect loop
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Failed,
            ConnectionState::Resting,
        ] {
            assert_eq!(view.apply(MonitorEvent::StateChanged(state)), None);
        }

        view.apply(connected("HXM1"));
        assert_eq!(
            view.apply(MonitorEvent::StateChanged(ConnectionState::Resting)),
            Some(ConsoleAction::Reconnect(delay))
        );
    }

    #[test]
    fn test_no_reconnect_when_disabled() {
        let mut view = ConsoleView::new(None);
        view.apply(connected("HXM1"));
        let lost = MonitorEvent::StateChanged(ConnectionState::Resting);
        assert_eq!(view.apply(lost), None);
    }
}
