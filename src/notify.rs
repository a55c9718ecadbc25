use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

/// Publish side of the real-time layer. Delivery is somebody else's problem,
/// so publishing never fails from the engine's point of view.
pub trait Notifier: Send + Sync {
    fn notify(&self, channel: &str, event: &str, payload: Value);
}

pub fn driver_channel(id: &Uuid) -> String {
    format!("driver:{}", id)
}

pub fn passenger_channel(id: &Uuid) -> String {
    format!("passenger:{}", id)
}

pub fn booking_channel(id: &Uuid) -> String {
    format!("booking:{}", id)
}

pub const ADMIN_CHANNEL: &str = "admin";

pub mod events {
    pub const BOOKING_NEW: &str = "booking:new";
    pub const BOOKING_UPDATE: &str = "booking:update";
    pub const BOOKING_ACCEPTED: &str = "booking:accepted";
    pub const BOOKING_REMOVED: &str = "booking:removed";
    pub const BOOKING_CANCELED: &str = "booking:canceled";
    pub const TRIP_STARTED: &str = "trip:started";
    pub const TRIP_COMPLETED: &str = "trip:completed";
    pub const POSITION_UPDATE: &str = "position:update";
    pub const WALLET_UPDATE: &str = "wallet:update";
}

#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, channel: &str, event: &str, payload: Value) {
        tracing::info!(channel, event, %payload, "notify");
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// Keeps everything it is asked to publish, for embedding hosts that poll
/// and for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, channel: &str) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|n| n.channel == channel)
            .collect()
    }

    pub fn count(&self, channel: &str, event: &str) -> usize {
        self.events_for(channel)
            .iter()
            .filter(|n| n.event == event)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, channel: &str, event: &str, payload: Value) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Notification {
                channel: channel.to_string(),
                event: event.to_string(),
                payload,
            });
        }
    }
}

#[test]
fn recording_notifier_filters_by_channel_test() {
    let notifier = RecordingNotifier::new();
    let driver = Uuid::new_v4();

    notifier.notify(&driver_channel(&driver), events::BOOKING_NEW, serde_json::json!({}));
    notifier.notify(ADMIN_CHANNEL, events::TRIP_COMPLETED, serde_json::json!({}));
    notifier.notify(&driver_channel(&driver), events::BOOKING_REMOVED, serde_json::json!({}));

    assert_eq!(notifier.events().len(), 3);
    assert_eq!(notifier.events_for(&driver_channel(&driver)).len(), 2);
    assert_eq!(notifier.count(ADMIN_CHANNEL, events::TRIP_COMPLETED), 1);

    notifier.clear();
    assert!(notifier.events().is_empty());
}
