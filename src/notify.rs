use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-unit broadcast of committed events, e.g. to refresh a host's calendar view.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a unit's events. Creates the channel if needed.
    pub fn subscribe(&self, unit_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(unit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, unit_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&unit_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a unit's channel; open receivers see the stream close.
    pub fn remove(&self, unit_id: &Ulid) {
        self.channels.remove(unit_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);

        let event = Event::UnitDeleted { id: uid };
        hub.send(uid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        hub.send(uid, &Event::UnitDeleted { id: uid });
    }

    #[tokio::test]
    async fn remove_closes_stream() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);
        hub.remove(&uid);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
