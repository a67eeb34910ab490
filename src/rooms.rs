//! Room registry: session id → subscriber sinks.
//!
//! Each subscriber hands the registry the sending half of an unbounded
//! channel; its own socket task drains the other half. Publishing therefore
//! never blocks on a slow consumer, and per-subscriber delivery order
//! matches publish order.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber<T> {
    client_id: String,
    tx: mpsc::UnboundedSender<T>,
}

/// Process-wide registry of rooms and their subscriber sinks.
pub struct RoomRegistry<T> {
    rooms: DashMap<String, Vec<Subscriber<T>>>,
}

impl<T: Clone + Send + 'static> RoomRegistry<T> {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add `client_id` to `room`, creating the room on first entry.
    /// Re-entering replaces the previous sink.
    pub fn enter(&self, room: &str, client_id: &str, tx: mpsc::UnboundedSender<T>) {
        let mut subscribers = self.rooms.entry(room.to_owned()).or_default();
        subscribers.retain(|s| s.client_id != client_id);
        subscribers.push(Subscriber {
            client_id: client_id.to_owned(),
            tx,
        });
    }

    /// Remove `client_id` from `room`; empty rooms are dropped.
    pub fn leave(&self, room: &str, client_id: &str) {
        if let Some(mut subscribers) = self.rooms.get_mut(room) {
            subscribers.retain(|s| s.client_id != client_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.rooms.remove_if(room, |_, subs| subs.is_empty());
            }
        }
    }

    /// Remove `client_id` from every room (disconnect path).
    pub fn leave_all(&self, client_id: &str) {
        for mut entry in self.rooms.iter_mut() {
            entry.value_mut().retain(|s| s.client_id != client_id);
        }
        self.rooms.retain(|_, subs| !subs.is_empty());
    }

    /// Deliver `message` to every subscriber currently in `room`.
    /// Delivery is best-effort: closed sinks are pruned, not waited on.
    pub fn publish(&self, room: &str, message: &T) {
        let Some(mut subscribers) = self.rooms.get_mut(room) else {
            debug!("publish to empty room {room}");
            return;
        };
        subscribers.retain(|s| s.tx.send(message.clone()).is_ok());
    }

    /// Number of subscribers currently in `room`.
    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |subs| subs.len())
    }
}

impl<T: Clone + Send + 'static> Default for RoomRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_the_target_room() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.enter("s1", "a", tx_a);
        registry.enter("s2", "b", tx_b);

        registry.publish("s1", &"hello".to_owned());

        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_publish() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        registry.enter("s1", "a", tx_a);
        registry.publish("s1", &1);

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.enter("s1", "b", tx_b);
        registry.publish("s1", &2);

        assert_eq!(rx_a.recv().await.unwrap(), 1);
        assert_eq!(rx_a.recv().await.unwrap(), 2);
        assert_eq!(rx_b.recv().await.unwrap(), 2);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_removes_the_sink_and_empty_rooms() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.enter("s1", "a", tx);
        registry.leave("s1", "a");
        registry.publish("s1", &1);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.room_size("s1"), 0);
    }

    #[tokio::test]
    async fn subscriber_order_matches_publish_order() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.enter("s1", "a", tx);
        for n in 0..10 {
            registry.publish("s1", &n);
        }
        for n in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), n);
        }
    }

    #[tokio::test]
    async fn leave_all_clears_every_room() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel::<u32>();
        registry.enter("s1", "a", tx.clone());
        registry.enter("s2", "a", tx);
        registry.leave_all("a");
        assert_eq!(registry.room_size("s1"), 0);
        assert_eq!(registry.room_size("s2"), 0);
    }
}
