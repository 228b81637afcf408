use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::messages::{ZoneMessage, broadcast_channel, zone_channel};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("channel {0} has no subscribers")]
    NoSubscribers(String),
    #[error("fabric shut down")]
    Closed,
}

/// Cross-zone message fabric contract: per-channel FIFO, at-least-once.
/// Receivers deduplicate on (source_zone, sequence); the session cache's
/// pub/sub is one valid implementation, the in-process fabric below is
/// another.
pub trait ZoneBus: Send {
    fn publish(&self, channel: &str, message: &ZoneMessage) -> Result<(), BusError>;

    /// Drains everything queued for this zone (its own channel plus the
    /// broadcast channel). Never blocks.
    fn poll(&mut self, out: &mut Vec<ZoneMessage>);
}

/// In-process fabric backed by per-channel queues. Zones in the same
/// process (tests, single-host fleets) attach handles; delivery order per
/// channel matches publish order.
#[derive(Debug, Clone, Default)]
pub struct InProcessFabric {
    channels: Arc<Mutex<HashMap<String, Vec<UnboundedSender<ZoneMessage>>>>>,
}

impl InProcessFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, zone_id: u32) -> ZoneBusHandle {
        let (own_tx, own_rx) = unbounded_channel();
        let (broadcast_tx, broadcast_rx) = unbounded_channel();

        let mut channels = self.channels.lock().expect("fabric lock poisoned");
        channels.entry(zone_channel(zone_id)).or_default().push(own_tx);
        channels
            .entry(broadcast_channel())
            .or_default()
            .push(broadcast_tx);

        ZoneBusHandle {
            fabric: self.clone(),
            own_rx,
            broadcast_rx,
        }
    }

    fn send(&self, channel: &str, message: &ZoneMessage) -> Result<(), BusError> {
        let mut channels = self.channels.lock().expect("fabric lock poisoned");
        let Some(subscribers) = channels.get_mut(channel) else {
            return Err(BusError::NoSubscribers(channel.to_string()));
        };

        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        if subscribers.is_empty() {
            return Err(BusError::NoSubscribers(channel.to_string()));
        }
        Ok(())
    }
}

/// One zone's attachment to the fabric.
#[derive(Debug)]
pub struct ZoneBusHandle {
    fabric: InProcessFabric,
    own_rx: UnboundedReceiver<ZoneMessage>,
    broadcast_rx: UnboundedReceiver<ZoneMessage>,
}

impl ZoneBus for ZoneBusHandle {
    fn publish(&self, channel: &str, message: &ZoneMessage) -> Result<(), BusError> {
        self.fabric.send(channel, message)
    }

    fn poll(&mut self, out: &mut Vec<ZoneMessage>) {
        while let Ok(message) = self.own_rx.try_recv() {
            out.push(message);
        }
        while let Ok(message) = self.broadcast_rx.try_recv() {
            out.push(message);
        }
    }
}

/// At-least-once delivery guard: drops redeliveries keyed by
/// (source_zone, sequence) within a bounded window per source.
#[derive(Debug, Default)]
pub struct MessageDedup {
    per_source: HashMap<u32, SourceWindow>,
}

#[derive(Debug, Default)]
struct SourceWindow {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

const DEDUP_WINDOW: usize = 1024;

impl MessageDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the message is fresh and should be processed.
    pub fn accept(&mut self, source_zone: u32, sequence: u64) -> bool {
        let window = self.per_source.entry(source_zone).or_default();
        if !window.seen.insert(sequence) {
            return false;
        }
        window.order.push_back(sequence);
        while window.order.len() > DEDUP_WINDOW {
            if let Some(old) = window.order.pop_front() {
                window.seen.remove(&old);
            }
        }
        true
    }

    pub fn forget_source(&mut self, source_zone: u32) {
        self.per_source.remove(&source_zone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::messages::ZonePayload;

    fn message(source: u32, target: u32, sequence: u64) -> ZoneMessage {
        ZoneMessage {
            source_zone: source,
            target_zone: target,
            timestamp_ms: 0,
            sequence,
            payload: ZonePayload::ZoneStatus {
                player_count: 0,
                capacity: 32,
            },
        }
    }

    #[test]
    fn point_to_point_delivery_in_order() {
        let fabric = InProcessFabric::new();
        let bus1 = fabric.attach(1);
        let mut bus2 = fabric.attach(2);

        bus1.publish(&zone_channel(2), &message(1, 2, 1)).unwrap();
        bus1.publish(&zone_channel(2), &message(1, 2, 2)).unwrap();

        let mut got = Vec::new();
        bus2.poll(&mut got);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].sequence, 1);
        assert_eq!(got[1].sequence, 2);
    }

    #[test]
    fn broadcast_reaches_every_zone() {
        let fabric = InProcessFabric::new();
        let mut bus1 = fabric.attach(1);
        let mut bus2 = fabric.attach(2);
        let mut bus3 = fabric.attach(3);

        bus1.publish(&broadcast_channel(), &message(1, 0, 5)).unwrap();

        for bus in [&mut bus1, &mut bus2, &mut bus3] {
            let mut got = Vec::new();
            bus.poll(&mut got);
            assert_eq!(got.len(), 1, "broadcast missing");
            assert_eq!(got[0].sequence, 5);
        }
    }

    #[test]
    fn publish_to_unknown_channel_errors() {
        let fabric = InProcessFabric::new();
        let bus1 = fabric.attach(1);
        assert!(matches!(
            bus1.publish(&zone_channel(99), &message(1, 99, 1)),
            Err(BusError::NoSubscribers(_))
        ));
    }

    #[test]
    fn dedup_drops_redelivery() {
        let mut dedup = MessageDedup::new();
        assert!(dedup.accept(1, 10));
        assert!(!dedup.accept(1, 10));
        // Same sequence from another zone is distinct.
        assert!(dedup.accept(2, 10));
    }

    #[test]
    fn dedup_window_is_bounded() {
        let mut dedup = MessageDedup::new();
        for seq in 0..(DEDUP_WINDOW as u64 + 100) {
            assert!(dedup.accept(1, seq));
        }
        // Inside the window: still remembered.
        assert!(!dedup.accept(1, DEDUP_WINDOW as u64 + 50));
        // Far outside: aged out, accepted again (at-least-once tradeoff).
        assert!(dedup.accept(1, 0));
    }
}
