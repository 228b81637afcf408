use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

pub const SESSION_TTL_SECS: u64 = 3_600;

/// Key conventions for the session cache.
pub mod keys {
    pub fn player_session(player_id: u64) -> String {
        format!("player:{player_id}:session")
    }

    pub fn player_pos(player_id: u64) -> String {
        format!("player:{player_id}:pos")
    }

    pub fn zone_players(zone_id: u32) -> String {
        format!("zone:{zone_id}:players")
    }

    pub fn zone_entities(zone_id: u32) -> String {
        format!("zone:{zone_id}:entities")
    }

    pub fn entity_state(entity_id: u32) -> String {
        format!("entity:{entity_id}:state")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    Set {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Delete {
        key: String,
    },
}

/// Storage the background worker applies operations to. A network-backed
/// cache client implements this; tests use the in-memory map.
pub trait SessionBackend: Send + 'static {
    fn apply(&mut self, op: SessionOp) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionBackend {
    entries: Arc<Mutex<HashMap<String, (String, u64)>>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("session backend lock poisoned")
            .get(key)
            .map(|(value, _)| value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("session backend lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionBackend for MemorySessionBackend {
    fn apply(&mut self, op: SessionOp) -> Result<(), String> {
        let mut entries = self.entries.lock().expect("session backend lock poisoned");
        match op {
            SessionOp::Set {
                key,
                value,
                ttl_secs,
            } => {
                entries.insert(key, (value, ttl_secs));
            }
            SessionOp::Delete { key } => {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}

/// Fire-and-forget session writes. `set`/`delete` enqueue and return
/// immediately; a background worker drains the queue. Failures increment a
/// counter and log, never touching simulation correctness.
pub struct SessionWriter {
    tx: Option<UnboundedSender<SessionOp>>,
    failures: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl SessionWriter {
    pub fn spawn<B: SessionBackend>(mut backend: B) -> Self {
        let (tx, mut rx) = unbounded_channel::<SessionOp>();
        let failures = Arc::new(AtomicU64::new(0));

        let worker_failures = Arc::clone(&failures);
        let worker = std::thread::Builder::new()
            .name("session-writer".into())
            .spawn(move || {
                while let Some(op) = rx.blocking_recv() {
                    if let Err(error) = backend.apply(op) {
                        worker_failures.fetch_add(1, Ordering::Relaxed);
                        log::warn!("session cache write failed: {error}");
                    }
                }
            })
            .expect("spawn session writer");

        Self {
            tx: Some(tx),
            failures,
            worker: Some(worker),
        }
    }

    pub fn set(&self, key: String, value: String, ttl_secs: u64) {
        if let Some(tx) = &self.tx {
            if tx.send(SessionOp::Set {
                key,
                value,
                ttl_secs,
            })
            .is_err()
            {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn delete(&self, key: String) {
        if let Some(tx) = &self.tx {
            if tx.send(SessionOp::Delete { key }).is_err() {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Drops the queue and joins the worker, flushing pending writes.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_conventions() {
        assert_eq!(keys::player_session(7), "player:7:session");
        assert_eq!(keys::player_pos(7), "player:7:pos");
        assert_eq!(keys::zone_players(3), "zone:3:players");
        assert_eq!(keys::entity_state(11), "entity:11:state");
    }

    #[test]
    fn writes_flush_through_worker() {
        let backend = MemorySessionBackend::new();
        let mut writer = SessionWriter::spawn(backend.clone());

        writer.set(keys::player_session(1), "zone=1".into(), SESSION_TTL_SECS);
        writer.set(keys::player_pos(1), "0,0,0".into(), 60);
        writer.delete(keys::player_pos(1));
        writer.shutdown();

        assert_eq!(backend.get(&keys::player_session(1)).as_deref(), Some("zone=1"));
        assert!(backend.get(&keys::player_pos(1)).is_none());
        assert_eq!(writer.failures(), 0);
    }

    #[test]
    fn backend_failure_counts_not_panics() {
        struct FailingBackend;
        impl SessionBackend for FailingBackend {
            fn apply(&mut self, _op: SessionOp) -> Result<(), String> {
                Err("cache unreachable".into())
            }
        }

        let mut writer = SessionWriter::spawn(FailingBackend);
        writer.set("k".into(), "v".into(), 1);
        writer.shutdown();
        assert_eq!(writer.failures(), 1);
    }
}
