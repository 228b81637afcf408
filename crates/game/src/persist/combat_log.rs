use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::event::GameEvent;

const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoggedEvent {
    pub tick: u32,
    pub timestamp_ms: u64,
    pub event: GameEvent,
}

/// Durable event-history sink. Batches are appended whole; a lost batch is
/// a metrics blip, never a simulation error.
pub trait CombatLogBackend: Send + 'static {
    fn append(&mut self, batch: Vec<LoggedEvent>) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCombatLog {
    events: Arc<Mutex<Vec<LoggedEvent>>>,
}

impl MemoryCombatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoggedEvent> {
        self.events.lock().expect("combat log lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("combat log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CombatLogBackend for MemoryCombatLog {
    fn append(&mut self, mut batch: Vec<LoggedEvent>) -> Result<(), String> {
        self.events
            .lock()
            .expect("combat log lock poisoned")
            .append(&mut batch);
        Ok(())
    }
}

/// Buffers combat events and ships them in batches: a full buffer flushes
/// immediately, the tick loop flushes the remainder at phase 9.
pub struct CombatLogWriter {
    tx: Option<UnboundedSender<Vec<LoggedEvent>>>,
    buffer: Vec<LoggedEvent>,
    batch_size: usize,
    failures: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl CombatLogWriter {
    pub fn spawn<B: CombatLogBackend>(backend: B) -> Self {
        Self::with_batch_size(backend, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size<B: CombatLogBackend>(mut backend: B, batch_size: usize) -> Self {
        let (tx, mut rx) = unbounded_channel::<Vec<LoggedEvent>>();
        let failures = Arc::new(AtomicU64::new(0));

        let worker_failures = Arc::clone(&failures);
        let worker = std::thread::Builder::new()
            .name("combat-log".into())
            .spawn(move || {
                while let Some(batch) = rx.blocking_recv() {
                    if let Err(error) = backend.append(batch) {
                        worker_failures.fetch_add(1, Ordering::Relaxed);
                        log::warn!("combat log append failed: {error}");
                    }
                }
            })
            .expect("spawn combat log worker");

        Self {
            tx: Some(tx),
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            failures,
            worker: Some(worker),
        }
    }

    pub fn record(&mut self, tick: u32, timestamp_ms: u64, event: GameEvent) {
        self.buffer.push(LoggedEvent {
            tick,
            timestamp_ms,
            event,
        });
        if self.buffer.len() >= self.batch_size {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        if let Some(tx) = &self.tx {
            if tx.send(batch).is_err() {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn shutdown(&mut self) {
        self.flush();
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CombatLogWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
