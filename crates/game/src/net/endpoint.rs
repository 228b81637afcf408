use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use super::protocol::MAX_PACKET_SIZE;

#[derive(Debug, Clone)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct EndpointStats {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub oversized_dropped: AtomicU64,
}

/// UDP transport adapter. The socket is owned by two I/O threads; the tick
/// thread talks to them through queues and never blocks on the network:
/// ingress drains at the top of the tick, egress is an MPSC into the
/// writer thread.
pub struct NetworkEndpoint {
    local_addr: SocketAddr,
    ingress: Receiver<Datagram>,
    egress: Sender<Datagram>,
    stats: Arc<EndpointStats>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(2)))?;
        let local_addr = socket.local_addr()?;

        let stats = Arc::new(EndpointStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let (ingress_tx, ingress_rx) = channel::<Datagram>();
        let (egress_tx, egress_rx) = channel::<Datagram>();

        let reader = {
            let socket = socket.try_clone()?;
            let stats = Arc::clone(&stats);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("net-reader".into())
                .spawn(move || reader_loop(socket, ingress_tx, stats, running))?
        };

        let writer = {
            let stats = Arc::clone(&stats);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("net-writer".into())
                .spawn(move || writer_loop(socket, egress_rx, stats, running))?
        };

        Ok(Self {
            local_addr,
            ingress: ingress_rx,
            egress: egress_tx,
            stats,
            running,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    /// Non-blocking drain of everything the reader thread has queued.
    pub fn drain_ingress(&self, out: &mut Vec<Datagram>) {
        loop {
            match self.ingress.try_recv() {
                Ok(datagram) => out.push(datagram),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Queues a datagram for the writer thread. Oversized payloads are
    /// dropped here so a bug upstream cannot fragment.
    pub fn send_to(&self, bytes: Vec<u8>, addr: SocketAddr) -> bool {
        if bytes.len() > MAX_PACKET_SIZE {
            self.stats.oversized_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.egress.send(Datagram { addr, bytes }).is_ok()
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NetworkEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_loop(
    socket: UdpSocket,
    ingress: Sender<Datagram>,
    stats: Arc<EndpointStats>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_PACKET_SIZE];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((size, addr)) => {
                if size == 0 {
                    continue;
                }
                stats.packets_received.fetch_add(1, Ordering::Relaxed);
                stats.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
                if ingress
                    .send(Datagram {
                        addr,
                        bytes: buf[..size].to_vec(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(_) => std::thread::sleep(Duration::from_millis(1)),
        }
    }
}

fn writer_loop(
    socket: UdpSocket,
    egress: Receiver<Datagram>,
    stats: Arc<EndpointStats>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match egress.recv_timeout(Duration::from_millis(5)) {
            Ok(datagram) => {
                if let Ok(bytes) = socket.send_to(&datagram.bytes, datagram.addr) {
                    stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    stats.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Drain what was queued before shutdown so disconnect notices go out.
    while let Ok(datagram) = egress.try_recv() {
        let _ = socket.send_to(&datagram.bytes, datagram.addr);
    }
}
