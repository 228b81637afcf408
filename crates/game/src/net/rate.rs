use std::collections::HashMap;
use std::net::IpAddr;

/// What a bucket guards. Defaults come from the limiter table; dispatch is
/// a match on the tag rather than a trait hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterKind {
    ConnectionsPerIp,
    PacketsPerConnection,
    ReliablePerConnection,
    AttackInputs,
}

impl LimiterKind {
    /// (burst capacity, sustained tokens per second)
    pub fn defaults(self) -> (f64, f64) {
        match self {
            LimiterKind::ConnectionsPerIp => (10.0, 2.0),
            LimiterKind::PacketsPerConnection => (120.0, 60.0),
            LimiterKind::ReliablePerConnection => (30.0, 10.0),
            LimiterKind::AttackInputs => (1.0, 2.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64, now_ms: u64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill_ms: now_ms,
        }
    }

    pub fn for_kind(kind: LimiterKind, now_ms: u64) -> Self {
        let (capacity, refill) = kind.defaults();
        Self::new(capacity, refill, now_ms)
    }

    pub fn allow(&mut self, now_ms: u64) -> bool {
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.tokens = self.capacity;
        self.last_refill_ms = now_ms;
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now_ms: u64) {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed_ms == 0 {
            return;
        }
        self.tokens =
            (self.tokens + self.refill_per_sec * elapsed_ms as f64 / 1000.0).min(self.capacity);
        self.last_refill_ms = now_ms;
    }
}

#[derive(Debug, Clone)]
pub struct RateLimits {
    pub connections_per_ip: (f64, f64),
    pub packets_per_connection: (f64, f64),
    pub reliable_per_connection: (f64, f64),
    /// One attack per 500 ms.
    pub attack_interval_ms: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            connections_per_ip: LimiterKind::ConnectionsPerIp.defaults(),
            packets_per_connection: LimiterKind::PacketsPerConnection.defaults(),
            reliable_per_connection: LimiterKind::ReliablePerConnection.defaults(),
            attack_interval_ms: 500,
        }
    }
}

/// Pre-handshake gate: one bucket per source IP so a single host cannot
/// churn connection attempts. Stale buckets are swept periodically.
#[derive(Debug, Default)]
pub struct ConnectionGate {
    buckets: HashMap<IpAddr, TokenBucket>,
    limits: (f64, f64),
}

impl ConnectionGate {
    pub fn new(limits: (f64, f64)) -> Self {
        Self {
            buckets: HashMap::new(),
            limits,
        }
    }

    pub fn allow(&mut self, ip: IpAddr, now_ms: u64) -> bool {
        self.buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(self.limits.0, self.limits.1, now_ms))
            .allow(now_ms)
    }

    /// Drops buckets that have fully refilled; they carry no state worth
    /// keeping.
    pub fn sweep(&mut self, now_ms: u64) {
        let capacity = self.limits.0;
        self.buckets.retain(|_, bucket| {
            bucket.refill(now_ms);
            bucket.available() < capacity
        });
    }

    pub fn tracked_ips(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_sustained() {
        let mut bucket = TokenBucket::for_kind(LimiterKind::PacketsPerConnection, 0);

        // Full burst available immediately.
        for _ in 0..120 {
            assert!(bucket.allow(0));
        }
        assert!(!bucket.allow(0));

        // After one second, sustained rate has refilled 60 tokens.
        for _ in 0..60 {
            assert!(bucket.allow(1000));
        }
        assert!(!bucket.allow(1000));
    }

    #[test]
    fn connection_gate_throttles_per_ip() {
        let mut gate = ConnectionGate::new(LimiterKind::ConnectionsPerIp.defaults());
        let attacker: IpAddr = "198.51.100.7".parse().unwrap();
        let bystander: IpAddr = "203.0.113.9".parse().unwrap();

        for _ in 0..10 {
            assert!(gate.allow(attacker, 0));
        }
        assert!(!gate.allow(attacker, 0));
        assert!(gate.allow(bystander, 0));
    }

    #[test]
    fn gate_sweep_drops_idle_ips() {
        let mut gate = ConnectionGate::new((10.0, 2.0));
        let ip: IpAddr = "198.51.100.7".parse().unwrap();
        gate.allow(ip, 0);
        assert_eq!(gate.tracked_ips(), 1);

        gate.sweep(10_000);
        assert_eq!(gate.tracked_ips(), 0);
    }

    #[test]
    fn reset_restores_burst() {
        let mut bucket = TokenBucket::new(2.0, 1.0, 0);
        assert!(bucket.allow(0));
        assert!(bucket.allow(0));
        assert!(!bucket.allow(0));

        bucket.reset(0);
        assert!(bucket.allow(0));
    }
}
