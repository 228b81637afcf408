use std::time::Instant;

#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Over this, QoS degradation activates.
    pub soft_budget_ms: f32,
    /// Degradation clears after staying under this for `recover_hold_ms`.
    pub recover_ms: f32,
    pub recover_hold_ms: u64,
    /// Over this, a critical event is logged and load shedding deepens.
    pub critical_ms: f32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            soft_budget_ms: 20.0,
            recover_ms: 18.0,
            recover_hold_ms: 1_000,
            critical_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    Nominal,
    Degraded,
    Critical,
}

/// Scoped phase timer: name in, (name, elapsed ms) out.
pub struct PhaseTimer {
    name: &'static str,
    started: Instant,
}

impl PhaseTimer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
        }
    }

    pub fn stop(self) -> (&'static str, f32) {
        (self.name, self.started.elapsed().as_secs_f32() * 1000.0)
    }
}

/// Tick budget tracking and QoS ladder. Over 20 ms the AOI tier rates are
/// halved (scale 2); over 50 ms the monitor logs critical and sheds
/// further (scale 4); recovery requires a sustained second under 18 ms.
#[derive(Debug)]
pub struct BudgetMonitor {
    config: BudgetConfig,
    degraded: bool,
    shedding: bool,
    under_recover_since_ms: Option<u64>,
    last_tick_ms: f32,
    last_phases: Vec<(&'static str, f32)>,
    overruns: u64,
    criticals: u64,
    ticks: u64,
}

impl BudgetMonitor {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            degraded: false,
            shedding: false,
            under_recover_since_ms: None,
            last_tick_ms: 0.0,
            last_phases: Vec::new(),
            overruns: 0,
            criticals: 0,
            ticks: 0,
        }
    }

    pub fn record_tick(
        &mut self,
        now_ms: u64,
        tick_ms: f32,
        phases: Vec<(&'static str, f32)>,
    ) -> BudgetVerdict {
        self.ticks += 1;
        self.last_tick_ms = tick_ms;
        self.last_phases = phases;

        if tick_ms > self.config.critical_ms {
            self.overruns += 1;
            self.criticals += 1;
            self.degraded = true;
            self.shedding = true;
            self.under_recover_since_ms = None;
            log::error!(
                "tick overran critical budget: {:.2} ms (phases: {:?})",
                tick_ms,
                self.last_phases
            );
            return BudgetVerdict::Critical;
        }

        if tick_ms > self.config.soft_budget_ms {
            self.overruns += 1;
            self.under_recover_since_ms = None;
            if !self.degraded {
                self.degraded = true;
                log::warn!("tick budget exceeded ({:.2} ms); degrading AOI rates", tick_ms);
            }
            return BudgetVerdict::Degraded;
        }

        if self.degraded {
            if tick_ms < self.config.recover_ms {
                let since = *self.under_recover_since_ms.get_or_insert(now_ms);
                if now_ms.saturating_sub(since) >= self.config.recover_hold_ms {
                    self.degraded = false;
                    self.shedding = false;
                    self.under_recover_since_ms = None;
                    log::info!("tick budget recovered; AOI rates restored");
                }
            } else {
                self.under_recover_since_ms = None;
            }
        }

        if self.degraded {
            BudgetVerdict::Degraded
        } else {
            BudgetVerdict::Nominal
        }
    }

    /// Multiplier applied to AOI tier intervals.
    pub fn interval_scale(&self) -> u32 {
        if self.shedding {
            4
        } else if self.degraded {
            2
        } else {
            1
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn last_tick_ms(&self) -> f32 {
        self.last_tick_ms
    }

    pub fn last_phases(&self) -> &[(&'static str, f32)] {
        &self.last_phases
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn criticals(&self) -> u64 {
        self.criticals
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Default for BudgetMonitor {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}
