//! Reconciliation scheduling: bounded re-annotation passes.
//!
//! Late or partial template renders can wipe the first annotation pass, so
//! the view re-runs the pipeline on a fixed schedule after load plus a
//! capped periodic check. The host drives this with a monotonic clock; no
//! timers live in the engine, which keeps teardown a plain drop.

/// Startup pass offsets after view creation.
pub const STARTUP_PASS_DELAYS_MS: [u64; 3] = [0, 250, 1500];
/// Spacing of the capped periodic check.
pub const PERIODIC_INTERVAL_MS: u64 = 1000;
/// The periodic check gives up after this many ticks.
pub const MAX_PERIODIC_TICKS: u32 = 10;

/// What work is due at one clock reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuePasses {
    pub startup: bool,
    pub periodic: bool,
}

/// Pass schedule for one proposal view, driven by elapsed milliseconds.
#[derive(Debug, Clone)]
pub struct ReconcileSchedule {
    next_startup: usize,
    periodic_ticks: u32,
    next_periodic_at_ms: u64,
    cancelled: bool,
}

impl Default for ReconcileSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileSchedule {
    pub fn new() -> Self {
        Self {
            next_startup: 0,
            periodic_ticks: 0,
            next_periodic_at_ms: PERIODIC_INTERVAL_MS,
            cancelled: false,
        }
    }

    /// Reports due work at `now_ms` and advances the schedule. Multiple
    /// overdue startup offsets coalesce into a single pass.
    pub fn due(&mut self, now_ms: u64) -> DuePasses {
        if self.cancelled {
            return DuePasses::default();
        }

        let mut due = DuePasses::default();
        while self.next_startup < STARTUP_PASS_DELAYS_MS.len()
            && STARTUP_PASS_DELAYS_MS[self.next_startup] <= now_ms
        {
            self.next_startup += 1;
            due.startup = true;
        }

        if self.periodic_ticks < MAX_PERIODIC_TICKS && now_ms >= self.next_periodic_at_ms {
            self.periodic_ticks += 1;
            self.next_periodic_at_ms = now_ms + PERIODIC_INTERVAL_MS;
            due.periodic = true;
        }

        due
    }

    /// Tears the schedule down; every later `due` reports nothing.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn periodic_exhausted(&self) -> bool {
        self.periodic_ticks >= MAX_PERIODIC_TICKS
    }
}
