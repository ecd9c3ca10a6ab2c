//! Fixed-step replication clock for Replicast.
//!
//! [`TickClock`] drives the session's tick loop. Elapsed wall time is
//! accumulated and paid out in whole steps (20 ms at the default 50 Hz).
//! The accumulator is capped at `max_catchup_ticks` steps, so a stalled
//! process fires a bounded burst of ticks when it wakes up instead of
//! replaying all the time it lost.
//!
//! [`RoutineScheduler`] (see [`routine`]) resumes cooperative gameplay
//! routines on the same clock.
//!
//! # Integration
//!
//! The clock is designed to sit inside the session actor's `tokio::select!`
//! loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         info = clock.wait_for_tick() => {
//!             for tick in info.ticks() { /* fire one tick */ }
//!             /* flush pending traffic */
//!             clock.record_tick_end();
//!         }
//!     }
//! }
//! ```

pub mod routine;

pub use routine::{RoutineScheduler, Wait};

use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the tick clock.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz.
    pub tick_rate_hz: u32,
    /// Cap on ticks fired for a single wake-up. Time beyond this many steps
    /// is discarded.
    pub max_catchup_ticks: u32,
    /// Budget warning threshold (0.0–1.0). A warning is logged when the work
    /// reported through [`TickClock::record_tick_end`] takes more than this
    /// fraction of one step.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 50,
            max_catchup_ticks: 5,
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    /// Maximum supported tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    /// Create a config for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickClock::new`]. Rules:
    /// - `tick_rate_hz` clamped to `1..=`[`Self::MAX_TICK_RATE_HZ`].
    /// - `max_catchup_ticks` at least 1.
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            let clamped = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
            warn!(
                rate = self.tick_rate_hz,
                clamped, "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        if self.max_catchup_ticks == 0 {
            warn!("max_catchup_ticks is 0, using 1");
            self.max_catchup_ticks = 1;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of a single step.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Tick info (returned to caller each wake-up)
// ---------------------------------------------------------------------------

/// The ticks that became due during one [`TickClock::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Number of the first tick fired (ticks are numbered from 1).
    pub first_tick: u64,
    /// How many consecutive ticks fired. Always at least 1 and at most
    /// `max_catchup_ticks`.
    pub count: u32,
    /// Fixed step duration.
    pub dt: Duration,
    /// Accumulated time that was discarded by the catch-up cap.
    pub discarded: Duration,
}

impl TickInfo {
    /// The tick numbers fired, in order.
    pub fn ticks(&self) -> RangeInclusive<u64> {
        self.first_tick..=self.first_tick + u64::from(self.count) - 1
    }

    /// Number of the last tick fired.
    pub fn last_tick(&self) -> u64 {
        self.first_tick + u64::from(self.count) - 1
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for the tick clock.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    /// Total ticks fired.
    pub total_ticks: u64,
    /// Wake-ups that fired more than one tick.
    pub total_catchups: u64,
    /// Wake-ups where the accumulator hit the cap.
    pub total_clamped: u64,
    /// Total accumulated time thrown away by the cap.
    pub total_discarded: Duration,
    /// Exponential moving average of work time per wake-up (α = 0.1).
    pub avg_tick_time: Duration,
    /// Maximum work time per wake-up observed.
    pub max_tick_time: Duration,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Fixed-step accumulator clock.
///
/// Stopped on creation; [`start`](Self::start) begins accumulating from
/// the current instant.
pub struct TickClock {
    config: TickConfig,
    step: Duration,
    accumulator: Duration,
    /// When the accumulator was last fed. `None` while stopped.
    last: Option<TokioInstant>,
    tick_count: u64,
    /// Wall-clock instant when the last wake-up's work started.
    work_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickClock {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let step = config.tick_duration();
        debug!(
            rate_hz = config.tick_rate_hz,
            step_ms = step.as_secs_f64() * 1000.0,
            max_catchup = config.max_catchup_ticks,
            "tick clock created"
        );
        Self {
            config,
            step,
            accumulator: Duration::ZERO,
            last: None,
            tick_count: 0,
            work_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// Create a clock for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Starts (or restarts) accumulating from now with an empty accumulator.
    pub fn start(&mut self) {
        self.accumulator = Duration::ZERO;
        self.last = Some(TokioInstant::now());
        debug!(tick = self.tick_count, "tick clock started");
    }

    /// Stops the clock. [`wait_for_tick`](Self::wait_for_tick) pends until
    /// the next [`start`](Self::start).
    pub fn stop(&mut self) {
        if self.last.take().is_some() {
            debug!(tick = self.tick_count, "tick clock stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.last.is_some()
    }

    /// Feeds `elapsed` into the accumulator and returns how many whole steps
    /// it now holds, removing them.
    ///
    /// The accumulator never exceeds `max_catchup_ticks` steps, so the
    /// return value is bounded no matter how large `elapsed` is.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        let cap = self.step * self.config.max_catchup_ticks;
        self.accumulator += elapsed;
        if self.accumulator > cap {
            let discarded = self.accumulator - cap;
            self.accumulator = cap;
            self.metrics.total_clamped += 1;
            self.metrics.total_discarded += discarded;
            warn!(
                tick = self.tick_count,
                discarded_ms = discarded.as_secs_f64() * 1000.0,
                "tick clock stalled, discarding time beyond catch-up cap"
            );
        }

        let mut fired = 0u32;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            fired += 1;
        }
        self.tick_count += u64::from(fired);
        self.metrics.total_ticks += u64::from(fired);
        if fired > 1 {
            self.metrics.total_catchups += 1;
        }
        fired
    }

    /// Waits until at least one step has accumulated, then returns the
    /// ticks that are due.
    ///
    /// Pends forever while the clock is stopped. Cancel-safe: if the future
    /// is dropped before it completes, no time is consumed.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let Some(last) = self.last else {
            return std::future::pending().await;
        };

        let deadline = last + self.step.saturating_sub(self.accumulator);
        time::sleep_until(deadline).await;

        let now = TokioInstant::now();
        let discarded_before = self.metrics.total_discarded;
        let first_tick = self.tick_count + 1;
        let count = self.advance(now.saturating_duration_since(last));
        self.last = Some(now);
        self.work_start = Some(Instant::now());

        trace!(first_tick, count, "tick fired");

        TickInfo {
            first_tick,
            count,
            dt: self.step,
            discarded: self.metrics.total_discarded - discarded_before,
        }
    }

    /// Records that the work for the last wake-up has finished.
    ///
    /// Feeds the budget warning and the timing metrics. A no-op without a
    /// preceding [`wait_for_tick`](Self::wait_for_tick).
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.work_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        let utilization = elapsed.as_secs_f64() / self.step.as_secs_f64();
        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.step.as_secs_f64() * 1000.0,
                "tick work approaching step budget"
            );
        }

        if elapsed > self.metrics.max_tick_time {
            self.metrics.max_tick_time = elapsed;
        }
        let alpha = 0.1;
        let prev = self.metrics.avg_tick_time.as_secs_f64();
        self.metrics.avg_tick_time = Duration::from_secs_f64(
            prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha,
        );
    }

    /// Total ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The fixed step duration.
    pub fn tick_duration(&self) -> Duration {
        self.step
    }

    /// Logical time: ticks fired times the step.
    pub fn elapsed(&self) -> Duration {
        self.step * u32::try_from(self.tick_count).unwrap_or(u32::MAX)
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }
}
