//! Fire detection - per-level median smoothing with two independent triggers
//!
//! Raw samples go through a 5-sample rolling median. Once 30 smoothed readings
//! are held, the level is on fire if enough of them are at or above the fixed
//! threshold, or if the newest exceeds the oldest by the rate-of-rise margin.

use crate::domain::ring::Ring;
use crate::domain::types::LevelId;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::surface::ControlSurface;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Raw samples per median
pub const MEDIAN_WINDOW: usize = 5;
/// Smoothed readings evaluated by the triggers
pub const HISTORY_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireTrigger {
    FixedThreshold,
    RateOfRise,
}

impl FireTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            FireTrigger::FixedThreshold => "fixed_threshold",
            FireTrigger::RateOfRise => "rate_of_rise",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireThresholds {
    /// Degrees at or above which a smoothed reading counts as hot
    pub fixed: i16,
    /// Hot readings (out of the history window) needed to fire
    pub required_hot: usize,
    /// Newest minus oldest smoothed reading needed to fire
    pub rate_of_rise: i16,
}

impl Default for FireThresholds {
    fn default() -> Self {
        Self::new(58, 0.9, 8)
    }
}

impl FireThresholds {
    pub fn new(fixed: i16, ratio: f64, rate_of_rise: i16) -> Self {
        // Tolerate float error so 0.9 * 30 stays 27
        let required_hot = ((ratio * HISTORY_WINDOW as f64) - 1e-9).ceil().max(0.0) as usize;
        Self { fixed, required_hot, rate_of_rise }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.fire_fixed_threshold(),
            config.fire_fixed_threshold_ratio(),
            config.fire_rate_of_rise(),
        )
    }
}

/// Result of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleOutcome {
    /// Median for this tick, once five raw samples are held
    pub smoothed: Option<i16>,
    pub trigger: Option<FireTrigger>,
}

/// Median of exactly five values
pub fn median5(mut window: [i16; MEDIAN_WINDOW]) -> i16 {
    window.sort_unstable();
    window[MEDIAN_WINDOW / 2]
}

/// Pure detection state for one level
#[derive(Debug, Clone, Default)]
pub struct FireDetector {
    raw: Ring<i16, MEDIAN_WINDOW>,
    smoothed: Ring<i16, HISTORY_WINDOW>,
    thresholds: FireThresholds,
}

impl FireDetector {
    pub fn new(thresholds: FireThresholds) -> Self {
        Self { raw: Ring::new(), smoothed: Ring::new(), thresholds }
    }

    pub fn push(&mut self, sample: i16) -> SampleOutcome {
        self.raw.push(sample);
        if !self.raw.is_full() {
            return SampleOutcome::default();
        }

        let smoothed = median5(self.raw.to_array());
        self.smoothed.push(smoothed);
        SampleOutcome { smoothed: Some(smoothed), trigger: self.evaluate() }
    }

    /// Check both triggers over a full history window
    pub fn evaluate(&self) -> Option<FireTrigger> {
        if !self.smoothed.is_full() {
            return None;
        }

        let hot = self.smoothed.iter().filter(|&t| t >= self.thresholds.fixed).count();
        if hot >= self.thresholds.required_hot {
            return Some(FireTrigger::FixedThreshold);
        }

        let (oldest, newest) = (self.smoothed.oldest()?, self.smoothed.newest()?);
        if i32::from(newest) - i32::from(oldest) >= i32::from(self.thresholds.rate_of_rise) {
            return Some(FireTrigger::RateOfRise);
        }
        None
    }

    pub fn history(&self) -> impl Iterator<Item = i16> + '_ {
        self.smoothed.iter()
    }
}

/// Periodic sampler for one level
pub struct FireMonitor {
    level: LevelId,
    surface: Arc<ControlSurface>,
    detector: FireDetector,
    period: Duration,
    metrics: Arc<Metrics>,
}

impl FireMonitor {
    pub fn new(
        level: LevelId,
        surface: Arc<ControlSurface>,
        thresholds: FireThresholds,
        period: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { level, surface, detector: FireDetector::new(thresholds), period, metrics }
    }

    /// Sample until shutdown
    pub fn run(mut self) {
        info!(level = %self.level, period_ms = %self.period.as_millis(), "fire_monitor_started");
        let mut next_tick = Instant::now();

        while !self.surface.is_shutdown() {
            self.tick();
            next_tick += self.period;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // Fell behind; don't try to catch up with a burst
                next_tick = now;
            }
        }

        info!(level = %self.level, "fire_monitor_stopped");
    }

    /// Take one sample and publish the result
    pub fn tick(&mut self) -> SampleOutcome {
        let level = self.surface.level(self.level);
        let outcome = self.detector.push(level.temperature());

        let mut readout = level.readout.lock();
        if outcome.smoothed.is_some() {
            readout.smoothed = outcome.smoothed;
        }
        if let Some(trigger) = outcome.trigger {
            let first_on_level = !readout.alarm;
            readout.alarm = true;
            drop(readout);

            if first_on_level {
                self.metrics.record_fire_trigger();
                warn!(
                    level = %self.level,
                    trigger = trigger.as_str(),
                    smoothed = ?outcome.smoothed,
                    "fire_detected"
                );
            }
            if self.surface.raise_alarm() {
                warn!(level = %self.level, "alarm_raised");
            } else {
                debug!(level = %self.level, "alarm_already_raised");
            }
        }
        outcome
    }
}
