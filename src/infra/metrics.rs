//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid contention with the
//! controllers' own locks. Reporting swaps the periodic counters.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.
//! Occupancy and revenue live behind their owners' locks, not here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Billing queue delay bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const QUEUE_DELAY_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

/// Gate cycle duration bucket boundaries (microseconds)
/// Buckets: ≤1ms, ≤2ms, ≤4ms, ... ≤512ms, >512ms
const GATE_CYCLE_BOUNDS: [u64; 10] =
    [1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000, 512000];

const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a value using binary search
#[inline]
fn bucket_index(bounds: &[u64; 10], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
/// (the overflow bucket reports twice the last bound)
fn percentile_from_buckets(
    bounds: &[u64; 10],
    buckets: &[u64; NUM_BUCKETS],
    percentile: f64,
) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return bounds.get(i).copied().unwrap_or(bounds[9] * 2);
        }
    }
    bounds[9] * 2
}

/// Lock-free metrics collector shared by every actor
pub struct Metrics {
    cars_admitted: AtomicU64,
    plates_rejected: AtomicU64,
    turned_away_full: AtomicU64,
    cars_parked: AtomicU64,
    cars_exited: AtomicU64,
    bills_written: AtomicU64,
    ledger_failures: AtomicU64,
    rendezvous_timeouts: AtomicU64,
    ordering_defects: AtomicU64,
    fire_triggers: AtomicU64,
    /// Gate cycles since last report (reset on report)
    gate_cycles_since_report: AtomicU64,
    gate_cycle_buckets: [AtomicU64; NUM_BUCKETS],
    gate_cycle_max_us: AtomicU64,
    /// Billing queue delay (enqueue to worker pickup), reset on report
    billing_delay_buckets: [AtomicU64; NUM_BUCKETS],
    billing_delay_max_us: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cars_admitted: AtomicU64::new(0),
            plates_rejected: AtomicU64::new(0),
            turned_away_full: AtomicU64::new(0),
            cars_parked: AtomicU64::new(0),
            cars_exited: AtomicU64::new(0),
            bills_written: AtomicU64::new(0),
            ledger_failures: AtomicU64::new(0),
            rendezvous_timeouts: AtomicU64::new(0),
            ordering_defects: AtomicU64::new(0),
            fire_triggers: AtomicU64::new(0),
            gate_cycles_since_report: AtomicU64::new(0),
            gate_cycle_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            gate_cycle_max_us: AtomicU64::new(0),
            billing_delay_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            billing_delay_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_admitted(&self) {
        self.cars_admitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.plates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_full(&self) {
        self.turned_away_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parked(&self) {
        self.cars_parked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exited(&self) {
        self.cars_exited.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bill_written(&self) {
        self.bills_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ledger_failure(&self) {
        self.ledger_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rendezvous_timeout(&self) {
        self.rendezvous_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ordering_defect(&self) {
        self.ordering_defects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fire_trigger(&self) {
        self.fire_triggers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed gate cycle (CLOSED back to CLOSED)
    #[inline]
    pub fn record_gate_cycle(&self, duration_us: u64) {
        self.gate_cycles_since_report.fetch_add(1, Ordering::Relaxed);
        let bucket = bucket_index(&GATE_CYCLE_BOUNDS, duration_us);
        self.gate_cycle_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.gate_cycle_max_us, duration_us);
    }

    /// Record billing queue delay (time from enqueue to worker pickup)
    #[inline]
    pub fn record_billing_queue_delay(&self, delay_us: u64) {
        let bucket = bucket_index(&QUEUE_DELAY_BOUNDS, delay_us);
        self.billing_delay_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.billing_delay_max_us, delay_us);
    }

    #[inline]
    pub fn cars_admitted(&self) -> u64 {
        self.cars_admitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn plates_rejected(&self) -> u64 {
        self.plates_rejected.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn turned_away_full(&self) -> u64 {
        self.turned_away_full.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bills_written(&self) -> u64 {
        self.bills_written.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ledger_failures(&self) -> u64 {
        self.ledger_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ordering_defects(&self) -> u64 {
        self.ordering_defects.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fire_triggers(&self) -> u64 {
        self.fire_triggers.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. Monotonic totals are
    /// read without reset.
    pub fn report(&self) -> MetricsSummary {
        let gate_cycles = self.gate_cycles_since_report.swap(0, Ordering::Relaxed);
        let gate_buckets = swap_buckets(&self.gate_cycle_buckets);
        let gate_max = self.gate_cycle_max_us.swap(0, Ordering::Relaxed);
        let delay_buckets = swap_buckets(&self.billing_delay_buckets);
        let delay_max = self.billing_delay_max_us.swap(0, Ordering::Relaxed);

        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };
        let gate_cycles_per_sec =
            if elapsed_secs > 0.0 { gate_cycles as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            cars_admitted: self.cars_admitted(),
            plates_rejected: self.plates_rejected(),
            turned_away_full: self.turned_away_full(),
            cars_parked: self.cars_parked.load(Ordering::Relaxed),
            cars_exited: self.cars_exited.load(Ordering::Relaxed),
            bills_written: self.bills_written(),
            ledger_failures: self.ledger_failures(),
            rendezvous_timeouts: self.rendezvous_timeouts.load(Ordering::Relaxed),
            ordering_defects: self.ordering_defects(),
            fire_triggers: self.fire_triggers(),
            gate_cycles,
            gate_cycles_per_sec,
            gate_cycle_buckets: gate_buckets,
            gate_cycle_p50_us: percentile_from_buckets(&GATE_CYCLE_BOUNDS, &gate_buckets, 0.50),
            gate_cycle_p99_us: percentile_from_buckets(&GATE_CYCLE_BOUNDS, &gate_buckets, 0.99),
            gate_cycle_max_us: gate_max,
            billing_delay_buckets: delay_buckets,
            billing_delay_p99_us: percentile_from_buckets(
                &QUEUE_DELAY_BOUNDS,
                &delay_buckets,
                0.99,
            ),
            billing_delay_max_us: delay_max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub cars_admitted: u64,
    pub plates_rejected: u64,
    pub turned_away_full: u64,
    pub cars_parked: u64,
    pub cars_exited: u64,
    pub bills_written: u64,
    pub ledger_failures: u64,
    pub rendezvous_timeouts: u64,
    pub ordering_defects: u64,
    pub fire_triggers: u64,
    /// Gate cycles completed since the previous report
    pub gate_cycles: u64,
    pub gate_cycles_per_sec: f64,
    /// Gate cycle duration histogram
    /// Bounds: ≤1, ≤2, ≤4, ≤8, ≤16, ≤32, ≤64, ≤128, ≤256, ≤512, >512 ms
    pub gate_cycle_buckets: [u64; NUM_BUCKETS],
    pub gate_cycle_p50_us: u64,
    pub gate_cycle_p99_us: u64,
    pub gate_cycle_max_us: u64,
    /// Billing queue delay histogram
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub billing_delay_buckets: [u64; NUM_BUCKETS],
    pub billing_delay_p99_us: u64,
    pub billing_delay_max_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            admitted = %self.cars_admitted,
            rejected = %self.plates_rejected,
            full = %self.turned_away_full,
            parked = %self.cars_parked,
            exited = %self.cars_exited,
            bills = %self.bills_written,
            ledger_failures = %self.ledger_failures,
            timeouts = %self.rendezvous_timeouts,
            ordering_defects = %self.ordering_defects,
            gate_cycles_per_sec = format!("{:.1}", self.gate_cycles_per_sec),
            gate_p50_us = %self.gate_cycle_p50_us,
            gate_p99_us = %self.gate_cycle_p99_us,
            billing_p99_us = %self.billing_delay_p99_us,
            "metrics"
        );
    }
}
