//! Control surface - the typed boundary between the controllers and the hardware
//!
//! One record per entrance, exit and level, each field paired with its own
//! lock and condition variable. Writers lock, mutate, unlock, then notify;
//! readers lock and wait on the condition until a predicate over the field holds.
//! Counts are fixed by the physical layout, so the registry is a set of arrays
//! indexed by entrance/exit/level id.
//!
//! Shutdown is broadcast by setting the lifecycle flag and then notifying every
//! condition under its own lock, so a waiter that checked the flag before
//! parking is always woken.

use crate::domain::types::{
    sign, GateId, GateState, LevelId, Plate, ENTRANCES, EXITS, LEVELS,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A value guarded by a lock and paired with a rendezvous condition
#[derive(Debug, Default)]
pub struct Rendezvous<T> {
    value: Mutex<T>,
    cond: Condvar,
}

impl<T> Rendezvous<T> {
    pub fn new(value: T) -> Self {
        Self { value: Mutex::new(value), cond: Condvar::new() }
    }

    /// Mutate under the lock, release, then wake every waiter
    pub fn publish<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.value.lock();
            f(&mut guard)
        };
        self.cond.notify_all();
        result
    }

    /// Wait until `take` yields a value, or `deadline` passes (None)
    ///
    /// `take` runs under the lock each time the condition is signalled and may
    /// consume the field. Without a deadline the wait is unbounded.
    pub fn wait_for<R>(
        &self,
        deadline: Option<Instant>,
        mut take: impl FnMut(&mut T) -> Option<R>,
    ) -> Option<R> {
        let mut guard = self.value.lock();
        loop {
            if let Some(result) = take(&mut guard) {
                drop(guard);
                // Consumers may have freed the slot for a blocked writer
                self.cond.notify_all();
                return Some(result);
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return take(&mut guard);
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock()
    }

    /// Wait on the condition with the caller's guard, no deadline
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.cond.wait(guard);
    }

    /// Wait on the condition with the caller's guard (for multi-step protocols)
    pub fn wait_until(&self, guard: &mut MutexGuard<'_, T>, deadline: Instant) -> bool {
        !self.cond.wait_until(guard, deadline).timed_out()
    }

    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Lock then notify, pairing with a flag set before the call
    pub fn wake(&self) {
        let _guard = self.value.lock();
        self.cond.notify_all();
    }
}

impl<T: Clone> Rendezvous<T> {
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }
}

/// License plate reader: holds at most one unread plate
pub type Lpr = Rendezvous<Option<Plate>>;

/// Boom gate record. Only the gate's controller mutates `state`.
#[derive(Debug, Clone)]
pub struct GateSlot {
    pub state: GateState,
    /// An authorized open request is waiting for the controller
    pub open_requested: bool,
    /// Number of completed CLOSED→...→CLOSED cycles
    pub cycles_completed: u64,
    /// Alarm override: raise and hold open
    pub evacuate: bool,
    /// States visited since the gate last left CLOSED
    pub cycle_log: SmallVec<[GateState; 8]>,
}

impl Default for GateSlot {
    fn default() -> Self {
        Self {
            state: GateState::Closed,
            open_requested: false,
            cycles_completed: 0,
            evacuate: false,
            cycle_log: SmallVec::new(),
        }
    }
}

pub type BoomGate = Rendezvous<GateSlot>;

/// Entrance information sign
#[derive(Debug, Clone, Copy)]
pub struct SignSlot {
    pub display: u8,
    /// Incremented on every write so readers can wait for a fresh value
    pub updates: u64,
}

impl Default for SignSlot {
    fn default() -> Self {
        Self { display: sign::BLANK, updates: 0 }
    }
}

pub type InfoSign = Rendezvous<SignSlot>;

#[derive(Debug, Default)]
pub struct Entrance {
    pub lpr: Lpr,
    pub gate: BoomGate,
    pub sign: InfoSign,
}

#[derive(Debug, Default)]
pub struct Exit {
    pub lpr: Lpr,
    pub gate: BoomGate,
}

/// Values the fire monitor publishes for display
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelReadout {
    pub smoothed: Option<i16>,
    pub alarm: bool,
}

#[derive(Debug, Default)]
pub struct Level {
    pub lpr: Lpr,
    /// Raw sensor value, written by the hardware side
    pub temperature: Mutex<i16>,
    pub readout: Mutex<LevelReadout>,
}

impl Level {
    pub fn set_temperature(&self, degrees: i16) {
        *self.temperature.lock() = degrees;
    }

    pub fn temperature(&self) -> i16 {
        *self.temperature.lock()
    }

    pub fn readout(&self) -> LevelReadout {
        *self.readout.lock()
    }
}

/// Process lifecycle handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Ready,
    ShuttingDown,
}

/// Process-wide alarm flag. Monotonic: once raised it is never cleared.
#[derive(Debug, Default)]
pub struct AlarmState {
    raised: Rendezvous<bool>,
    flag: AtomicBool,
}

impl AlarmState {
    /// Raise the alarm; returns true if this call raised it
    pub fn raise(&self) -> bool {
        self.flag.store(true, Ordering::Release);
        self.raised.publish(|raised| !std::mem::replace(raised, true))
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Block until the alarm is raised or `stop` returns true
    /// (`stop` is checked each time the alarm condition is woken)
    pub fn wait_raised(&self, stop: impl Fn() -> bool) -> bool {
        self.raised
            .wait_for(None, |raised| match (*raised, stop()) {
                (true, _) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            })
            .unwrap_or(false)
    }

    fn wake(&self) {
        self.raised.wake();
    }
}

/// The whole hardware boundary
#[derive(Debug)]
pub struct ControlSurface {
    entrances: [Entrance; ENTRANCES],
    exits: [Exit; EXITS],
    levels: [Level; LEVELS],
    phase: Rendezvous<Phase>,
    shutdown: AtomicBool,
    alarm: AlarmState,
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSurface {
    pub fn new() -> Self {
        Self {
            entrances: std::array::from_fn(|_| Entrance::default()),
            exits: std::array::from_fn(|_| Exit::default()),
            levels: std::array::from_fn(|_| Level::default()),
            phase: Rendezvous::new(Phase::Starting),
            shutdown: AtomicBool::new(false),
            alarm: AlarmState::default(),
        }
    }

    pub fn entrance(&self, id: usize) -> &Entrance {
        &self.entrances[id]
    }

    pub fn exit(&self, id: usize) -> &Exit {
        &self.exits[id]
    }

    pub fn level(&self, id: LevelId) -> &Level {
        &self.levels[id.0]
    }

    pub fn gate(&self, id: GateId) -> &BoomGate {
        match id {
            GateId::Entrance(i) => &self.entrances[i].gate,
            GateId::Exit(i) => &self.exits[i].gate,
        }
    }

    /// Every gate id, entrances first
    pub fn gate_ids() -> impl Iterator<Item = GateId> {
        (0..ENTRANCES).map(GateId::Entrance).chain((0..EXITS).map(GateId::Exit))
    }

    pub fn entrances(&self) -> &[Entrance; ENTRANCES] {
        &self.entrances
    }

    pub fn exits(&self) -> &[Exit; EXITS] {
        &self.exits
    }

    pub fn levels(&self) -> &[Level; LEVELS] {
        &self.levels
    }

    pub fn alarm(&self) -> &AlarmState {
        &self.alarm
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn mark_ready(&self) {
        self.phase.publish(|phase| {
            if *phase == Phase::Starting {
                *phase = Phase::Ready;
            }
        });
    }

    /// Wait until the controller side is up; false on timeout or shutdown
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.phase.wait_for(Some(deadline), |phase| match phase {
            Phase::Starting => None,
            Phase::Ready => Some(true),
            Phase::ShuttingDown => Some(false),
        }) == Some(true)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Raise the process-wide alarm; returns true if this call raised it
    ///
    /// Every blocked actor is woken so it can observe the alarm.
    pub fn raise_alarm(&self) -> bool {
        let first = self.alarm.raise();
        if first {
            self.wake_all();
        }
        first
    }

    /// Block for the next plate on `lpr`
    ///
    /// Returns None on shutdown, or once the alarm is up when `stop_on_alarm` is set.
    pub fn next_plate(&self, lpr: &Lpr, stop_on_alarm: bool) -> Option<Plate> {
        lpr.wait_for(None, |slot| {
            if self.is_shutdown() || (stop_on_alarm && self.alarm.is_raised()) {
                return Some(None);
            }
            slot.take().map(Some)
        })
        .flatten()
    }

    /// Flag shutdown and wake every blocked actor
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.phase.publish(|phase| *phase = Phase::ShuttingDown);
        self.wake_all();
    }

    fn wake_all(&self) {
        for entrance in &self.entrances {
            entrance.lpr.wake();
            entrance.gate.wake();
            entrance.sign.wake();
        }
        for exit in &self.exits {
            exit.lpr.wake();
            exit.gate.wake();
        }
        for level in &self.levels {
            level.lpr.wake();
        }
        self.alarm.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rendezvous_consumes_published_value() {
        let lpr: Arc<Lpr> = Arc::new(Rendezvous::new(None));
        let reader = {
            let lpr = lpr.clone();
            thread::spawn(move || lpr.wait_for(None, |slot| slot.take()))
        };
        lpr.publish(|slot| *slot = Some(Plate::new("029MZH")));
        assert_eq!(reader.join().unwrap(), Some(Plate::new("029MZH")));
        assert_eq!(lpr.get(), None);
    }

    #[test]
    fn test_rendezvous_times_out() {
        let lpr: Lpr = Rendezvous::new(None);
        let deadline = Instant::now() + Duration::from_millis(5);
        assert_eq!(lpr.wait_for(Some(deadline), |slot| slot.take()), None);
    }

    #[test]
    fn test_alarm_is_monotonic() {
        let surface = ControlSurface::new();
        assert!(!surface.alarm().is_raised());
        assert!(surface.alarm().raise());
        assert!(!surface.alarm().raise());
        assert!(surface.alarm().is_raised());
    }

    #[test]
    fn test_shutdown_wakes_alarm_waiter() {
        let surface = Arc::new(ControlSurface::new());
        let waiter = {
            let surface = surface.clone();
            thread::spawn(move || surface.alarm().wait_raised(|| surface.is_shutdown()))
        };
        thread::sleep(Duration::from_millis(5));
        surface.begin_shutdown();
        assert!(!waiter.join().unwrap());
        assert_eq!(surface.phase(), Phase::ShuttingDown);
    }

    #[test]
    fn test_alarm_wakes_plate_reader() {
        let surface = Arc::new(ControlSurface::new());
        let reader = {
            let surface = surface.clone();
            thread::spawn(move || surface.next_plate(&surface.entrance(0).lpr, true))
        };
        thread::sleep(Duration::from_millis(5));
        assert!(surface.raise_alarm());
        assert_eq!(reader.join().unwrap(), None);
    }

    #[test]
    fn test_next_plate_ignores_alarm_when_asked() {
        let surface = ControlSurface::new();
        surface.raise_alarm();
        let lpr = &surface.level(LevelId(0)).lpr;
        lpr.publish(|slot| *slot = Some(Plate::new("029MZH")));
        assert_eq!(surface.next_plate(lpr, false), Some(Plate::new("029MZH")));
    }

    #[test]
    fn test_wait_ready() {
        let surface = Arc::new(ControlSurface::new());
        assert!(!surface.wait_ready(Duration::from_millis(1)));
        let waiter = {
            let surface = surface.clone();
            thread::spawn(move || surface.wait_ready(Duration::from_secs(5)))
        };
        surface.mark_ready();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_initial_state() {
        let surface = ControlSurface::new();
        assert_eq!(surface.entrance(0).gate.lock().state, GateState::Closed);
        assert_eq!(surface.exit(4).gate.lock().state, GateState::Closed);
        assert_eq!(surface.entrance(2).sign.get().display, sign::BLANK);
        assert_eq!(surface.level(LevelId(3)).readout().smoothed, None);
        assert_eq!(surface.phase(), Phase::Starting);
    }
}
