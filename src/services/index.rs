//! Whitelist and occupancy index
//!
//! Plates are stored in chained hash tables keyed by the Bernstein (DJB) hash.
//! The whitelist is loaded once and read without locking. Parked cars and
//! admitted-but-not-yet-parked reservations sit behind one index lock, so every
//! admit/park/exit is atomic with respect to the occupancy invariant:
//! a level's occupancy is the number of entries in that level's table, never a
//! separately maintained counter.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{LevelId, ParkedCar, Plate, LEVELS};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

/// Default bucket count for per-level and in-transit tables
const SMALL_TABLE_BUCKETS: usize = 31;

/// Bernstein hash: `hash * 33 + byte`, seeded with 5381
#[inline]
pub fn djb_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(5381u64, |hash, &b| (hash << 5).wrapping_add(hash).wrapping_add(b as u64))
}

/// Hash table keyed on plates with chained buckets
#[derive(Debug, Clone)]
pub struct PlateTable<V> {
    buckets: Vec<Vec<(Plate, V)>>,
    len: usize,
}

impl<V> PlateTable<V> {
    pub fn with_buckets(n: usize) -> Self {
        let n = n.max(1);
        Self { buckets: (0..n).map(|_| Vec::new()).collect(), len: 0 }
    }

    #[inline]
    fn bucket_index(&self, plate: &Plate) -> usize {
        (djb_hash(plate.as_bytes()) % self.buckets.len() as u64) as usize
    }

    pub fn get(&self, plate: &Plate) -> Option<&V> {
        self.buckets[self.bucket_index(plate)].iter().find(|(p, _)| p == plate).map(|(_, v)| v)
    }

    pub fn contains(&self, plate: &Plate) -> bool {
        self.get(plate).is_some()
    }

    /// Insert a plate that is not already present
    ///
    /// Callers check for duplicates first; a present plate is left untouched and
    /// reported as `DuplicateEntry` by the index.
    pub fn insert(&mut self, plate: Plate, value: V) -> Result<()> {
        let idx = self.bucket_index(&plate);
        let bucket = &mut self.buckets[idx];
        bucket
            .try_reserve(1)
            .map_err(|_| ParkingError::AllocationFailure("plate table bucket"))?;
        bucket.push((plate, value));
        self.len += 1;
        Ok(())
    }

    pub fn remove(&mut self, plate: &Plate) -> Option<V> {
        let idx = self.bucket_index(plate);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(p, _)| p == plate)?;
        self.len -= 1;
        Some(bucket.swap_remove(pos).1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Plate, &V)> {
        self.buckets.iter().flatten().map(|(p, v)| (p, v))
    }

    /// Length of the longest chain (distribution diagnostics)
    pub fn max_chain(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Car admitted at an entrance but not yet seen at its level
#[derive(Debug, Clone, Copy)]
struct Reservation {
    level: LevelId,
    admitted_at: Instant,
}

struct IndexState {
    /// Cars on their way from an entrance to their assigned level
    in_transit: PlateTable<Reservation>,
    /// Parked cars per level, valued by billing start
    levels: [PlateTable<Instant>; LEVELS],
    total_admitted: u64,
}

impl IndexState {
    fn parked_level(&self, plate: &Plate) -> Option<LevelId> {
        self.levels.iter().position(|table| table.contains(plate)).map(LevelId)
    }

    /// Parked plus reserved, per level
    fn committed(&self) -> [usize; LEVELS] {
        let mut committed: [usize; LEVELS] = std::array::from_fn(|i| self.levels[i].len());
        for (_, reservation) in self.in_transit.iter() {
            committed[reservation.level.0] += 1;
        }
        committed
    }
}

/// Pick a level by round-robin from `start`, skipping full levels
pub fn select_level(start: usize, committed: &[usize; LEVELS], capacity: usize) -> Option<LevelId> {
    (0..LEVELS).map(|offset| (start + offset) % LEVELS).find(|&l| committed[l] < capacity).map(LevelId)
}

/// Shared whitelist/occupancy index
pub struct OccupancyIndex {
    whitelist: PlateTable<()>,
    level_capacity: usize,
    state: Mutex<IndexState>,
}

impl OccupancyIndex {
    pub fn new(whitelist: &[Plate], level_capacity: usize) -> Result<Self> {
        // Roughly two entries per bucket for the expected few hundred plates
        let mut table = PlateTable::with_buckets(whitelist.len() / 2 + 1);
        for &plate in whitelist {
            if !table.contains(&plate) {
                table.insert(plate, ())?;
            }
        }
        Ok(Self {
            whitelist: table,
            level_capacity,
            state: Mutex::new(IndexState {
                in_transit: PlateTable::with_buckets(SMALL_TABLE_BUCKETS),
                levels: std::array::from_fn(|_| PlateTable::with_buckets(SMALL_TABLE_BUCKETS)),
                total_admitted: 0,
            }),
        })
    }

    /// Whitelist membership (exact match)
    pub fn lookup(&self, plate: &Plate) -> bool {
        self.whitelist.contains(plate)
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn level_capacity(&self) -> usize {
        self.level_capacity
    }

    pub fn capacity(&self) -> usize {
        self.level_capacity * LEVELS
    }

    /// Admission decision for a whitelisted plate
    ///
    /// Checks global capacity, picks a level round-robin starting at
    /// `total_admitted mod LEVELS`, and records the billing start. The car
    /// holds a reservation on that level until it is seen there.
    pub fn admit(&self, plate: Plate, now: Instant) -> Result<LevelId> {
        let mut state = self.state.lock();

        if let Some(level) = state.parked_level(&plate) {
            return Err(ParkingError::DuplicateEntry { plate, level });
        }
        if let Some(reservation) = state.in_transit.get(&plate) {
            return Err(ParkingError::DuplicateEntry { plate, level: reservation.level });
        }

        let committed = state.committed();
        if committed.iter().sum::<usize>() >= self.capacity() {
            return Err(ParkingError::CapacityExceeded);
        }

        let start = (state.total_admitted % LEVELS as u64) as usize;
        let level = select_level(start, &committed, self.level_capacity)
            .ok_or(ParkingError::CapacityExceeded)?;

        state.in_transit.insert(plate, Reservation { level, admitted_at: now })?;
        state.total_admitted += 1;
        debug!(plate = %plate, level = %level, "reservation_recorded");
        Ok(level)
    }

    /// Drop a reservation for a car that never passed the gate
    pub fn cancel_admission(&self, plate: &Plate) -> bool {
        self.state.lock().in_transit.remove(plate).is_some()
    }

    /// Record an admitted car as physically parked on `level`
    ///
    /// Billing start is the admission time. A plate with no reservation was
    /// never admitted and is refused with `NotFound`. A car that turns up on a
    /// level other than its assigned one is accepted only if that level still
    /// has an uncommitted bay; otherwise its reservation stays in place.
    pub fn mark_parked(&self, level: LevelId, plate: Plate) -> Result<ParkedCar> {
        let mut state = self.state.lock();

        if let Some(existing) = state.parked_level(&plate) {
            return Err(ParkingError::DuplicateEntry { plate, level: existing });
        }
        let Some(reservation) = state.in_transit.get(&plate).copied() else {
            return Err(ParkingError::NotFound(plate));
        };

        if reservation.level == level {
            if state.levels[level.0].len() >= self.level_capacity {
                return Err(ParkingError::CapacityExceeded);
            }
        } else {
            // Other cars' reservations on this level keep their bays
            if state.committed()[level.0] >= self.level_capacity {
                return Err(ParkingError::CapacityExceeded);
            }
            warn!(
                plate = %plate,
                assigned = %reservation.level,
                actual = %level,
                "car_parked_on_unassigned_level"
            );
        }

        state.levels[level.0].insert(plate, reservation.admitted_at)?;
        state.in_transit.remove(&plate);
        Ok(ParkedCar { plate, level, entered_at: reservation.admitted_at })
    }

    pub fn is_parked_at(&self, level: LevelId, plate: &Plate) -> bool {
        self.state.lock().levels[level.0].contains(plate)
    }

    /// Parked record for a plate, if any
    pub fn parked(&self, plate: &Plate) -> Option<ParkedCar> {
        let state = self.state.lock();
        state.levels.iter().enumerate().find_map(|(l, table)| {
            table.get(plate).map(|&entered_at| ParkedCar { plate: *plate, level: LevelId(l), entered_at })
        })
    }

    /// Remove a parked car, returning its record (with the billing start)
    pub fn mark_exited(&self, plate: &Plate) -> Result<ParkedCar> {
        let mut state = self.state.lock();
        for (l, table) in state.levels.iter_mut().enumerate() {
            if let Some(entered_at) = table.remove(plate) {
                return Ok(ParkedCar { plate: *plate, level: LevelId(l), entered_at });
            }
        }
        Err(ParkingError::NotFound(*plate))
    }

    pub fn occupancy(&self, level: LevelId) -> usize {
        self.state.lock().levels[level.0].len()
    }

    /// Occupancy of every level, read under one lock
    pub fn occupancy_all(&self) -> [usize; LEVELS] {
        let state = self.state.lock();
        std::array::from_fn(|l| state.levels[l].len())
    }

    pub fn total_occupancy(&self) -> usize {
        self.occupancy_all().iter().sum()
    }

    pub fn in_transit(&self) -> usize {
        self.state.lock().in_transit.len()
    }

    pub fn total_admitted(&self) -> u64 {
        self.state.lock().total_admitted
    }

    /// Plates parked on a level (diagnostics and tests)
    pub fn parked_plates(&self, level: LevelId) -> Vec<Plate> {
        self.state.lock().levels[level.0].iter().map(|(p, _)| *p).collect()
    }
}
