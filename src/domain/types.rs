//! Shared types for the parking controller

use serde::Serialize;
use std::time::Instant;

/// Number of entrances (fixed by the hardware layout)
pub const ENTRANCES: usize = 5;
/// Number of exits (fixed by the hardware layout)
pub const EXITS: usize = 5;
/// Number of parking levels (fixed by the hardware layout)
pub const LEVELS: usize = 5;
/// Default number of bays per level
pub const MAX_CAPACITY: usize = 20;
/// Width of a license plate in bytes
pub const PLATE_LEN: usize = 6;

/// Fixed-width license plate
///
/// Shorter plates are NUL-padded, longer input is truncated to [`PLATE_LEN`] bytes.
/// Equality is exact byte equality: no case folding, no prefix matching.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Plate([u8; PLATE_LEN]);

impl Plate {
    pub fn new(raw: &str) -> Self {
        Self::from_bytes(raw.as_bytes())
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut bytes = [0u8; PLATE_LEN];
        let len = raw.len().min(PLATE_LEN);
        bytes[..len].copy_from_slice(&raw[..len]);
        Self(bytes)
    }

    /// Significant bytes (up to the first NUL)
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(PLATE_LEN);
        &self.0[..len]
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl std::fmt::Display for Plate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl std::fmt::Debug for Plate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Plate({})", self)
    }
}

impl Serialize for Plate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Newtype wrapper for level ids (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct LevelId(pub usize);

impl LevelId {
    /// Character shown on an entrance sign for this level ('1' for level 0)
    pub fn sign_char(self) -> u8 {
        b'1' + self.0 as u8
    }

    /// Inverse of [`LevelId::sign_char`]
    pub fn from_sign_char(c: u8) -> Option<Self> {
        let idx = c.checked_sub(b'1')? as usize;
        (idx < LEVELS).then_some(Self(idx))
    }
}

impl std::fmt::Display for LevelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one of the ten boom gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateId {
    Entrance(usize),
    Exit(usize),
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateId::Entrance(i) => write!(f, "entrance_{}", i),
            GateId::Exit(i) => write!(f, "exit_{}", i),
        }
    }
}

/// Boom gate position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Closed,
    Raising,
    Open,
    Lowering,
}

impl GateState {
    /// Single-byte code used on the hardware boundary
    pub fn as_char(self) -> char {
        match self {
            GateState::Closed => 'C',
            GateState::Raising => 'R',
            GateState::Open => 'O',
            GateState::Lowering => 'L',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Closed => "closed",
            GateState::Raising => "raising",
            GateState::Open => "open",
            GateState::Lowering => "lowering",
        }
    }

    /// Legal physical transitions. LOWERING may reverse to RAISING when an
    /// evacuation interrupts a cycle; CLOSED never jumps straight to OPEN.
    pub fn can_transition_to(self, next: GateState) -> bool {
        matches!(
            (self, next),
            (GateState::Closed, GateState::Raising)
                | (GateState::Raising, GateState::Open)
                | (GateState::Open, GateState::Lowering)
                | (GateState::Lowering, GateState::Closed)
                | (GateState::Lowering, GateState::Raising)
        )
    }
}

/// Entrance sign characters with special meaning
pub mod sign {
    /// Blank sign before the first car
    pub const BLANK: u8 = b' ';
    /// Plate not on the whitelist
    pub const REJECTED: u8 = b'X';
    /// Facility full
    pub const FULL: u8 = b'F';
}

/// A car that has physically arrived at its level
#[derive(Debug, Clone, Copy)]
pub struct ParkedCar {
    pub plate: Plate,
    pub level: LevelId,
    /// Billing start (recorded when the entrance admitted the car)
    pub entered_at: Instant,
}

/// Money in integer cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct Cents(pub u64);

impl std::ops::Add for Cents {
    type Output = Cents;
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Cents {
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}
