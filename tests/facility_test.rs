//! End-to-end tests: a running facility driven from the vehicle side

use parking_control::domain::types::{GateState, Plate, ENTRANCES, LEVELS};
use parking_control::domain::{LevelId, ParkingError};
use parking_control::infra::{Config, Metrics};
use parking_control::io::vehicle::{self, SignReading};
use parking_control::io::ControlSurface;
use parking_control::services::Facility;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

const TIMEOUT: Duration = Duration::from_secs(2);

fn test_config(dir: &TempDir, level_capacity: usize) -> Config {
    Config::default()
        .with_gate_timings(1, 2, 1)
        .with_ledger_file(dir.path().join("billing.txt").display().to_string())
        .with_level_capacity(level_capacity)
        .with_rendezvous_timeout_ms(TIMEOUT.as_millis() as u64)
        .with_evacuation_interval_ms(5)
}

fn plates(raw: &[&str]) -> Vec<Plate> {
    raw.iter().map(|p| Plate::new(p)).collect()
}

fn start(config: &Config, whitelist: &[Plate]) -> Facility {
    let facility = Facility::start(config, whitelist, Arc::new(Metrics::new())).unwrap();
    assert!(facility.surface().wait_ready(TIMEOUT));
    facility
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_whitelisted_car_is_admitted_and_parks() {
    let dir = tempdir().unwrap();
    let facility = start(&test_config(&dir, 20), &plates(&["029MZH", "111AAA"]));
    let surface = facility.surface();
    let plate = Plate::new("029MZH");

    let reading = vehicle::enter(surface, 0, plate, TIMEOUT).unwrap();
    let level = match reading {
        SignReading::Level(level) => level,
        other => panic!("expected a level, got {:?}", other),
    };
    // First admission goes to the first level
    assert_eq!(level, LevelId(0));
    assert_eq!(surface.entrance(0).sign.get().display, b'1');
    assert_eq!(surface.entrance(0).gate.get().cycles_completed, 1);

    vehicle::pass_level(surface, level, plate, TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || facility.index().is_parked_at(level, &plate)));
    assert_eq!(facility.index().total_occupancy(), 1);
    assert_eq!(facility.index().in_transit(), 0);

    facility.shutdown();
}

#[test]
fn test_unlisted_plate_is_rejected_without_gate_cycle() {
    let dir = tempdir().unwrap();
    let facility = start(&test_config(&dir, 20), &plates(&["029MZH"]));
    let surface = facility.surface();

    let reading = vehicle::enter(surface, 2, Plate::new("999999"), TIMEOUT).unwrap();
    assert_eq!(reading, SignReading::Rejected);
    assert_eq!(surface.entrance(2).sign.get().display, b'X');

    // Give a misbehaving controller time to cycle the gate anyway
    thread::sleep(Duration::from_millis(20));
    let gate = surface.entrance(2).gate.get();
    assert_eq!(gate.cycles_completed, 0);
    assert_eq!(gate.state, GateState::Closed);
    assert_eq!(facility.index().total_admitted(), 0);
    assert_eq!(facility.metrics().plates_rejected(), 1);

    facility.shutdown();
}

#[test]
fn test_second_entry_of_same_plate_is_rejected() {
    let dir = tempdir().unwrap();
    let facility = start(&test_config(&dir, 20), &plates(&["029MZH"]));
    let surface = facility.surface();
    let plate = Plate::new("029MZH");

    assert!(matches!(vehicle::enter(surface, 0, plate, TIMEOUT).unwrap(), SignReading::Level(_)));
    assert_eq!(vehicle::enter(surface, 1, plate, TIMEOUT).unwrap(), SignReading::Rejected);
    assert_eq!(facility.index().total_admitted(), 1);

    facility.shutdown();
}

#[test]
fn test_full_facility_turns_cars_away() {
    let dir = tempdir().unwrap();
    // One bay per level
    let facility = start(&test_config(&dir, 1), &plates(&["AAA001", "AAA002", "AAA003", "AAA004", "AAA005", "AAA006"]));
    let surface = facility.surface();
    let capacity = facility.index().capacity();
    assert_eq!(capacity, LEVELS);

    let mut levels = Vec::new();
    for i in 0..capacity {
        let plate = Plate::new(&format!("AAA{:03}", i + 1));
        match vehicle::enter(surface, i % ENTRANCES, plate, TIMEOUT).unwrap() {
            SignReading::Level(level) => levels.push(level),
            other => panic!("car {} got {:?}", i, other),
        }
    }
    // Round-robin hands out every level once
    levels.sort();
    assert_eq!(levels, (0..LEVELS).map(LevelId).collect::<Vec<_>>());

    let reading = vehicle::enter(surface, 0, Plate::new("AAA006"), TIMEOUT).unwrap();
    assert_eq!(reading, SignReading::Full);
    assert_eq!(facility.metrics().turned_away_full(), 1);
    assert!(facility.index().total_occupancy() + facility.index().in_transit() <= capacity);

    facility.shutdown();
}

#[test]
fn test_full_trip_writes_ledger_line() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 20);
    let facility = start(&config, &plates(&["029MZH"]));
    let surface = facility.surface().clone();
    let plate = Plate::new("029MZH");
    let stay = Duration::from_millis(100);

    let started = Instant::now();
    let level = match vehicle::enter(&surface, 0, plate, TIMEOUT).unwrap() {
        SignReading::Level(level) => level,
        other => panic!("expected a level, got {:?}", other),
    };
    vehicle::pass_level(&surface, level, plate, TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || facility.index().is_parked_at(level, &plate)));
    thread::sleep(stay);
    vehicle::pass_level(&surface, level, plate, TIMEOUT).unwrap();
    vehicle::leave(&surface, 1, plate, TIMEOUT).unwrap();
    let upper = started.elapsed();

    assert!(wait_until(TIMEOUT, || facility.index().parked(&plate).is_none()));
    assert_eq!(surface.exit(1).gate.get().cycles_completed, 1);

    let revenue = facility.shutdown();
    let contents = std::fs::read_to_string(config.ledger_file()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);

    let amount = lines[0].strip_prefix("029MZH $").unwrap();
    let (dollars, cents) = amount.split_once('.').unwrap();
    assert_eq!(cents.len(), 2);
    let fare = dollars.parse::<u64>().unwrap() * 100 + cents.parse::<u64>().unwrap();
    assert_eq!(revenue.0, fare);

    // 0.05 dollars per millisecond is 5 cents per millisecond
    assert!(fare >= stay.as_millis() as u64 * 5, "fare {} too low", fare);
    assert!(fare <= upper.as_millis() as u64 * 5 + 5, "fare {} too high", fare);
}

#[test]
fn test_exit_ignores_car_that_never_parked() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 20);
    let facility = start(&config, &plates(&["029MZH"]));
    let surface = facility.surface();

    let err = vehicle::leave(surface, 0, Plate::new("029MZH"), Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, ParkingError::RendezvousTimeout { .. }));
    assert_eq!(surface.exit(0).gate.get().cycles_completed, 0);

    facility.shutdown();
    assert!(!std::path::Path::new(config.ledger_file()).exists());
}

#[test]
fn test_fire_forces_gates_open_and_shows_evacuate() {
    let dir = tempdir().unwrap();
    let facility = start(&test_config(&dir, 20), &plates(&["029MZH"]));
    let surface = facility.surface();

    surface.level(LevelId(3)).set_temperature(70);
    assert!(wait_until(TIMEOUT, || surface.alarm().is_raised()));
    assert!(surface.level(LevelId(3)).readout().alarm);

    for id in ControlSurface::gate_ids() {
        assert!(
            wait_until(TIMEOUT, || surface.gate(id).get().state == GateState::Open),
            "gate {} never opened",
            id
        );
    }

    let message = b"EVACUATE ";
    for i in 0..ENTRANCES {
        let sign = &surface.entrance(i).sign;
        assert!(wait_until(TIMEOUT, || sign.get().updates >= 3));
        assert!(message.contains(&sign.get().display));
    }

    // Gates stay open and new arrivals are not processed
    thread::sleep(Duration::from_millis(30));
    assert!(ControlSurface::gate_ids().all(|id| surface.gate(id).get().state == GateState::Open));
    let err = vehicle::enter(surface, 0, Plate::new("029MZH"), TIMEOUT).unwrap_err();
    assert!(matches!(err, ParkingError::Evacuating));
    assert_eq!(facility.index().total_admitted(), 0);
    assert_eq!(facility.metrics().fire_triggers(), 1);

    facility.shutdown();
}

#[test]
fn test_concurrent_lanes_never_overbook() {
    let dir = tempdir().unwrap();
    let whitelist: Vec<Plate> = (0..40).map(|i| Plate::new(&format!("CAR{:03}", i))).collect();
    let facility = Arc::new(start(&test_config(&dir, 2), &whitelist));
    let capacity = facility.index().capacity();

    let lanes: Vec<_> = (0..ENTRANCES)
        .map(|lane| {
            let facility = facility.clone();
            let mine: Vec<Plate> = whitelist.iter().skip(lane).step_by(ENTRANCES).copied().collect();
            thread::spawn(move || {
                let surface = facility.surface();
                let mut admitted = 0;
                for plate in mine {
                    if let SignReading::Level(level) = vehicle::enter(surface, lane, plate, TIMEOUT).unwrap() {
                        vehicle::pass_level(surface, level, plate, TIMEOUT).unwrap();
                        admitted += 1;
                    }
                    let index = facility.index();
                    assert!(index.total_occupancy() + index.in_transit() <= capacity);
                    for l in 0..LEVELS {
                        assert!(index.occupancy(LevelId(l)) <= index.level_capacity());
                    }
                }
                admitted
            })
        })
        .collect();

    let admitted: usize = lanes.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, capacity);
    assert!(wait_until(TIMEOUT, || facility.index().total_occupancy() == capacity));
    assert_eq!(facility.metrics().turned_away_full(), (whitelist.len() - capacity) as u64);

    let facility = Arc::try_unwrap(facility).ok().unwrap();
    facility.shutdown();
}

#[test]
fn test_shutdown_releases_idle_facility() {
    let dir = tempdir().unwrap();
    let facility = start(&test_config(&dir, 20), &plates(&["029MZH"]));
    let surface = facility.surface().clone();

    let started = Instant::now();
    let revenue = facility.shutdown();
    assert_eq!(revenue.0, 0);
    assert!(surface.is_shutdown());
    assert!(started.elapsed() < TIMEOUT);
}

#[test]
fn test_car_that_was_never_admitted_is_not_counted() {
    let dir = tempdir().unwrap();
    let facility = start(&test_config(&dir, 1), &plates(&["AAA001"]));
    let surface = facility.surface();

    let level = match vehicle::enter(surface, 0, Plate::new("AAA001"), TIMEOUT).unwrap() {
        SignReading::Level(level) => level,
        other => panic!("expected a level, got {:?}", other),
    };

    // Slipped in behind the admitted car
    vehicle::pass_level(surface, level, Plate::new("ZZZ999"), TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || facility.metrics().ordering_defects() == 1));
    assert_eq!(facility.index().occupancy(level), 0);

    vehicle::pass_level(surface, level, Plate::new("AAA001"), TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || facility.index().is_parked_at(level, &Plate::new("AAA001"))));
    assert_eq!(facility.index().in_transit(), 0);

    facility.shutdown();
}
