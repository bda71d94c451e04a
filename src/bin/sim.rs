//! Parking Simulation - scripted traffic against an in-process facility
//!
//! Starts the control engine and plays the hardware side: drivers present
//! plates at entrances, follow the sign to their level, stay a while, then
//! leave through an exit. Optionally heats one level until the fire alarm
//! trips and the facility evacuates.
//!
//! Scenarios:
//! - happy: every whitelisted car enters, parks and leaves
//! - full: more cars than bays; the overflow is turned away with `F`
//! - fire: cars park, then level 0 heats up and the facility evacuates
//!
//! Usage:
//!   cargo run --bin parking-sim -- --config config/parking.toml --scenario happy

use clap::Parser;
use parking_control::domain::types::{Plate, ENTRANCES, EXITS, LEVELS};
use parking_control::domain::{LevelId, ParkingError};
use parking_control::infra::{Config, Metrics};
use parking_control::io::load_whitelist;
use parking_control::io::vehicle::{self, SignReading};
use parking_control::services::Facility;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Args
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "parking-sim")]
#[command(about = "Scripted traffic driver for the parking facility")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/parking.toml")]
    config: String,

    /// Scenario to run (happy, full, fire)
    #[arg(long, default_value = "happy")]
    scenario: String,

    /// Number of cars (defaults to the whitelist size)
    #[arg(long)]
    cars: Option<usize>,

    /// How long each car stays parked
    #[arg(long, default_value = "50")]
    stay_ms: u64,

    /// Unlisted plates mixed into the traffic
    #[arg(long, default_value = "2")]
    strangers: usize,
}

// ============================================================================
// Driver
// ============================================================================

/// What happened to one car
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    parked: usize,
    rejected: usize,
    full: usize,
    evacuated: usize,
    failed: usize,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.parked += other.parked;
        self.rejected += other.rejected;
        self.full += other.full;
        self.evacuated += other.evacuated;
        self.failed += other.failed;
    }
}

/// Rest of an admitted car's trip: level, stay, level again, exit
fn park_and_leave(facility: &Facility, level: LevelId, exit: usize, plate: Plate, stay: Duration, timeout: Duration) -> Tally {
    let surface = facility.surface();
    let trip = || -> Result<(), ParkingError> {
        vehicle::pass_level(surface, level, plate, timeout)?;
        thread::sleep(stay);
        vehicle::pass_level(surface, level, plate, timeout)?;
        vehicle::leave(surface, exit, plate, timeout)
    };
    match trip() {
        Ok(()) => Tally { parked: 1, ..Tally::default() },
        Err(e) => outcome_of(plate, e),
    }
}

fn outcome_of(plate: Plate, e: ParkingError) -> Tally {
    let mut tally = Tally::default();
    match e {
        ParkingError::Evacuating => tally.evacuated = 1,
        e => {
            warn!(plate = %plate, error = %e, "trip_failed");
            tally.failed = 1;
        }
    }
    tally
}

fn stranger(i: usize) -> Plate {
    Plate::new(&format!("ZZ{:04}", i))
}

/// One entrance lane: cars queue at the entrance one at a time, and each
/// admitted car carries on to its level on its own thread
fn run_lane(facility: Arc<Facility>, lane: usize, plates: Vec<Plate>, stay: Duration, timeout: Duration) -> Tally {
    let mut tally = Tally::default();
    let mut cars = Vec::new();

    for plate in plates {
        match vehicle::enter(facility.surface(), lane, plate, timeout) {
            Ok(SignReading::Level(level)) => {
                let facility = facility.clone();
                let exit = lane % EXITS;
                cars.push(thread::spawn(move || park_and_leave(&facility, level, exit, plate, stay, timeout)));
            }
            Ok(SignReading::Rejected) => tally.rejected += 1,
            Ok(SignReading::Full) => tally.full += 1,
            Ok(SignReading::Other(c)) => {
                // Evacuation message on the sign
                info!(plate = %plate, sign = %(c as char), "entrance_evacuating");
                tally.evacuated += 1;
            }
            Err(e) => tally.add(outcome_of(plate, e)),
        }
    }

    for car in cars {
        match car.join() {
            Ok(car_tally) => tally.add(car_tally),
            Err(_) => warn!("car_panicked"),
        }
    }
    tally
}

/// Split the traffic over the entrances, one driver thread per lane
fn run_traffic(facility: &Arc<Facility>, plates: Vec<Plate>, stay: Duration, timeout: Duration) -> Tally {
    let handles: Vec<_> = (0..ENTRANCES)
        .map(|lane| {
            let lane_plates: Vec<Plate> = plates.iter().skip(lane).step_by(ENTRANCES).copied().collect();
            let facility = facility.clone();
            thread::spawn(move || run_lane(facility, lane, lane_plates, stay, timeout))
        })
        .collect();

    let mut total = Tally::default();
    for handle in handles {
        match handle.join() {
            Ok(tally) => total.add(tally),
            Err(_) => warn!("driver_panicked"),
        }
    }
    total
}

/// Heat level 0 in steps until the alarm trips
fn start_fire(facility: &Arc<Facility>, timeout: Duration) -> bool {
    let surface = facility.surface();
    for l in 0..LEVELS {
        surface.level(LevelId(l)).set_temperature(24);
    }
    let level = surface.level(LevelId(0));
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    let mut temperature = 24;
    while !surface.alarm().is_raised() && waited < timeout {
        temperature += 1;
        level.set_temperature(temperature);
        thread::sleep(step);
        waited += step;
    }
    surface.alarm().is_raised()
}

// ============================================================================
// Main
// ============================================================================

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let whitelist = load_whitelist(config.whitelist_file())?;
    let timeout = config.rendezvous_timeout();
    let stay = Duration::from_millis(args.stay_ms);

    let facility = Arc::new(Facility::start(&config, &whitelist, Arc::new(Metrics::new()))?);
    if !facility.surface().wait_ready(timeout) {
        anyhow::bail!("facility did not become ready");
    }

    let capacity = facility.index().capacity();
    let cars = match args.scenario.as_str() {
        "full" => args.cars.unwrap_or(capacity + 10),
        _ => args.cars.unwrap_or(whitelist.len()),
    };
    // The full scenario needs a whitelist larger than the facility
    let mut plates: Vec<Plate> = whitelist.iter().copied().take(cars).collect();
    plates.extend((0..args.strangers).map(stranger));
    info!(scenario = %args.scenario, cars = plates.len(), "simulation_starting");

    let tally = match args.scenario.as_str() {
        "happy" => run_traffic(&facility, plates, stay, timeout),
        // Stay long enough that nobody leaves before everyone has tried to enter
        "full" => run_traffic(&facility, plates, timeout / 2, timeout),
        "fire" => {
            let traffic = {
                let facility = facility.clone();
                thread::spawn(move || run_traffic(&facility, plates, stay * 20, timeout))
            };
            let alarm = start_fire(&facility, timeout);
            info!(alarm = alarm, "fire_started");
            traffic.join().unwrap_or_default()
        }
        other => anyhow::bail!("unknown scenario {}", other),
    };

    let snapshot = facility.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    info!(
        parked = tally.parked,
        rejected = tally.rejected,
        full = tally.full,
        evacuated = tally.evacuated,
        failed = tally.failed,
        occupancy = snapshot.total_occupancy(),
        "simulation_finished"
    );

    match Arc::try_unwrap(facility) {
        Ok(facility) => {
            let revenue = facility.shutdown();
            info!(revenue = %revenue, "simulation_revenue");
        }
        Err(_) => warn!("facility_still_shared"),
    }
    Ok(())
}
