//! Facility bootstrap - builds the shared state and spawns every actor
//!
//! One named thread per gate, entrance, exit, level LPR and level fire
//! monitor, one evacuation coordinator, and the billing workers. The
//! boundary is marked ready once everything is spawned. Shutdown wakes every
//! actor, joins them, then drains the billing queue.

use crate::domain::types::{Cents, LevelId, Plate, ENTRANCES, EXITS, LEVELS};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::ledger::RevenueLedger;
use crate::io::status::FacilitySnapshot;
use crate::io::surface::ControlSurface;
use crate::services::billing::{create_billing_pipeline, BillingQueue, BillingWorker};
use crate::services::entrance::EntranceController;
use crate::services::evacuation::EvacuationCoordinator;
use crate::services::exit::ExitController;
use crate::services::fire::{FireMonitor, FireThresholds};
use crate::services::gate::{GateController, GateTimings};
use crate::services::index::OccupancyIndex;
use crate::services::level::LevelController;
use anyhow::Context;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

pub struct Facility {
    surface: Arc<ControlSurface>,
    index: Arc<OccupancyIndex>,
    ledger: Arc<RevenueLedger>,
    billing: Arc<BillingQueue>,
    metrics: Arc<Metrics>,
    actors: Vec<(String, JoinHandle<()>)>,
    workers: Vec<(String, JoinHandle<()>)>,
}

fn spawn_named<F>(name: String, f: F) -> anyhow::Result<(String, JoinHandle<()>)>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .with_context(|| format!("Failed to spawn {}", name))?;
    Ok((name, handle))
}

impl Facility {
    /// Build the index and ledger and start every actor
    pub fn start(config: &Config, whitelist: &[Plate], metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let surface = Arc::new(ControlSurface::new());
        let index = Arc::new(
            OccupancyIndex::new(whitelist, config.level_capacity()).context("Failed to build plate index")?,
        );
        let ledger = Arc::new(RevenueLedger::new(config.ledger_file()));
        let (billing, billing_workers) = create_billing_pipeline(
            ledger.clone(),
            metrics.clone(),
            config.rate_per_ms(),
            config.billing_workers(),
        );

        let mut facility = Self {
            surface: surface.clone(),
            index: index.clone(),
            ledger,
            billing: billing.clone(),
            metrics: metrics.clone(),
            actors: Vec::new(),
            workers: Vec::new(),
        };

        if let Err(e) = facility.spawn_all(config, billing_workers) {
            // Don't leave half a facility running
            facility.stop();
            return Err(e);
        }

        surface.mark_ready();
        info!(
            whitelist = index.whitelist_len(),
            capacity = index.capacity(),
            threads = facility.actors.len() + facility.workers.len(),
            "facility_ready"
        );
        Ok(facility)
    }

    fn spawn_all(
        &mut self,
        config: &Config,
        billing_workers: Vec<BillingWorker>,
    ) -> anyhow::Result<()> {
        let timeout = config.rendezvous_timeout();
        let timings = GateTimings::from_config(config);

        for worker in billing_workers {
            let name = format!("billing-{}", self.workers.len());
            self.workers.push(spawn_named(name, move || worker.run())?);
        }

        for id in ControlSurface::gate_ids() {
            let gate = GateController::new(id, self.surface.clone(), timings, self.metrics.clone());
            self.actors.push(spawn_named(format!("gate-{}", id), move || gate.run())?);
        }

        for i in 0..ENTRANCES {
            let entrance = EntranceController::new(
                i,
                self.surface.clone(),
                self.index.clone(),
                self.metrics.clone(),
                timeout,
            );
            self.actors.push(spawn_named(format!("entrance-{}", i), move || entrance.run())?);
        }

        for i in 0..EXITS {
            let exit = ExitController::new(
                i,
                self.surface.clone(),
                self.index.clone(),
                self.billing.clone(),
                self.metrics.clone(),
                timeout,
            );
            self.actors.push(spawn_named(format!("exit-{}", i), move || exit.run())?);
        }

        let thresholds = FireThresholds::from_config(config);
        for l in 0..LEVELS {
            let level = LevelController::new(
                LevelId(l),
                self.surface.clone(),
                self.index.clone(),
                self.metrics.clone(),
            );
            self.actors.push(spawn_named(format!("level-{}", l), move || level.run())?);

            let monitor = FireMonitor::new(
                LevelId(l),
                self.surface.clone(),
                thresholds,
                config.fire_sample_period(),
                self.metrics.clone(),
            );
            self.actors.push(spawn_named(format!("fire-{}", l), move || monitor.run())?);
        }

        let coordinator = EvacuationCoordinator::new(
            self.surface.clone(),
            config.evacuation_message(),
            config.evacuation_interval(),
        );
        self.actors.push(spawn_named("evacuation".to_string(), move || coordinator.run())?);
        Ok(())
    }

    pub fn surface(&self) -> &Arc<ControlSurface> {
        &self.surface
    }

    pub fn index(&self) -> &Arc<OccupancyIndex> {
        &self.index
    }

    pub fn ledger(&self) -> &Arc<RevenueLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Current state for the status feed
    pub fn snapshot(&self) -> FacilitySnapshot {
        FacilitySnapshot::capture(
            &self.surface,
            self.index.occupancy_all(),
            self.index.level_capacity(),
            self.index.in_transit(),
            self.index.total_admitted(),
            self.ledger.total(),
        )
    }

    /// Stop every actor and flush pending bills; returns total revenue
    pub fn shutdown(mut self) -> Cents {
        self.stop();
        let total = self.ledger.total();
        info!(revenue = %total, occupancy = self.index.total_occupancy(), "facility_stopped");
        total
    }

    fn stop(&mut self) {
        self.surface.begin_shutdown();
        join_all(std::mem::take(&mut self.actors));

        // Exits are stopped, so the queue only drains from here
        self.billing.close();
        join_all(std::mem::take(&mut self.workers));
    }
}

impl Drop for Facility {
    fn drop(&mut self) {
        if !self.actors.is_empty() || !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn join_all(handles: Vec<(String, JoinHandle<()>)>) {
    for (name, handle) in handles {
        if handle.join().is_err() {
            error!(thread = %name, "actor_panicked");
        }
    }
}
