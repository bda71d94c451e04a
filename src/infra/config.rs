//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/parking.toml).
//! Every section is optional; missing keys take the reference timings.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct FacilityConfig {
    #[serde(default = "default_level_capacity")]
    pub level_capacity: usize,
}

impl Default for FacilityConfig {
    fn default() -> Self {
        Self { level_capacity: default_level_capacity() }
    }
}

fn default_level_capacity() -> usize {
    crate::domain::types::MAX_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_raise_ms")]
    pub raise_ms: u64,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_lower_ms")]
    pub lower_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { raise_ms: default_raise_ms(), hold_ms: default_hold_ms(), lower_ms: default_lower_ms() }
    }
}

fn default_raise_ms() -> u64 {
    10
}

fn default_hold_ms() -> u64 {
    20
}

fn default_lower_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Dollars charged per millisecond parked
    #[serde(default = "default_rate_per_ms")]
    pub rate_per_ms: f64,
    /// Append-only ledger file
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
    /// Number of billing worker threads
    #[serde(default = "default_billing_workers")]
    pub workers: usize,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            rate_per_ms: default_rate_per_ms(),
            ledger_file: default_ledger_file(),
            workers: default_billing_workers(),
        }
    }
}

fn default_rate_per_ms() -> f64 {
    0.05
}

fn default_ledger_file() -> String {
    "billing.txt".to_string()
}

fn default_billing_workers() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhitelistConfig {
    #[serde(default = "default_whitelist_file")]
    pub file: String,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self { file: default_whitelist_file() }
    }
}

fn default_whitelist_file() -> String {
    "plates.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FireConfig {
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,
    /// Smoothed temperature (degrees) that counts as "hot"
    #[serde(default = "default_fixed_threshold")]
    pub fixed_threshold: i16,
    /// Fraction of the history window that must be hot
    #[serde(default = "default_fixed_threshold_ratio")]
    pub fixed_threshold_ratio: f64,
    /// Degrees of rise across the history window that trigger the alarm
    #[serde(default = "default_rate_of_rise")]
    pub rate_of_rise: i16,
}

impl Default for FireConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: default_sample_period_ms(),
            fixed_threshold: default_fixed_threshold(),
            fixed_threshold_ratio: default_fixed_threshold_ratio(),
            rate_of_rise: default_rate_of_rise(),
        }
    }
}

fn default_sample_period_ms() -> u64 {
    2
}

fn default_fixed_threshold() -> i16 {
    58
}

fn default_fixed_threshold_ratio() -> f64 {
    0.9
}

fn default_rate_of_rise() -> i16 {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvacuationConfig {
    #[serde(default = "default_evacuation_message")]
    pub message: String,
    /// Time each character stays on the signs
    #[serde(default = "default_evacuation_interval_ms")]
    pub interval_ms: u64,
}

impl Default for EvacuationConfig {
    fn default() -> Self {
        Self { message: default_evacuation_message(), interval_ms: default_evacuation_interval_ms() }
    }
}

fn default_evacuation_message() -> String {
    "EVACUATE ".to_string()
}

fn default_evacuation_interval_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendezvousConfig {
    /// Upper bound on any wait for a rendezvous partner
    #[serde(default = "default_rendezvous_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self { timeout_ms: default_rendezvous_timeout_ms() }
    }
}

fn default_rendezvous_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// JSONL status feed for the display collaborator
    #[serde(default = "default_status_file")]
    pub file: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { file: default_status_file() }
    }
}

fn default_status_file() -> String {
    "status.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub facility: FacilityConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub whitelist: WhitelistConfig,
    #[serde(default)]
    pub fire: FireConfig,
    #[serde(default)]
    pub evacuation: EvacuationConfig,
    #[serde(default)]
    pub rendezvous: RendezvousConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

/// Replace values the actors cannot run with, logging each replacement
fn sanitize(toml_config: &mut TomlConfig) {
    let fire = &mut toml_config.fire;
    if fire.sample_period_ms == 0 {
        warn!(sample_period_ms = 0, "fire_sample_period_clamped_to_1ms");
        fire.sample_period_ms = 1;
    }
    if !(fire.fixed_threshold_ratio > 0.0 && fire.fixed_threshold_ratio <= 1.0) {
        warn!(
            fixed_threshold_ratio = %fire.fixed_threshold_ratio,
            default = %default_fixed_threshold_ratio(),
            "fire_threshold_ratio_out_of_range"
        );
        fire.fixed_threshold_ratio = default_fixed_threshold_ratio();
    }

    let evacuation = &mut toml_config.evacuation;
    if evacuation.interval_ms == 0 {
        warn!(interval_ms = 0, "evacuation_interval_clamped_to_1ms");
        evacuation.interval_ms = 1;
    }
    if evacuation.message.is_empty() {
        warn!("evacuation_message_empty_using_default");
        evacuation.message = default_evacuation_message();
    }
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    level_capacity: usize,
    gate_raise_ms: u64,
    gate_hold_ms: u64,
    gate_lower_ms: u64,
    rate_per_ms: f64,
    ledger_file: String,
    billing_workers: usize,
    whitelist_file: String,
    fire_sample_period_ms: u64,
    fire_fixed_threshold: i16,
    fire_fixed_threshold_ratio: f64,
    fire_rate_of_rise: i16,
    evacuation_message: String,
    evacuation_interval_ms: u64,
    rendezvous_timeout_ms: u64,
    metrics_interval_secs: u64,
    status_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(mut toml_config: TomlConfig, config_file: &str) -> Self {
        sanitize(&mut toml_config);
        Self {
            level_capacity: toml_config.facility.level_capacity,
            gate_raise_ms: toml_config.gate.raise_ms,
            gate_hold_ms: toml_config.gate.hold_ms,
            gate_lower_ms: toml_config.gate.lower_ms,
            rate_per_ms: toml_config.billing.rate_per_ms,
            ledger_file: toml_config.billing.ledger_file,
            billing_workers: toml_config.billing.workers.max(1),
            whitelist_file: toml_config.whitelist.file,
            fire_sample_period_ms: toml_config.fire.sample_period_ms,
            fire_fixed_threshold: toml_config.fire.fixed_threshold,
            fire_fixed_threshold_ratio: toml_config.fire.fixed_threshold_ratio,
            fire_rate_of_rise: toml_config.fire.rate_of_rise,
            evacuation_message: toml_config.evacuation.message,
            evacuation_interval_ms: toml_config.evacuation.interval_ms,
            rendezvous_timeout_ms: toml_config.rendezvous.timeout_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            status_file: toml_config.status.file,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn level_capacity(&self) -> usize {
        self.level_capacity
    }

    pub fn raise_duration(&self) -> Duration {
        Duration::from_millis(self.gate_raise_ms)
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_millis(self.gate_hold_ms)
    }

    pub fn lower_duration(&self) -> Duration {
        Duration::from_millis(self.gate_lower_ms)
    }

    pub fn rate_per_ms(&self) -> f64 {
        self.rate_per_ms
    }

    pub fn ledger_file(&self) -> &str {
        &self.ledger_file
    }

    pub fn billing_workers(&self) -> usize {
        self.billing_workers
    }

    pub fn whitelist_file(&self) -> &str {
        &self.whitelist_file
    }

    pub fn fire_sample_period(&self) -> Duration {
        Duration::from_millis(self.fire_sample_period_ms)
    }

    pub fn fire_fixed_threshold(&self) -> i16 {
        self.fire_fixed_threshold
    }

    pub fn fire_fixed_threshold_ratio(&self) -> f64 {
        self.fire_fixed_threshold_ratio
    }

    pub fn fire_rate_of_rise(&self) -> i16 {
        self.fire_rate_of_rise
    }

    pub fn evacuation_message(&self) -> &str {
        &self.evacuation_message
    }

    pub fn evacuation_interval(&self) -> Duration {
        Duration::from_millis(self.evacuation_interval_ms)
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn status_file(&self) -> &str {
        &self.status_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests and drivers to shorten gate timings
    pub fn with_gate_timings(mut self, raise_ms: u64, hold_ms: u64, lower_ms: u64) -> Self {
        self.gate_raise_ms = raise_ms;
        self.gate_hold_ms = hold_ms;
        self.gate_lower_ms = lower_ms;
        self
    }

    pub fn with_ledger_file(mut self, path: impl Into<String>) -> Self {
        self.ledger_file = path.into();
        self
    }

    pub fn with_level_capacity(mut self, capacity: usize) -> Self {
        self.level_capacity = capacity;
        self
    }

    pub fn with_rendezvous_timeout_ms(mut self, ms: u64) -> Self {
        self.rendezvous_timeout_ms = ms;
        self
    }

    pub fn with_evacuation_interval_ms(mut self, ms: u64) -> Self {
        self.evacuation_interval_ms = ms;
        self
    }
}
