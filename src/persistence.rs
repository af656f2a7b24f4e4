//! Persistence layer for per-vehicle refresh settings
//!
//! Refresh modes and periods changed through inbound commands are saved to a
//! JSON file and restored when the vehicle is registered again after a
//! restart. FORCE is transient and is stored as PERIODIC.

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::model::{RefreshMode, VehicleActivity};
use crate::schedule::ScheduleState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// Stored refresh settings of one vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRefreshState {
    /// `periodic` or `off`
    pub mode: String,

    pub active_interval_seconds: u64,

    pub inactive_interval_seconds: u64,

    pub charging_interval_seconds: u64,
}

impl VehicleRefreshState {
    /// Snapshot the persistable part of a schedule
    pub fn capture(schedule: &ScheduleState) -> Self {
        let mode = match schedule.mode() {
            RefreshMode::Off => RefreshMode::Off,
            RefreshMode::Force | RefreshMode::Periodic(_) => {
                RefreshMode::Periodic(schedule.periodic_interval())
            }
        };
        let periods = schedule.periods();
        Self {
            mode: mode.as_str().to_string(),
            active_interval_seconds: periods.active.as_secs(),
            inactive_interval_seconds: periods.inactive.as_secs(),
            charging_interval_seconds: periods.charging.as_secs(),
        }
    }

    /// Restore into a freshly created schedule
    pub fn apply(&self, schedule: &mut ScheduleState, now: Instant) -> Result<()> {
        for (activity, seconds) in [
            (VehicleActivity::Driving, self.active_interval_seconds),
            (VehicleActivity::Idle, self.inactive_interval_seconds),
            (VehicleActivity::Charging, self.charging_interval_seconds),
        ] {
            schedule.set_period(activity, Duration::from_secs(seconds), now)?;
        }
        let mode = RefreshMode::parse(&self.mode, schedule.periodic_interval())?;
        if mode == RefreshMode::Off {
            schedule.set_mode(mode, now)?;
        }
        Ok(())
    }
}

/// Persistent state structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentState {
    /// Refresh settings keyed by vin
    #[serde(default)]
    pub vehicles: BTreeMap<String, VehicleRefreshState>,
}

/// Persistence manager
#[derive(Debug)]
pub struct PersistenceManager {
    file_path: String,
    state: PersistentState,
    logger: StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            state: PersistentState::default(),
            logger: get_logger("persistence"),
        }
    }

    /// Load state from disk
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        self.state = serde_json::from_str(&contents)?;
        self.logger.info(&format!(
            "Loaded refresh settings of {} vehicles",
            self.state.vehicles.len()
        ));

        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");

        Ok(())
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn vehicle(&self, vin: &str) -> Option<&VehicleRefreshState> {
        self.state.vehicles.get(vin)
    }

    /// Store the settings of one vehicle and write the file
    pub fn set_vehicle(&mut self, vin: &str, refresh: VehicleRefreshState) -> Result<()> {
        if self.state.vehicles.get(vin) == Some(&refresh) {
            return Ok(());
        }
        self.state.vehicles.insert(vin.to_string(), refresh);
        self.save()
    }
}
