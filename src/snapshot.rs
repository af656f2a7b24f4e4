//! Raw telemetry snapshots returned by the vendor client
//!
//! A snapshot is a timestamp plus an ordered mapping from a semantic field to
//! the raw integer reported by the vendor. Scaling and sentinel filtering are
//! left to the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields of the vehicle status source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    /// Percent
    Soc,
    /// Tenths of a kilometre
    ElectricRange,
    /// Tenths of a kilometre
    Mileage,
    /// Degrees Celsius
    InteriorTemperature,
    /// Degrees Celsius
    ExteriorTemperature,
    /// Tenths of a volt
    AuxiliaryBatteryVoltage,
    /// Non-zero while the power train is on
    EngineRunning,
    /// Tenths of km/h
    Speed,
    /// Micro-degrees
    Latitude,
    /// Micro-degrees
    Longitude,
    /// Degrees
    Heading,
    DoorsLocked,
    BootOpen,
    /// Raw units of 0.04 bar
    FrontLeftTyrePressure,
    FrontRightTyrePressure,
    RearLeftTyrePressure,
    RearRightTyrePressure,
}

impl StatusField {
    pub const ALL: [StatusField; 17] = [
        StatusField::Soc,
        StatusField::ElectricRange,
        StatusField::Mileage,
        StatusField::InteriorTemperature,
        StatusField::ExteriorTemperature,
        StatusField::AuxiliaryBatteryVoltage,
        StatusField::EngineRunning,
        StatusField::Speed,
        StatusField::Latitude,
        StatusField::Longitude,
        StatusField::Heading,
        StatusField::DoorsLocked,
        StatusField::BootOpen,
        StatusField::FrontLeftTyrePressure,
        StatusField::FrontRightTyrePressure,
        StatusField::RearLeftTyrePressure,
        StatusField::RearRightTyrePressure,
    ];

    /// Name used in configuration overrides
    pub fn name(&self) -> &'static str {
        match self {
            Self::Soc => "soc",
            Self::ElectricRange => "electric_range",
            Self::Mileage => "mileage",
            Self::InteriorTemperature => "interior_temperature",
            Self::ExteriorTemperature => "exterior_temperature",
            Self::AuxiliaryBatteryVoltage => "auxiliary_battery_voltage",
            Self::EngineRunning => "engine_running",
            Self::Speed => "speed",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Heading => "heading",
            Self::DoorsLocked => "doors_locked",
            Self::BootOpen => "boot_open",
            Self::FrontLeftTyrePressure => "front_left_tyre_pressure",
            Self::FrontRightTyrePressure => "front_right_tyre_pressure",
            Self::RearLeftTyrePressure => "rear_left_tyre_pressure",
            Self::RearRightTyrePressure => "rear_right_tyre_pressure",
        }
    }
}

/// Fields of the charge (BMS) source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeField {
    /// Tenths of a percent
    BmsSoc,
    /// Tenths of a kilometre
    BmsElectricRange,
    /// Raw units of 0.05 A, offset by 1000 A
    ChargingCurrent,
    /// Raw units of 0.25 V
    ChargingVoltage,
    ChargerConnected,
    /// Vendor charge status code
    ChargingStatus,
    /// Minutes
    RemainingChargingTime,
    /// Tenths of a kWh
    SocKwh,
    /// Tenths of a kilometre
    MileageOfDay,
    /// Tenths of a kilometre
    MileageSinceLastCharge,
    ChargingCableLock,
    /// Tenths of a kWh
    TotalBatteryCapacity,
}

impl ChargeField {
    pub const ALL: [ChargeField; 12] = [
        ChargeField::BmsSoc,
        ChargeField::BmsElectricRange,
        ChargeField::ChargingCurrent,
        ChargeField::ChargingVoltage,
        ChargeField::ChargerConnected,
        ChargeField::ChargingStatus,
        ChargeField::RemainingChargingTime,
        ChargeField::SocKwh,
        ChargeField::MileageOfDay,
        ChargeField::MileageSinceLastCharge,
        ChargeField::ChargingCableLock,
        ChargeField::TotalBatteryCapacity,
    ];

    /// Name used in configuration overrides
    pub fn name(&self) -> &'static str {
        match self {
            Self::BmsSoc => "bms_soc",
            Self::BmsElectricRange => "bms_electric_range",
            Self::ChargingCurrent => "charging_current",
            Self::ChargingVoltage => "charging_voltage",
            Self::ChargerConnected => "charger_connected",
            Self::ChargingStatus => "charging_status",
            Self::RemainingChargingTime => "remaining_charging_time",
            Self::SocKwh => "soc_kwh",
            Self::MileageOfDay => "mileage_of_day",
            Self::MileageSinceLastCharge => "mileage_since_last_charge",
            Self::ChargingCableLock => "charging_cable_lock",
            Self::TotalBatteryCapacity => "total_battery_capacity",
        }
    }
}

/// Vehicle status reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    taken_at: DateTime<Utc>,
    values: BTreeMap<StatusField, i64>,
}

impl StatusSnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: StatusField, raw: i64) -> Self {
        self.values.insert(field, raw);
        self
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn get(&self, field: StatusField) -> Option<i64> {
        self.values.get(&field).copied()
    }

    pub fn values(&self) -> &BTreeMap<StatusField, i64> {
        &self.values
    }
}

/// Charge status reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeSnapshot {
    taken_at: DateTime<Utc>,
    values: BTreeMap<ChargeField, i64>,
}

impl ChargeSnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: ChargeField, raw: i64) -> Self {
        self.values.insert(field, raw);
        self
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn get(&self, field: ChargeField) -> Option<i64> {
        self.values.get(&field).copied()
    }

    pub fn values(&self) -> &BTreeMap<ChargeField, i64> {
        &self.values
    }
}
