//! Telemetry reconciliation
//!
//! Turns a vehicle status snapshot and a charge snapshot into topic updates.
//! Each raw field is checked against an exclusive sentinel range before it is
//! scaled; fields outside their range are dropped silently. Topics fed by both
//! sources (state of charge, electric range, HV battery activity) are resolved
//! with the charge source taking precedence.

use crate::config::{RangePrecedence, ReconcileConfig, SentinelRange};
use crate::error::{BridgeError, Result};
use crate::model::VehicleActivity;
use crate::publisher::TopicValue;
use crate::snapshot::{ChargeField, ChargeSnapshot, StatusField, StatusSnapshot};
use crate::topics;
use std::collections::BTreeMap;

/// Vendor charge status codes that mean energy is flowing into the battery
const CHARGING_STATUS_CODES: std::ops::RangeInclusive<i64> = 1..=3;

/// One value to publish, keyed relative to the vehicle prefix
#[derive(Debug, Clone, PartialEq)]
pub struct TopicUpdate {
    pub key: &'static str,
    pub value: TopicValue,
}

impl TopicUpdate {
    fn new(key: &'static str, value: TopicValue) -> Self {
        Self { key, value }
    }
}

fn default_status_range(field: StatusField) -> SentinelRange {
    match field {
        StatusField::Soc => SentinelRange::new(-1, 101),
        StatusField::ElectricRange => SentinelRange::new(0, 65_535),
        StatusField::Mileage => SentinelRange::new(0, i32::MAX as i64),
        StatusField::InteriorTemperature | StatusField::ExteriorTemperature => {
            SentinelRange::new(-128, 127)
        }
        StatusField::AuxiliaryBatteryVoltage => SentinelRange::new(0, 65_535),
        StatusField::EngineRunning | StatusField::DoorsLocked | StatusField::BootOpen => {
            SentinelRange::new(-1, 2)
        }
        StatusField::Speed => SentinelRange::new(-1, 65_535),
        StatusField::Latitude => SentinelRange::new(-90_000_001, 90_000_001),
        StatusField::Longitude => SentinelRange::new(-180_000_001, 180_000_001),
        StatusField::Heading => SentinelRange::new(-1, 361),
        StatusField::FrontLeftTyrePressure
        | StatusField::FrontRightTyrePressure
        | StatusField::RearLeftTyrePressure
        | StatusField::RearRightTyrePressure => SentinelRange::new(0, 255),
    }
}

fn default_charge_range(field: ChargeField) -> SentinelRange {
    match field {
        ChargeField::BmsSoc => SentinelRange::new(-1, 1_001),
        ChargeField::BmsElectricRange => SentinelRange::new(0, 65_535),
        ChargeField::ChargingCurrent => SentinelRange::new(0, 65_535),
        ChargeField::ChargingVoltage => SentinelRange::new(-1, 65_535),
        ChargeField::ChargerConnected | ChargeField::ChargingCableLock => {
            SentinelRange::new(-1, 2)
        }
        ChargeField::ChargingStatus => SentinelRange::new(-1, 256),
        ChargeField::RemainingChargingTime => SentinelRange::new(-1, 65_535),
        ChargeField::SocKwh => SentinelRange::new(-1, 65_535),
        ChargeField::MileageOfDay | ChargeField::MileageSinceLastCharge => {
            SentinelRange::new(-1, i32::MAX as i64)
        }
        ChargeField::TotalBatteryCapacity => SentinelRange::new(0, 65_535),
    }
}

/// Round to a fixed number of decimals
pub fn quantize(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Pure merger of the two telemetry sources
#[derive(Debug, Clone)]
pub struct Reconciler {
    status_ranges: BTreeMap<StatusField, SentinelRange>,
    charge_ranges: BTreeMap<ChargeField, SentinelRange>,
    range_precedence: RangePrecedence,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            status_ranges: StatusField::ALL
                .iter()
                .map(|f| (*f, default_status_range(*f)))
                .collect(),
            charge_ranges: ChargeField::ALL
                .iter()
                .map(|f| (*f, default_charge_range(*f)))
                .collect(),
            range_precedence: RangePrecedence::default(),
        }
    }
}

impl Reconciler {
    /// Build from configuration; unknown override names are rejected
    pub fn new(config: &ReconcileConfig) -> Result<Self> {
        let mut reconciler = Self {
            range_precedence: config.range_precedence,
            ..Self::default()
        };

        for (name, range) in &config.sentinels {
            if let Some(field) = StatusField::ALL.iter().find(|f| f.name() == name) {
                reconciler.status_ranges.insert(*field, *range);
            } else if let Some(field) = ChargeField::ALL.iter().find(|f| f.name() == name) {
                reconciler.charge_ranges.insert(*field, *range);
            } else {
                return Err(BridgeError::config(format!(
                    "Unknown sentinel field: {}",
                    name
                )));
            }
        }

        Ok(reconciler)
    }

    pub fn range_precedence(&self) -> RangePrecedence {
        self.range_precedence
    }

    fn status_value(&self, status: &StatusSnapshot, field: StatusField) -> Option<i64> {
        let raw = status.get(field)?;
        let range = self
            .status_ranges
            .get(&field)
            .copied()
            .unwrap_or_else(|| default_status_range(field));
        range.contains(raw).then_some(raw)
    }

    fn charge_value(&self, charge: &ChargeSnapshot, field: ChargeField) -> Option<i64> {
        let raw = charge.get(field)?;
        let range = self
            .charge_ranges
            .get(&field)
            .copied()
            .unwrap_or_else(|| default_charge_range(field));
        range.contains(raw).then_some(raw)
    }

    /// Topics owned by the vehicle status source
    pub fn reconcile_status(&self, status: &StatusSnapshot) -> Vec<TopicUpdate> {
        let mut updates = Vec::new();
        let tenths = |raw: i64| TopicValue::Float(quantize(raw as f64 / 10.0, 1));
        let flag = |raw: i64| TopicValue::Bool(raw == 1);
        let bar = |raw: i64| TopicValue::Float(quantize(raw as f64 * 4.0 / 100.0, 2));
        let degrees = |raw: i64| TopicValue::Float(quantize(raw as f64 / 1_000_000.0, 6));

        let table: [(StatusField, &'static str, &dyn Fn(i64) -> TopicValue); 15] = [
            (StatusField::EngineRunning, topics::DRIVETRAIN_RUNNING, &flag),
            (StatusField::Mileage, topics::DRIVETRAIN_MILEAGE, &tenths),
            (
                StatusField::AuxiliaryBatteryVoltage,
                topics::DRIVETRAIN_AUXILIARY_BATTERY_VOLTAGE,
                &tenths,
            ),
            (
                StatusField::InteriorTemperature,
                topics::CLIMATE_INTERIOR_TEMPERATURE,
                &TopicValue::Int,
            ),
            (
                StatusField::ExteriorTemperature,
                topics::CLIMATE_EXTERIOR_TEMPERATURE,
                &TopicValue::Int,
            ),
            (StatusField::Speed, topics::LOCATION_SPEED, &tenths),
            (StatusField::Heading, topics::LOCATION_HEADING, &TopicValue::Int),
            (StatusField::Latitude, topics::LOCATION_LATITUDE, &degrees),
            (StatusField::Longitude, topics::LOCATION_LONGITUDE, &degrees),
            (StatusField::DoorsLocked, topics::DOORS_LOCKED, &flag),
            (StatusField::BootOpen, topics::DOORS_BOOT, &flag),
            (
                StatusField::FrontLeftTyrePressure,
                topics::TYRES_FRONT_LEFT_PRESSURE,
                &bar,
            ),
            (
                StatusField::FrontRightTyrePressure,
                topics::TYRES_FRONT_RIGHT_PRESSURE,
                &bar,
            ),
            (
                StatusField::RearLeftTyrePressure,
                topics::TYRES_REAR_LEFT_PRESSURE,
                &bar,
            ),
            (
                StatusField::RearRightTyrePressure,
                topics::TYRES_REAR_RIGHT_PRESSURE,
                &bar,
            ),
        ];

        for (field, key, convert) in table {
            if let Some(raw) = self.status_value(status, field) {
                updates.push(TopicUpdate::new(key, convert(raw)));
            }
        }
        updates
    }

    /// Topics owned by the charge source, including derived charging power
    pub fn reconcile_charge(&self, charge: &ChargeSnapshot) -> Vec<TopicUpdate> {
        let mut updates = Vec::new();

        if let Some(status) = self.charge_value(charge, ChargeField::ChargingStatus) {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_CHARGING,
                TopicValue::Bool(CHARGING_STATUS_CODES.contains(&status)),
            ));
            updates.push(TopicUpdate::new(
                topics::BMS_CHARGE_STATUS,
                TopicValue::Int(status),
            ));
        }

        let current = self
            .charge_value(charge, ChargeField::ChargingCurrent)
            .map(|raw| raw as f64 * 0.05 - 1000.0);
        let voltage = self
            .charge_value(charge, ChargeField::ChargingVoltage)
            .map(|raw| raw as f64 * 0.25);
        if let Some(current) = current {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_CURRENT,
                TopicValue::Float(quantize(current, 2)),
            ));
        }
        if let Some(voltage) = voltage {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_VOLTAGE,
                TopicValue::Float(quantize(voltage, 2)),
            ));
        }
        if let (Some(current), Some(voltage)) = (current, voltage) {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_POWER,
                TopicValue::Float(quantize(current * voltage / 1000.0, 2)),
            ));
        }

        let tenths = |raw: i64| TopicValue::Float(quantize(raw as f64 / 10.0, 1));
        let flag = |raw: i64| TopicValue::Bool(raw == 1);
        let table: [(ChargeField, &'static str, &dyn Fn(i64) -> TopicValue); 7] = [
            (
                ChargeField::ChargerConnected,
                topics::DRIVETRAIN_CHARGER_CONNECTED,
                &flag,
            ),
            (
                ChargeField::RemainingChargingTime,
                topics::DRIVETRAIN_REMAINING_CHARGING_TIME,
                &TopicValue::Int,
            ),
            (ChargeField::SocKwh, topics::DRIVETRAIN_SOC_KWH, &tenths),
            (
                ChargeField::MileageOfDay,
                topics::DRIVETRAIN_MILEAGE_OF_DAY,
                &tenths,
            ),
            (
                ChargeField::MileageSinceLastCharge,
                topics::DRIVETRAIN_MILEAGE_SINCE_LAST_CHARGE,
                &tenths,
            ),
            (
                ChargeField::ChargingCableLock,
                topics::DRIVETRAIN_CHARGING_CABLE_LOCK,
                &flag,
            ),
            (
                ChargeField::TotalBatteryCapacity,
                topics::DRIVETRAIN_TOTAL_BATTERY_CAPACITY,
                &tenths,
            ),
        ];

        for (field, key, convert) in table {
            if let Some(raw) = self.charge_value(charge, field) {
                updates.push(TopicUpdate::new(key, convert(raw)));
            }
        }
        updates
    }

    /// State of charge in percent; the charge source wins when valid
    pub fn resolve_soc(
        &self,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> Option<f64> {
        let bms = charge
            .and_then(|c| self.charge_value(c, ChargeField::BmsSoc))
            .map(|raw| quantize(raw as f64 / 10.0, 1));
        bms.or_else(|| {
            status
                .and_then(|s| self.status_value(s, StatusField::Soc))
                .map(|raw| raw as f64)
        })
    }

    /// Electric range in km, resolved by the configured precedence
    pub fn resolve_range(
        &self,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> Option<f64> {
        let bms = charge
            .and_then(|c| self.charge_value(c, ChargeField::BmsElectricRange))
            .map(|raw| quantize(raw as f64 / 10.0, 1));
        let vehicle = status
            .and_then(|s| self.status_value(s, StatusField::ElectricRange))
            .map(|raw| quantize(raw as f64 / 10.0, 1));

        match (self.range_precedence, bms, vehicle) {
            (RangePrecedence::Maximum, Some(bms), Some(vehicle)) => Some(bms.max(vehicle)),
            (_, bms, vehicle) => bms.or(vehicle),
        }
    }

    /// Whether the charge source reports energy flowing into the battery
    pub fn is_charging(&self, charge: Option<&ChargeSnapshot>) -> Option<bool> {
        charge
            .and_then(|c| self.charge_value(c, ChargeField::ChargingStatus))
            .map(|status| CHARGING_STATUS_CODES.contains(&status))
    }

    fn is_running(&self, status: Option<&StatusSnapshot>) -> Option<bool> {
        status
            .and_then(|s| self.status_value(s, StatusField::EngineRunning))
            .map(|raw| raw == 1)
    }

    /// Topics fed by both sources
    pub fn reconcile_conflicting(
        &self,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> Vec<TopicUpdate> {
        let mut updates = Vec::new();

        if let Some(soc) = self.resolve_soc(status, charge) {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_SOC,
                TopicValue::Float(soc),
            ));
        }
        if let Some(range) = self.resolve_range(status, charge) {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_RANGE,
                TopicValue::Float(range),
            ));
        }

        let hv_active = match (self.is_running(status), self.is_charging(charge)) {
            (None, None) => None,
            (running, charging) => Some(running.unwrap_or(false) || charging.unwrap_or(false)),
        };
        if let Some(active) = hv_active {
            updates.push(TopicUpdate::new(
                topics::DRIVETRAIN_HV_BATTERY_ACTIVE,
                TopicValue::Bool(active),
            ));
        }

        updates
    }

    /// Every update of one cycle: status, charge, then conflicting topics
    pub fn reconcile(
        &self,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> Vec<TopicUpdate> {
        let mut updates = Vec::new();
        if let Some(status) = status {
            updates.extend(self.reconcile_status(status));
        }
        if let Some(charge) = charge {
            updates.extend(self.reconcile_charge(charge));
        }
        updates.extend(self.reconcile_conflicting(status, charge));
        updates
    }

    /// Activity class used to pick the next refresh period
    pub fn classify_activity(
        &self,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> VehicleActivity {
        if self.is_charging(charge).unwrap_or(false) {
            VehicleActivity::Charging
        } else if self.is_running(status).unwrap_or(false) {
            VehicleActivity::Driving
        } else {
            VehicleActivity::Idle
        }
    }
}
