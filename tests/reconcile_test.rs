use chrono::Utc;
use evbridge::config::{RangePrecedence, ReconcileConfig};
use evbridge::publisher::TopicValue;
use evbridge::reconcile::{Reconciler, TopicUpdate};
use evbridge::snapshot::{ChargeField, ChargeSnapshot, StatusField, StatusSnapshot};
use evbridge::topics;
use std::collections::HashSet;

fn value_of(updates: &[TopicUpdate], key: &str) -> Option<TopicValue> {
    updates.iter().find(|u| u.key == key).map(|u| u.value.clone())
}

fn full_status() -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::new(Utc::now());
    for field in StatusField::ALL {
        snapshot = snapshot.with(field, 1);
    }
    snapshot
}

fn full_charge() -> ChargeSnapshot {
    let mut snapshot = ChargeSnapshot::new(Utc::now());
    for field in ChargeField::ALL {
        snapshot = snapshot.with(field, 1);
    }
    snapshot
}

#[test]
fn soc_prefers_charge_source_when_both_valid() {
    let reconciler = Reconciler::default();
    let status = StatusSnapshot::new(Utc::now()).with(StatusField::Soc, 55);
    let charge = ChargeSnapshot::new(Utc::now()).with(ChargeField::BmsSoc, 723);

    let updates = reconciler.reconcile_conflicting(Some(&status), Some(&charge));
    assert_eq!(
        value_of(&updates, topics::DRIVETRAIN_SOC),
        Some(TopicValue::Float(72.3))
    );
}

#[test]
fn soc_falls_back_to_status_source() {
    let reconciler = Reconciler::default();
    let status = StatusSnapshot::new(Utc::now()).with(StatusField::Soc, 55);
    let charge = ChargeSnapshot::new(Utc::now()).with(ChargeField::BmsSoc, 1_023);

    let updates = reconciler.reconcile_conflicting(Some(&status), Some(&charge));
    assert_eq!(
        value_of(&updates, topics::DRIVETRAIN_SOC),
        Some(TopicValue::Float(55.0))
    );

    let updates = reconciler.reconcile_conflicting(Some(&status), None);
    assert_eq!(
        value_of(&updates, topics::DRIVETRAIN_SOC),
        Some(TopicValue::Float(55.0))
    );
}

#[test]
fn soc_omitted_when_neither_source_is_valid() {
    let reconciler = Reconciler::default();
    let status = StatusSnapshot::new(Utc::now()).with(StatusField::Soc, 255);
    let charge = ChargeSnapshot::new(Utc::now()).with(ChargeField::BmsSoc, -1);

    let updates = reconciler.reconcile_conflicting(Some(&status), Some(&charge));
    assert!(value_of(&updates, topics::DRIVETRAIN_SOC).is_none());
}

#[test]
fn scenario_bms_soc_with_sentinel_vehicle_range() {
    let reconciler = Reconciler::default();
    let status = StatusSnapshot::new(Utc::now())
        .with(StatusField::Soc, 55)
        .with(StatusField::ElectricRange, 65_535);
    let charge = ChargeSnapshot::new(Utc::now()).with(ChargeField::BmsSoc, 610);

    let updates = reconciler.reconcile(Some(&status), Some(&charge));
    let soc = value_of(&updates, topics::DRIVETRAIN_SOC).unwrap();
    assert_eq!(soc, TopicValue::Float(61.0));
    assert_eq!(soc.render().unwrap(), "61");
    assert!(value_of(&updates, topics::DRIVETRAIN_RANGE).is_none());
}

#[test]
fn range_precedence_is_configurable() {
    let status = StatusSnapshot::new(Utc::now()).with(StatusField::ElectricRange, 3_000);
    let charge = ChargeSnapshot::new(Utc::now()).with(ChargeField::BmsElectricRange, 2_500);

    let bms_first = Reconciler::default();
    assert_eq!(
        bms_first.resolve_range(Some(&status), Some(&charge)),
        Some(250.0)
    );

    let config = ReconcileConfig {
        range_precedence: RangePrecedence::Maximum,
        ..ReconcileConfig::default()
    };
    let maximum = Reconciler::new(&config).unwrap();
    assert_eq!(maximum.resolve_range(Some(&status), Some(&charge)), Some(300.0));
    assert_eq!(maximum.resolve_range(Some(&status), None), Some(300.0));
}

#[test]
fn exclusive_topic_sets_are_disjoint() {
    let reconciler = Reconciler::default();
    let status_topics: HashSet<&str> = reconciler
        .reconcile_status(&full_status())
        .iter()
        .map(|u| u.key)
        .collect();
    let charge_topics: HashSet<&str> = reconciler
        .reconcile_charge(&full_charge())
        .iter()
        .map(|u| u.key)
        .collect();
    let conflicting: HashSet<&str> = reconciler
        .reconcile_conflicting(Some(&full_status()), Some(&full_charge()))
        .iter()
        .map(|u| u.key)
        .collect();

    assert!(!status_topics.is_empty());
    assert!(!charge_topics.is_empty());
    assert!(status_topics.is_disjoint(&charge_topics));
    assert!(status_topics.is_disjoint(&conflicting));
    assert!(charge_topics.is_disjoint(&conflicting));
}

#[test]
fn reconcile_orders_status_charge_then_conflicting() {
    let reconciler = Reconciler::default();
    let status = StatusSnapshot::new(Utc::now())
        .with(StatusField::Mileage, 123_456)
        .with(StatusField::Soc, 40);
    let charge = ChargeSnapshot::new(Utc::now()).with(ChargeField::ChargingStatus, 0);

    let keys: Vec<&str> = reconciler
        .reconcile(Some(&status), Some(&charge))
        .iter()
        .map(|u| u.key)
        .collect();
    assert_eq!(
        keys,
        vec![
            topics::DRIVETRAIN_MILEAGE,
            topics::DRIVETRAIN_CHARGING,
            topics::BMS_CHARGE_STATUS,
            topics::DRIVETRAIN_SOC,
            topics::DRIVETRAIN_HV_BATTERY_ACTIVE,
        ]
    );
}

#[test]
fn scaled_values_are_quantized() {
    let reconciler = Reconciler::default();
    let status = StatusSnapshot::new(Utc::now())
        .with(StatusField::Mileage, 123_456)
        .with(StatusField::Latitude, 52_370_216)
        .with(StatusField::FrontLeftTyrePressure, 61)
        .with(StatusField::InteriorTemperature, 21);

    let updates = reconciler.reconcile_status(&status);
    assert_eq!(
        value_of(&updates, topics::DRIVETRAIN_MILEAGE),
        Some(TopicValue::Float(12_345.6))
    );
    assert_eq!(
        value_of(&updates, topics::LOCATION_LATITUDE),
        Some(TopicValue::Float(52.370_216))
    );
    assert_eq!(
        value_of(&updates, topics::TYRES_FRONT_LEFT_PRESSURE),
        Some(TopicValue::Float(2.44))
    );
    assert_eq!(
        value_of(&updates, topics::CLIMATE_INTERIOR_TEMPERATURE),
        Some(TopicValue::Int(21))
    );
}

#[test]
fn hv_battery_active_when_running_or_charging() {
    let reconciler = Reconciler::default();
    let parked = StatusSnapshot::new(Utc::now()).with(StatusField::EngineRunning, 0);
    let charging = ChargeSnapshot::new(Utc::now()).with(ChargeField::ChargingStatus, 2);

    let updates = reconciler.reconcile_conflicting(Some(&parked), None);
    assert_eq!(
        value_of(&updates, topics::DRIVETRAIN_HV_BATTERY_ACTIVE),
        Some(TopicValue::Bool(false))
    );

    let updates = reconciler.reconcile_conflicting(Some(&parked), Some(&charging));
    assert_eq!(
        value_of(&updates, topics::DRIVETRAIN_HV_BATTERY_ACTIVE),
        Some(TopicValue::Bool(true))
    );
}
