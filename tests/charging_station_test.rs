mod common;

use chrono::Utc;
use common::CapturingPublisher;
use evbridge::config::MqttConfig;
use evbridge::dispatch::Integration;
use evbridge::gateway::GatewayEvent;
use evbridge::integrations::charging_station::{self, ChargingStation, ChargingStationIntegration};
use evbridge::reconcile::Reconciler;
use evbridge::snapshot::{ChargeField, ChargeSnapshot, StatusField, StatusSnapshot};
use std::sync::Arc;
use tokio::sync::mpsc;

fn station() -> ChargingStation {
    ChargingStation {
        vin: "VIN1".to_string(),
        charge_state_topic: "openWB/lp/1/boolChargeStat".to_string(),
        charging_value: "1".to_string(),
        soc_topic: Some("openWB/set/lp/1/%Soc".to_string()),
        range_topic: Some("openWB/set/lp/1/range".to_string()),
        charger_connected_topic: Some("openWB/lp/1/boolPlugStat".to_string()),
        charger_connected_value: Some("1".to_string()),
    }
}

fn integration(
    transport: Arc<CapturingPublisher>,
) -> (
    ChargingStationIntegration,
    mpsc::UnboundedReceiver<GatewayEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let integration = ChargingStationIntegration::new(
        vec![station()],
        transport,
        &MqttConfig::default(),
        Arc::new(Reconciler::default()),
        tx,
    );
    (integration, rx)
}

#[tokio::test]
async fn charging_value_reports_charging_detected_once() {
    let (integration, mut events) = integration(CapturingPublisher::new());
    let topic = "openWB/lp/1/boolChargeStat";

    let outcome = integration.handle_raw_message(topic, "1").await.unwrap();
    assert!(outcome.handled);
    assert_eq!(
        events.try_recv().unwrap(),
        GatewayEvent::ChargingDetected {
            vin: "VIN1".to_string()
        }
    );

    integration.handle_raw_message(topic, "1").await.unwrap();
    assert!(events.try_recv().is_err());

    integration.handle_raw_message(topic, "0").await.unwrap();
    assert!(events.try_recv().is_err());

    integration.handle_raw_message(topic, "1").await.unwrap();
    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn connected_topic_is_handled_without_event() {
    let (integration, mut events) = integration(CapturingPublisher::new());

    let outcome = integration
        .handle_raw_message("openWB/lp/1/boolPlugStat", "1")
        .await
        .unwrap();
    assert!(outcome.handled);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unrelated_topics_are_not_handled() {
    let (integration, _events) = integration(CapturingPublisher::new());
    let outcome = integration
        .handle_raw_message("saic/user/vehicles/VIN1/doors/locked/set", "true")
        .await
        .unwrap();
    assert!(!outcome.handled);
    assert!(outcome.diagnostic.is_some());
}

#[tokio::test]
async fn full_refresh_publishes_soc_and_range_without_prefix() {
    let transport = CapturingPublisher::new();
    let (integration, _events) = integration(transport.clone());
    let status = StatusSnapshot::new(Utc::now()).with(StatusField::ElectricRange, 2_000);
    let charge = ChargeSnapshot::new(Utc::now())
        .with(ChargeField::BmsSoc, 617)
        .with(ChargeField::BmsElectricRange, 2_150);

    let outcome = integration
        .handle_full_refresh("VIN1", Some(&status), Some(&charge))
        .await
        .unwrap();
    assert!(outcome.handled);
    assert_eq!(
        transport.last_payload("openWB/set/lp/1/%Soc").as_deref(),
        Some("61")
    );
    assert_eq!(
        transport.last_payload("openWB/set/lp/1/range").as_deref(),
        Some("215")
    );
}

#[tokio::test]
async fn full_refresh_for_unknown_vehicle_is_ignored() {
    let transport = CapturingPublisher::new();
    let (integration, _events) = integration(transport.clone());

    let outcome = integration
        .handle_full_refresh("OTHER", None, None)
        .await
        .unwrap();
    assert!(!outcome.handled);
    assert!(transport.messages().is_empty());
}

#[test]
fn additional_topics_cover_state_and_plug() {
    let (integration, _events) = integration(CapturingPublisher::new());
    let mut topics = integration.additional_topics();
    topics.sort();
    assert_eq!(
        topics,
        vec![
            "openWB/lp/1/boolChargeStat".to_string(),
            "openWB/lp/1/boolPlugStat".to_string()
        ]
    );
    assert!(integration.exclusive());
}

#[test]
fn stations_load_from_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        tmp.path(),
        r#"[{"vin":"VIN1","chargeStateTopic":"wb/state","chargingValue":"charging","rangeTopic":"wb/range"}]"#,
    )
    .unwrap();

    let stations = charging_station::load_stations(tmp.path()).unwrap();
    assert_eq!(stations.len(), 1);
    assert_eq!(stations[0].charging_value, "charging");
    assert_eq!(stations[0].range_topic.as_deref(), Some("wb/range"));
    assert!(stations[0].soc_topic.is_none());
}

#[test]
fn malformed_stations_file_is_an_error() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), "[{").unwrap();
    assert!(charging_station::load_stations(tmp.path()).is_err());
}
