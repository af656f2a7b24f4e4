//! Charging station integration
//!
//! A wallbox that reports its charge state over the broker can tell the
//! gateway that a vehicle started charging long before the next scheduled
//! poll. In the other direction the station receives the vehicle's state of
//! charge and electric range after every refresh.

use crate::config::MqttConfig;
use crate::dispatch::{Integration, IntegrationOutcome};
use crate::error::Result;
use crate::gateway::GatewayEvent;
use crate::logging::{StructuredLogger, get_logger};
use crate::publisher::{DedupPublisher, Publisher};
use crate::reconcile::Reconciler;
use crate::snapshot::{ChargeSnapshot, StatusSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub const INTEGRATION_NAME: &str = "charging_station";

/// One station entry of the stations file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStation {
    pub vin: String,
    pub charge_state_topic: String,
    pub charging_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charger_connected_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charger_connected_value: Option<String>,
}

/// Read the stations file; a missing file yields no stations
pub fn load_stations<P: AsRef<Path>>(path: P) -> Result<Vec<ChargingStation>> {
    let path = path.as_ref();
    if !path.exists() {
        get_logger(INTEGRATION_NAME).warn(&format!(
            "Charging stations file {} does not exist",
            path.display()
        ));
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)?;
    let stations: Vec<ChargingStation> = serde_json::from_str(&contents)?;
    Ok(stations)
}

pub struct ChargingStationIntegration {
    stations_by_vin: HashMap<String, ChargingStation>,
    vin_by_charge_state_topic: HashMap<String, String>,
    vin_by_connected_topic: HashMap<String, String>,
    last_charge_state: Mutex<HashMap<String, String>>,
    events: UnboundedSender<GatewayEvent>,
    publisher: tokio::sync::Mutex<DedupPublisher>,
    reconciler: Arc<Reconciler>,
    logger: StructuredLogger,
}

impl ChargingStationIntegration {
    pub fn new(
        stations: Vec<ChargingStation>,
        transport: Arc<dyn Publisher>,
        mqtt: &MqttConfig,
        reconciler: Arc<Reconciler>,
        events: UnboundedSender<GatewayEvent>,
    ) -> Self {
        let logger = get_logger(INTEGRATION_NAME);
        let mut vin_by_charge_state_topic = HashMap::new();
        let mut vin_by_connected_topic = HashMap::new();
        let mut stations_by_vin = HashMap::new();

        for station in stations {
            logger.debug(&format!(
                "Station for {} reports on {}",
                station.vin, station.charge_state_topic
            ));
            vin_by_charge_state_topic.insert(station.charge_state_topic.clone(), station.vin.clone());
            if let Some(topic) = &station.charger_connected_topic {
                vin_by_connected_topic.insert(topic.clone(), station.vin.clone());
            }
            stations_by_vin.insert(station.vin.clone(), station);
        }

        Self {
            stations_by_vin,
            vin_by_charge_state_topic,
            vin_by_connected_topic,
            last_charge_state: Mutex::new(HashMap::new()),
            events,
            publisher: tokio::sync::Mutex::new(
                DedupPublisher::new(transport, mqtt).with_logger(logger.clone()),
            ),
            reconciler,
            logger,
        }
    }

    pub fn station(&self, vin: &str) -> Option<&ChargingStation> {
        self.stations_by_vin.get(vin)
    }

    /// Remember the reported state; true when it just changed to charging
    fn charging_started(&self, vin: &str, payload: &str, charging_value: &str) -> bool {
        let mut last = match self.last_charge_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = last.insert(vin.to_string(), payload.to_string());
        if previous.as_deref() == Some(payload) {
            return false;
        }
        if let Some(previous) = previous {
            self.logger.info(&format!(
                "Charge state of {} changed from {} to {}",
                vin, previous, payload
            ));
        }
        payload == charging_value
    }
}

#[async_trait::async_trait]
impl Integration for ChargingStationIntegration {
    fn name(&self) -> &str {
        INTEGRATION_NAME
    }

    async fn handle_raw_message(&self, topic: &str, payload: &str) -> Result<IntegrationOutcome> {
        if let Some(vin) = self.vin_by_charge_state_topic.get(topic) {
            let Some(station) = self.stations_by_vin.get(vin) else {
                return Ok(IntegrationOutcome::ignored());
            };
            if self.charging_started(vin, payload, &station.charging_value) {
                self.logger
                    .info(&format!("Vehicle {} is charging, requesting refresh", vin));
                if self
                    .events
                    .send(GatewayEvent::ChargingDetected { vin: vin.clone() })
                    .is_err()
                {
                    self.logger.warn("Gateway event channel closed");
                }
            }
            return Ok(IntegrationOutcome::handled());
        }

        if let Some(vin) = self.vin_by_connected_topic.get(topic) {
            let connected = self
                .stations_by_vin
                .get(vin)
                .and_then(|s| s.charger_connected_value.as_deref())
                .is_some_and(|value| value == payload);
            self.logger.debug(&format!(
                "Vehicle {} is {} its charging station",
                vin,
                if connected {
                    "connected to"
                } else {
                    "disconnected from"
                }
            ));
            return Ok(IntegrationOutcome::handled());
        }

        Ok(IntegrationOutcome::ignored()
            .with_diagnostic(format!("Topic {} not handled by {}", topic, INTEGRATION_NAME)))
    }

    async fn handle_full_refresh(
        &self,
        vin: &str,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> Result<IntegrationOutcome> {
        let Some(station) = self.stations_by_vin.get(vin) else {
            return Ok(IntegrationOutcome::ignored()
                .with_diagnostic(format!("No charging station configured for {}", vin)));
        };

        let mut handled = false;
        let mut publisher = self.publisher.lock().await;

        if let Some(topic) = &station.soc_topic {
            if let Some(soc) = self.reconciler.resolve_soc(status, charge) {
                publisher.publish_int(topic, soc.trunc() as i64, true).await?;
                handled = true;
            }
        }
        if let Some(topic) = &station.range_topic {
            if let Some(range) = self.reconciler.resolve_range(status, charge) {
                publisher.publish_float(topic, range, true).await?;
                handled = true;
            }
        }

        Ok(IntegrationOutcome {
            handled,
            diagnostic: None,
        })
    }

    fn additional_topics(&self) -> Vec<String> {
        self.vin_by_charge_state_topic
            .keys()
            .chain(self.vin_by_connected_topic.keys())
            .cloned()
            .collect()
    }

    fn exclusive(&self) -> bool {
        true
    }
}
