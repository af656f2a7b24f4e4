//! Vehicle registry and inbound routing
//!
//! The [`Gateway`] owns one task per registered vehicle and routes inbound
//! messages to collaborators or to the vehicle they address. Collaborators
//! feed back into the gateway through [`GatewayEvent`]s.

use crate::config::Config;
use crate::dispatch::{Integration, IntegrationDispatcher};
use crate::error::{BridgeError, Result};
use crate::integrations::charging_station::{self, ChargingStationIntegration};
use crate::logging::{StructuredLogger, get_logger};
use crate::model::VehicleIdentity;
use crate::persistence::PersistenceManager;
use crate::publisher::{DedupPublisher, Publisher};
use crate::reconcile::Reconciler;
use crate::relogin::{Authenticator, ReloginHandler};
use crate::topics;
use crate::vehicle::{SharedServices, VehicleClient, VehicleCommand, VehicleHandler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Feedback from collaborators to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A vehicle started charging; force a refresh
    ChargingDetected { vin: String },
}

/// Handles given to integration factories
#[derive(Clone)]
pub struct IntegrationContext {
    pub config: Arc<Config>,
    pub transport: Arc<dyn Publisher>,
    pub reconciler: Arc<Reconciler>,
    pub events: mpsc::UnboundedSender<GatewayEvent>,
}

/// Commands queue without bound so routing never waits on a busy vehicle
struct VehicleSlot {
    commands: mpsc::UnboundedSender<VehicleCommand>,
    task: JoinHandle<()>,
}

/// Registry of running vehicles
pub struct Gateway {
    services: SharedServices,
    vehicles: HashMap<String, VehicleSlot>,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    events_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    publisher: DedupPublisher,
    logger: StructuredLogger,
}

impl Gateway {
    /// Build a gateway with the built-in collaborators only
    pub fn new(
        config: Config,
        transport: Arc<dyn Publisher>,
        authenticator: Arc<dyn Authenticator>,
        client: Arc<dyn VehicleClient>,
    ) -> Result<Self> {
        Self::with_integrations(config, transport, authenticator, client, |_| Vec::new())
    }

    /// Build a gateway; `extra` supplies collaborators registered after the
    /// built-in ones
    pub fn with_integrations<F>(
        config: Config,
        transport: Arc<dyn Publisher>,
        authenticator: Arc<dyn Authenticator>,
        client: Arc<dyn VehicleClient>,
        extra: F,
    ) -> Result<Self>
    where
        F: FnOnce(&IntegrationContext) -> Vec<Arc<dyn Integration>>,
    {
        config.validate()?;
        let logger = get_logger("gateway");
        let config = Arc::new(config);
        let reconciler = Arc::new(Reconciler::new(&config.reconcile)?);
        let relogin = Arc::new(ReloginHandler::new(authenticator, &config.relogin));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let context = IntegrationContext {
            config: config.clone(),
            transport: transport.clone(),
            reconciler: reconciler.clone(),
            events: events_tx.clone(),
        };

        let mut dispatcher = IntegrationDispatcher::new();
        if let Some(path) = &config.charging_stations_file {
            let stations = charging_station::load_stations(path)?;
            if !stations.is_empty() {
                dispatcher.register(Arc::new(ChargingStationIntegration::new(
                    stations,
                    context.transport.clone(),
                    &config.mqtt,
                    context.reconciler.clone(),
                    context.events.clone(),
                )));
            }
        }
        for integration in extra(&context) {
            dispatcher.register(integration);
        }

        let persistence = match &config.persistence_file {
            Some(path) => {
                let mut manager = PersistenceManager::new(path);
                if let Err(e) = manager.load() {
                    logger.warn(&format!("Could not load persisted state: {}", e));
                }
                Some(Arc::new(Mutex::new(manager)))
            }
            None => None,
        };

        let publisher =
            DedupPublisher::new(transport.clone(), &config.mqtt).with_logger(logger.clone());

        Ok(Self {
            services: SharedServices {
                config,
                transport,
                relogin,
                client,
                dispatcher: Arc::new(dispatcher),
                reconciler,
                persistence,
            },
            vehicles: HashMap::new(),
            events_tx,
            events_rx,
            publisher,
            logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn dispatcher(&self) -> &IntegrationDispatcher {
        &self.services.dispatcher
    }

    pub fn relogin(&self) -> &Arc<ReloginHandler> {
        &self.services.relogin
    }

    /// Sender for collaborators created outside the gateway
    pub fn event_sender(&self) -> mpsc::UnboundedSender<GatewayEvent> {
        self.events_tx.clone()
    }

    pub fn is_registered(&self, vin: &str) -> bool {
        self.vehicles.contains_key(vin)
    }

    pub fn vins(&self) -> Vec<String> {
        let mut vins: Vec<String> = self.vehicles.keys().cloned().collect();
        vins.sort();
        vins
    }

    /// Start the task of a vehicle; its first refresh is due immediately
    pub fn register_vehicle(&mut self, identity: VehicleIdentity) -> Result<()> {
        let vin = identity.vin().to_string();
        if self.vehicles.contains_key(&vin) {
            return Err(BridgeError::validation(
                "vin".to_string(),
                format!("Vehicle {} is already registered", vin),
            ));
        }

        let handler = VehicleHandler::new(identity, self.services.clone(), Instant::now());
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(handler.run(rx));
        self.vehicles.insert(vin.clone(), VehicleSlot { commands, task });
        self.logger.info(&format!("Registered vehicle {}", vin));
        Ok(())
    }

    /// Topics to subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        let config = &self.services.config;
        let mut subscriptions =
            topics::command_subscriptions(&config.mqtt.topic_root, &config.account.username);
        subscriptions.extend(self.services.dispatcher.additional_topics());
        subscriptions
    }

    fn send_to_vehicle(&self, vin: &str, command: VehicleCommand) -> Result<()> {
        let slot = self.vehicles.get(vin).ok_or_else(|| {
            BridgeError::validation("vin".to_string(), format!("Unknown vehicle {}", vin))
        })?;
        slot.commands
            .send(command)
            .map_err(|_| BridgeError::config(format!("Vehicle task of {} has stopped", vin)))
    }

    /// Route one inbound message
    pub async fn handle_inbound(&self, topic: &str, payload: &str) -> Result<()> {
        let report = self
            .services
            .dispatcher
            .dispatch_raw_message(topic, payload)
            .await;
        if let Some(name) = &report.handled_by {
            self.logger
                .debug(&format!("Message on {} handled by {}", topic, name));
            return Ok(());
        }

        let root = &self.services.config.mqtt.topic_root;
        let Some(vin) = topics::vin_from_topic(root, topic) else {
            return Err(BridgeError::validation(
                "topic".to_string(),
                format!("No handler for {}", topic),
            ));
        };
        self.send_to_vehicle(
            vin,
            VehicleCommand::Mqtt {
                topic: topic.to_string(),
                payload: payload.to_string(),
            },
        )
    }

    /// Apply one collaborator event
    pub async fn handle_event(&self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::ChargingDetected { vin } => {
                self.send_to_vehicle(&vin, VehicleCommand::ChargingDetected)?;
                let errors = self
                    .services
                    .dispatcher
                    .notify_charging_detected(&vin)
                    .await;
                for error in errors {
                    self.logger.warn(&format!("{}", error));
                }
                Ok(())
            }
        }
    }

    /// Apply every event queued so far
    pub async fn process_pending_events(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Err(e) = self.handle_event(event).await {
                self.logger.warn(&format!("Event failed: {}", e));
            }
            processed += 1;
        }
        processed
    }

    /// Liveness message on `{root}/internal/lwt`
    pub async fn keepalive(&self) -> Result<()> {
        self.publisher.keepalive().await
    }

    /// Main loop until the inbound channel closes
    pub async fn run(mut self, mut inbound: mpsc::Receiver<(String, String)>) {
        let period = Duration::from_secs(self.services.config.mqtt.keepalive_interval_seconds);
        let mut keepalive = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if let Err(e) = self.keepalive().await {
                        self.logger.warn(&format!("Keepalive failed: {}", e));
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    if let Err(e) = self.handle_event(event).await {
                        self.logger.warn(&format!("Event failed: {}", e));
                    }
                }
                message = inbound.recv() => {
                    let Some((topic, payload)) = message else {
                        break;
                    };
                    if let Err(e) = self.handle_inbound(&topic, &payload).await {
                        self.logger.warn(&format!("Inbound message rejected: {}", e));
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop every vehicle task and announce that the gateway is offline
    pub async fn shutdown(mut self) {
        for (vin, slot) in std::mem::take(&mut self.vehicles) {
            if slot.commands.send(VehicleCommand::Shutdown).is_err() {
                self.logger
                    .debug(&format!("Vehicle task of {} already stopped", vin));
            }
            if let Err(e) = slot.task.await {
                self.logger
                    .error(&format!("Vehicle task of {} panicked: {}", vin, e));
            }
        }

        if let Err(e) = self
            .publisher
            .publish_str(topics::INTERNAL_LWT, topics::LWT_OFFLINE, false)
            .await
        {
            self.logger
                .warn(&format!("Could not publish offline state: {}", e));
        }
        self.logger.info("Gateway stopped");
    }
}
