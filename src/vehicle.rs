//! Per-vehicle refresh orchestration
//!
//! A [`VehicleHandler`] owns the schedule and the canonical state of one
//! vehicle. It runs as its own task: it sleeps until the next refresh is due
//! or a command arrives, and it handles both inline so refreshes of one
//! vehicle never overlap.

use crate::config::Config;
use crate::dispatch::IntegrationDispatcher;
use crate::error::{BridgeError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::model::{RefreshMode, VehicleActivity, VehicleIdentity};
use crate::persistence::{PersistenceManager, VehicleRefreshState};
use crate::publisher::{DedupPublisher, Publisher, TopicValue};
use crate::reconcile::Reconciler;
use crate::relogin::{AuthToken, ReloginHandler};
use crate::schedule::{FailureKind, RefreshResult, ScheduleSettings, ScheduleState};
use crate::snapshot::{ChargeSnapshot, StatusSnapshot};
use crate::topics::{self, CommandKind, CommandTopic};
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Vendor API used to read telemetry and send remote commands
#[async_trait::async_trait]
pub trait VehicleClient: Send + Sync {
    async fn fetch_status(&self, token: &AuthToken, vin: &str) -> Result<StatusSnapshot>;

    async fn fetch_charge_status(&self, token: &AuthToken, vin: &str) -> Result<ChargeSnapshot>;

    /// Remote command such as `doors/locked` or `climate/remoteClimateState`
    async fn send_command(
        &self,
        _token: &AuthToken,
        _vin: &str,
        category: &str,
        attribute: &str,
        _payload: &str,
    ) -> Result<()> {
        Err(BridgeError::unsupported(format!(
            "Command {}/{} not supported by this client",
            category, attribute
        )))
    }
}

/// Messages accepted by a running vehicle task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VehicleCommand {
    /// Inbound `.../set` message addressed to this vehicle
    Mqtt { topic: String, payload: String },
    /// A collaborator saw the vehicle start charging
    ChargingDetected,
    Shutdown,
}

/// Services shared by every vehicle of the account
#[derive(Clone)]
pub struct SharedServices {
    pub config: Arc<Config>,
    pub transport: Arc<dyn Publisher>,
    pub relogin: Arc<ReloginHandler>,
    pub client: Arc<dyn VehicleClient>,
    pub dispatcher: Arc<IntegrationDispatcher>,
    pub reconciler: Arc<Reconciler>,
    pub persistence: Option<Arc<Mutex<PersistenceManager>>>,
}

/// Orchestrator of one vehicle
pub struct VehicleHandler {
    identity: VehicleIdentity,
    key: String,
    schedule: ScheduleState,
    publisher: DedupPublisher,
    services: SharedServices,
    request_timeout: Duration,
    logger: StructuredLogger,
}

async fn sleep_until_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

impl VehicleHandler {
    /// Build a handler, restoring persisted refresh settings if any
    pub fn new(identity: VehicleIdentity, services: SharedServices, now: Instant) -> Self {
        let config = services.config.clone();
        let logger =
            get_logger_with_context(LogContext::new("vehicle").with_vin(identity.vin()));
        let mut schedule = ScheduleState::new(ScheduleSettings::from(&config.refresh), now);

        if let Some(persistence) = &services.persistence {
            let stored = match persistence.lock() {
                Ok(guard) => guard.vehicle(identity.vin()).cloned(),
                Err(poisoned) => poisoned.into_inner().vehicle(identity.vin()).cloned(),
            };
            if let Some(stored) = stored {
                match stored.apply(&mut schedule, now) {
                    Ok(()) => logger.info(&format!(
                        "Restored refresh settings, mode {}",
                        schedule.mode()
                    )),
                    Err(e) => logger.warn(&format!("Ignoring stored refresh settings: {}", e)),
                }
            }
        }

        Self {
            key: topics::vehicle_key(&config.account.username, identity.vin()),
            publisher: DedupPublisher::new(services.transport.clone(), &config.mqtt)
                .with_logger(logger.clone()),
            request_timeout: Duration::from_secs(config.refresh.request_timeout_seconds),
            identity,
            schedule,
            services,
            logger,
        }
    }

    pub fn vin(&self) -> &str {
        self.identity.vin()
    }

    pub fn identity(&self) -> &VehicleIdentity {
        &self.identity
    }

    pub fn schedule(&self) -> &ScheduleState {
        &self.schedule
    }

    pub fn publisher(&self) -> &DedupPublisher {
        &self.publisher
    }

    /// Key of a vehicle sub-topic, relative to the topic root
    pub fn key_for(&self, sub: &str) -> String {
        format!("{}/{}", self.key, sub)
    }

    async fn publish_quietly(&mut self, sub: &str, value: TopicValue) {
        let key = self.key_for(sub);
        if let Err(e) = self.publisher.publish_value(&key, value, false).await {
            self.logger
                .warn(&format!("Could not publish {}: {}", key, e));
        }
    }

    async fn publish_last_error(&mut self, error: &BridgeError) {
        self.publish_quietly(topics::REFRESH_LAST_ERROR, TopicValue::Str(error.to_string()))
            .await;
    }

    /// Vehicle metadata and the current refresh settings
    pub async fn publish_info(&mut self) {
        let info = self.identity.to_json();
        self.publish_quietly(topics::INFO, TopicValue::Json(info))
            .await;
        self.publish_refresh_state().await;
    }

    async fn publish_refresh_state(&mut self) {
        let mode = self.schedule.mode().as_str().to_string();
        self.publish_quietly(topics::REFRESH_MODE, TopicValue::Str(mode))
            .await;
        let periods = self.schedule.periods();
        for activity in [
            VehicleActivity::Driving,
            VehicleActivity::Idle,
            VehicleActivity::Charging,
        ] {
            let seconds = periods.for_activity(activity).as_secs();
            self.publish_quietly(
                &topics::refresh_period_key(activity),
                TopicValue::Int(i64::try_from(seconds).unwrap_or(i64::MAX)),
            )
            .await;
        }
    }

    fn persist(&self) {
        let Some(persistence) = &self.services.persistence else {
            return;
        };
        let state = VehicleRefreshState::capture(&self.schedule);
        let mut manager = match persistence.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = manager.set_vehicle(self.identity.vin(), state) {
            self.logger
                .error(&format!("Failed to persist refresh settings: {}", e));
        }
    }

    async fn with_timeout<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::timeout(format!(
                "{} did not answer within {}s",
                what,
                self.request_timeout.as_secs()
            ))),
        }
    }

    /// Run one refresh cycle and advance the schedule
    pub async fn refresh(&mut self) -> RefreshResult {
        let refresh_id = uuid::Uuid::new_v4().to_string();
        let logger = self.logger.for_refresh(refresh_id);
        logger.debug(&format!("Refreshing in mode {}", self.schedule.mode()));

        let result = self.run_refresh(&logger).await;
        self.schedule.on_refresh_result(result, Instant::now());

        match result {
            RefreshResult::Success(activity) => logger.info(&format!(
                "Refresh done, vehicle {:?}, next in {}s",
                activity,
                self.schedule.current_interval().as_secs()
            )),
            RefreshResult::Failure(kind) => logger.warn(&format!(
                "Refresh failed ({:?}), {} consecutive failures",
                kind,
                self.schedule.consecutive_failures()
            )),
        }

        self.publish_refresh_state().await;
        result
    }

    async fn run_refresh(&mut self, logger: &StructuredLogger) -> RefreshResult {
        let token = match self.services.relogin.acquire_token().await {
            Ok(token) => token,
            Err(e) => {
                logger.warn(&format!("No token: {}", e));
                self.publish_last_error(&e).await;
                return RefreshResult::Failure(FailureKind::Auth {
                    locked_until: e.locked_until(),
                });
            }
        };

        let client = self.services.client.clone();
        let vin = self.identity.vin().to_string();
        let status = self
            .with_timeout("Vehicle status", client.fetch_status(&token, &vin))
            .await;
        let charge = self
            .with_timeout("Charge status", client.fetch_charge_status(&token, &vin))
            .await;

        let rejected = [status.as_ref().err(), charge.as_ref().err()]
            .into_iter()
            .flatten()
            .find(|e| e.is_auth());
        if let Some(e) = rejected {
            logger.warn(&format!("Token rejected: {}", e));
            let message = e.to_string();
            self.services.relogin.invalidate().await;
            self.publish_last_error(&BridgeError::auth(message)).await;
            return RefreshResult::Failure(FailureKind::Auth { locked_until: None });
        }

        let (status, status_error) = match status {
            Ok(snapshot) => (Some(snapshot), None),
            Err(e) => (None, Some(e)),
        };
        let (charge, charge_error) = match charge {
            Ok(snapshot) => (Some(snapshot), None),
            Err(e) => (None, Some(e)),
        };

        if status.is_none() && charge.is_none() {
            if let Some(e) = status_error.as_ref().or(charge_error.as_ref()) {
                logger.warn(&format!("Nothing fetched: {}", e));
                self.publish_last_error(e).await;
            }
            return RefreshResult::Failure(FailureKind::Transient);
        }

        let mut failed = false;
        for error in [&status_error, &charge_error].into_iter().flatten() {
            logger.warn(&format!("Partial refresh: {}", error));
            self.publish_last_error(error).await;
            failed = true;
        }

        if let Some(snapshot) = &status {
            self.publish_quietly(
                topics::REFRESH_LAST_VEHICLE_STATE,
                TopicValue::Str(snapshot.taken_at().to_rfc3339()),
            )
            .await;
        }
        if let Some(snapshot) = &charge {
            self.publish_quietly(
                topics::REFRESH_LAST_CHARGE_STATE,
                TopicValue::Str(snapshot.taken_at().to_rfc3339()),
            )
            .await;
        }

        let reconciler = self.services.reconciler.clone();
        let updates = reconciler.reconcile(status.as_ref(), charge.as_ref());
        let mut hv_active = false;
        for update in updates {
            if update.key == topics::DRIVETRAIN_HV_BATTERY_ACTIVE {
                hv_active = update.value == TopicValue::Bool(true);
            }
            let key = self.key_for(update.key);
            if let Err(e) = self.publisher.publish_value(&key, update.value, false).await {
                logger.warn(&format!("Publishing {} failed: {}", key, e));
                failed = true;
            }
        }

        let activity = reconciler.classify_activity(status.as_ref(), charge.as_ref());
        if hv_active || activity != VehicleActivity::Idle {
            self.publish_quietly(
                topics::REFRESH_LAST_ACTIVITY,
                TopicValue::Str(Utc::now().to_rfc3339()),
            )
            .await;
        }

        let report = self
            .services
            .dispatcher
            .dispatch_full_refresh(&vin, status.as_ref(), charge.as_ref())
            .await;
        for error in &report.errors {
            logger.warn(&format!("Collaborator error after refresh: {}", error));
        }

        if failed {
            RefreshResult::Failure(FailureKind::Transient)
        } else {
            RefreshResult::Success(activity)
        }
    }

    /// Switch to FORCE and refresh as soon as possible
    pub async fn on_charging_detected(&mut self) {
        self.logger
            .info("Charging detected, switching to force refresh");
        self.schedule.on_charging_detected(Instant::now());
        self.publish_refresh_state().await;
    }

    /// Apply one inbound `.../set` message
    pub async fn handle_command(&mut self, topic: &str, payload: &str) -> Result<()> {
        let root = self.publisher.topic_root().to_string();
        let command = CommandTopic::parse(&root, topic)
            .ok_or_else(|| BridgeError::validation("topic", "Not a vehicle command topic"))?;
        if command.vin != self.identity.vin() {
            return Err(BridgeError::validation(
                "topic".to_string(),
                format!("Command for {} routed to {}", command.vin, self.identity.vin()),
            ));
        }

        let now = Instant::now();
        match command.kind {
            CommandKind::RefreshMode => {
                let mode = RefreshMode::parse(payload, self.schedule.periodic_interval())?;
                self.schedule.set_mode(mode, now)?;
                self.logger.info(&format!("Refresh mode set to {}", mode));
                self.persist();
                self.publish_refresh_state().await;
            }
            CommandKind::RefreshPeriod(activity) => {
                let seconds: u64 = payload.trim().parse().map_err(|_| {
                    BridgeError::validation(
                        topics::refresh_period_key(activity),
                        format!("Not a number of seconds: {}", payload),
                    )
                })?;
                self.schedule
                    .set_period(activity, Duration::from_secs(seconds), now)?;
                self.logger.info(&format!(
                    "Refresh period {} set to {}s",
                    activity.period_topic(),
                    seconds
                ));
                self.persist();
                self.publish_refresh_state().await;
            }
            CommandKind::UnknownRefreshPeriod(segment) => {
                return Err(BridgeError::validation(
                    "refresh/period".to_string(),
                    format!("Unknown refresh period {}", segment),
                ));
            }
            CommandKind::Vehicle {
                category,
                attribute,
            } => {
                let report = self
                    .services
                    .dispatcher
                    .dispatch_command(self.identity.vin(), topic, payload)
                    .await;
                if let Some(name) = &report.handled_by {
                    self.logger
                        .info(&format!("Command {}/{} handled by {}", category, attribute, name));
                } else {
                    let token = self.services.relogin.acquire_token().await?;
                    let client = self.services.client.clone();
                    let vin = self.identity.vin().to_string();
                    if let Err(e) = self
                        .with_timeout(
                            "Remote command",
                            client.send_command(&token, &vin, &category, &attribute, payload),
                        )
                        .await
                    {
                        if e.is_auth() {
                            self.services.relogin.invalidate().await;
                        }
                        return Err(e);
                    }
                    self.logger
                        .info(&format!("Command {}/{} sent", category, attribute));
                }
                self.schedule.set_mode(RefreshMode::Force, now)?;
                self.publish_refresh_state().await;
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, command: VehicleCommand) -> bool {
        match command {
            VehicleCommand::Mqtt { topic, payload } => {
                if let Err(e) = self.handle_command(&topic, &payload).await {
                    self.logger
                        .warn(&format!("Command on {} failed: {}", topic, e));
                    self.publish_last_error(&e).await;
                }
                true
            }
            VehicleCommand::ChargingDetected => {
                self.on_charging_detected().await;
                true
            }
            VehicleCommand::Shutdown => false,
        }
    }

    /// Task body: refresh when due, apply commands as they arrive
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<VehicleCommand>) {
        self.publish_info().await;
        loop {
            let next = self.schedule.next_refresh_at();
            tokio::select! {
                () = sleep_until_due(next) => {
                    self.refresh().await;
                }
                command = commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.on_command(command).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }
        self.logger.info("Vehicle task stopped");
    }
}
