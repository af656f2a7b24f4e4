//! Fan-out to downstream collaborators
//!
//! Collaborators implement [`Integration`] and are called in registration
//! order. A failing collaborator is logged and skipped; it never stops the
//! others or the refresh cycle that triggered the call.

use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::snapshot::{ChargeSnapshot, StatusSnapshot};
use std::sync::Arc;

/// What a collaborator did with a call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntegrationOutcome {
    pub handled: bool,
    pub diagnostic: Option<String>,
}

impl IntegrationOutcome {
    pub fn handled() -> Self {
        Self {
            handled: true,
            diagnostic: None,
        }
    }

    pub fn ignored() -> Self {
        Self::default()
    }

    pub fn unsupported() -> Self {
        Self {
            handled: false,
            diagnostic: Some("Not supported".to_string()),
        }
    }

    pub fn with_diagnostic<S: Into<String>>(mut self, diagnostic: S) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// Downstream collaborator notified by the gateway
#[async_trait::async_trait]
pub trait Integration: Send + Sync {
    /// Name used in logs and error reports
    fn name(&self) -> &str;

    /// Called after every completed refresh of a vehicle
    async fn handle_full_refresh(
        &self,
        _vin: &str,
        _status: Option<&StatusSnapshot>,
        _charge: Option<&ChargeSnapshot>,
    ) -> Result<IntegrationOutcome> {
        Ok(IntegrationOutcome::unsupported())
    }

    /// Called for every inbound message on a subscribed topic
    async fn handle_raw_message(&self, _topic: &str, _payload: &str) -> Result<IntegrationOutcome> {
        Ok(IntegrationOutcome::unsupported())
    }

    /// Called for vehicle commands before they reach the vendor client
    async fn handle_command(
        &self,
        _vin: &str,
        _topic: &str,
        _payload: &str,
    ) -> Result<IntegrationOutcome> {
        Ok(IntegrationOutcome::unsupported())
    }

    /// Called once a vehicle has been switched to FORCE after charging started
    async fn handle_charging_detected(&self, _vin: &str) -> Result<()> {
        Ok(())
    }

    /// Extra topics the gateway must subscribe to on this collaborator's behalf
    fn additional_topics(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether a handled raw message stops dispatch to later collaborators
    fn exclusive(&self) -> bool {
        false
    }
}

/// Result of one fan-out
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// First collaborator that reported `handled`
    pub handled_by: Option<String>,
    /// Collaborators that failed, with their errors
    pub errors: Vec<BridgeError>,
}

impl DispatchReport {
    pub fn handled(&self) -> bool {
        self.handled_by.is_some()
    }
}

/// Ordered set of collaborators
pub struct IntegrationDispatcher {
    integrations: Vec<Arc<dyn Integration>>,
    logger: StructuredLogger,
}

impl Default for IntegrationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IntegrationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.integrations.iter().map(|i| i.name().to_string()))
            .finish()
    }
}

impl IntegrationDispatcher {
    pub fn new() -> Self {
        Self {
            integrations: Vec::new(),
            logger: get_logger("dispatch"),
        }
    }

    /// Append a collaborator; registration order is call order
    pub fn register(&mut self, integration: Arc<dyn Integration>) {
        self.logger
            .info(&format!("Registered integration {}", integration.name()));
        self.integrations.push(integration);
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Topics requested by every collaborator
    pub fn additional_topics(&self) -> Vec<String> {
        self.integrations
            .iter()
            .flat_map(|i| i.additional_topics())
            .collect()
    }

    fn record(
        &self,
        report: &mut DispatchReport,
        integration: &dyn Integration,
        what: &str,
        result: Result<IntegrationOutcome>,
    ) -> bool {
        match result {
            Ok(outcome) => {
                if let Some(diagnostic) = &outcome.diagnostic {
                    self.logger.trace(&format!(
                        "{} {}: {}",
                        integration.name(),
                        what,
                        diagnostic
                    ));
                }
                if outcome.handled && report.handled_by.is_none() {
                    report.handled_by = Some(integration.name().to_string());
                }
                outcome.handled
            }
            Err(e) => {
                report.errors.push(self.failed(integration, what, e));
                false
            }
        }
    }

    fn failed(
        &self,
        integration: &dyn Integration,
        what: &str,
        error: BridgeError,
    ) -> BridgeError {
        self.logger.error(&format!(
            "Integration {} failed on {}: {}",
            integration.name(),
            what,
            error
        ));
        BridgeError::integration(integration.name().to_string(), error.to_string())
    }

    /// Notify every collaborator that a refresh completed
    pub async fn dispatch_full_refresh(
        &self,
        vin: &str,
        status: Option<&StatusSnapshot>,
        charge: Option<&ChargeSnapshot>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for integration in &self.integrations {
            let result = integration.handle_full_refresh(vin, status, charge).await;
            self.record(&mut report, integration.as_ref(), "full refresh", result);
        }
        report
    }

    /// Offer an inbound message to the collaborators
    pub async fn dispatch_raw_message(&self, topic: &str, payload: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        for integration in &self.integrations {
            let result = integration.handle_raw_message(topic, payload).await;
            let handled = self.record(&mut report, integration.as_ref(), "raw message", result);
            if handled && integration.exclusive() {
                break;
            }
        }
        report
    }

    /// Offer a vehicle command; stops at the first collaborator that handles it
    pub async fn dispatch_command(&self, vin: &str, topic: &str, payload: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        for integration in &self.integrations {
            let result = integration.handle_command(vin, topic, payload).await;
            if self.record(&mut report, integration.as_ref(), "command", result) {
                break;
            }
        }
        report
    }

    /// Broadcast that a vehicle was switched to FORCE after charging started
    ///
    /// Every collaborator is notified; the failures are returned.
    pub async fn notify_charging_detected(&self, vin: &str) -> Vec<BridgeError> {
        let mut errors = Vec::new();
        for integration in &self.integrations {
            if let Err(e) = integration.handle_charging_detected(vin).await {
                errors.push(self.failed(integration.as_ref(), "charging detected", e));
            }
        }
        errors
    }
}
