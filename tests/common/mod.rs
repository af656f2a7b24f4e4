#![allow(dead_code)]

use evbridge::config::Config;
use evbridge::dispatch::IntegrationDispatcher;
use evbridge::error::{BridgeError, Result};
use evbridge::publisher::Publisher;
use evbridge::reconcile::Reconciler;
use evbridge::relogin::{AuthToken, Authenticator, ReloginHandler};
use evbridge::snapshot::{ChargeSnapshot, StatusSnapshot};
use evbridge::vehicle::{SharedServices, VehicleClient};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const VIN: &str = "LSJA0000000000001";

/// Records every publish; can be switched to fail
#[derive(Default)]
pub struct CapturingPublisher {
    messages: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl CapturingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_for(&self, topic: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
    }

    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl Publisher for CapturingPublisher {
    async fn publish(&self, topic: &str, payload: String, _retain: bool) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::publish("broker unavailable"));
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Login that succeeds unless told otherwise; counts its calls
pub struct StubAuthenticator {
    pub calls: AtomicUsize,
    failures: Mutex<VecDeque<bool>>,
    failing: AtomicBool,
    delay: Duration,
}

impl StubAuthenticator {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Authenticator for StubAuthenticator {
    async fn login(&self) -> Result<AuthToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.failures.lock().unwrap().pop_front();
        if scripted.unwrap_or_else(|| self.failing.load(Ordering::SeqCst)) {
            return Err(BridgeError::auth("bad credentials"));
        }
        Ok(AuthToken::new(
            "token",
            Instant::now() + Duration::from_secs(3_600),
        ))
    }
}

/// How the stub client fails a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Auth,
    Hang,
}

fn make_error(failure: Failure) -> BridgeError {
    match failure {
        Failure::Network => BridgeError::network("connection reset"),
        Failure::Auth => BridgeError::auth("token rejected"),
        Failure::Hang => BridgeError::api("unreachable"),
    }
}

/// Vendor client serving fixed snapshots
#[derive(Default)]
pub struct StubClient {
    status: Mutex<Option<StatusSnapshot>>,
    charge: Mutex<Option<ChargeSnapshot>>,
    status_failure: Mutex<Option<Failure>>,
    charge_failure: Mutex<Option<Failure>>,
    pub fetches: AtomicUsize,
    pub commands: Mutex<Vec<(String, String, String)>>,
}

impl StubClient {
    pub fn new(status: Option<StatusSnapshot>, charge: Option<ChargeSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            charge: Mutex::new(charge),
            ..Self::default()
        })
    }

    pub fn set_status(&self, status: Option<StatusSnapshot>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_charge(&self, charge: Option<ChargeSnapshot>) {
        *self.charge.lock().unwrap() = charge;
    }

    pub fn fail_status(&self, failure: Option<Failure>) {
        *self.status_failure.lock().unwrap() = failure;
    }

    pub fn fail_charge(&self, failure: Option<Failure>) {
        *self.charge_failure.lock().unwrap() = failure;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VehicleClient for StubClient {
    async fn fetch_status(&self, _token: &AuthToken, _vin: &str) -> Result<StatusSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failure = *self.status_failure.lock().unwrap();
        match failure {
            Some(Failure::Hang) => std::future::pending().await,
            Some(f) => Err(make_error(f)),
            None => self
                .status
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| BridgeError::api("no status")),
        }
    }

    async fn fetch_charge_status(&self, _token: &AuthToken, _vin: &str) -> Result<ChargeSnapshot> {
        let failure = *self.charge_failure.lock().unwrap();
        match failure {
            Some(Failure::Hang) => std::future::pending().await,
            Some(f) => Err(make_error(f)),
            None => self
                .charge
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| BridgeError::api("no charge status")),
        }
    }

    async fn send_command(
        &self,
        _token: &AuthToken,
        _vin: &str,
        category: &str,
        attribute: &str,
        payload: &str,
    ) -> Result<()> {
        self.commands.lock().unwrap().push((
            category.to_string(),
            attribute.to_string(),
            payload.to_string(),
        ));
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.account.username = "user".to_string();
    config
}

pub fn services(
    config: Config,
    transport: Arc<dyn Publisher>,
    authenticator: Arc<dyn Authenticator>,
    client: Arc<dyn VehicleClient>,
    dispatcher: IntegrationDispatcher,
) -> SharedServices {
    SharedServices {
        relogin: Arc::new(ReloginHandler::new(authenticator, &config.relogin)),
        reconciler: Arc::new(Reconciler::new(&config.reconcile).unwrap()),
        config: Arc::new(config),
        transport,
        client,
        dispatcher: Arc::new(dispatcher),
        persistence: None,
    }
}

/// Topic of a vehicle sub-key under the default test layout
pub fn vehicle_topic(sub: &str) -> String {
    format!("saic/user/vehicles/{}/{}", VIN, sub)
}
