//! Shared authentication with single-flight login and lockout backoff
//!
//! Every vehicle of an account asks the same [`ReloginHandler`] for a token.
//! The session mutex is held across the login call, so a burst of callers
//! produces one login and all of them observe its outcome. The login is
//! bounded by `login_timeout`; a login that never answers locks like a
//! failed one.

use crate::config::ReloginConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bearer token returned by the vendor login
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    expires_at: Instant,
}

impl AuthToken {
    pub fn new<S: Into<String>>(value: S, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Expired, or expiring within `margin`
    pub fn is_expired(&self, now: Instant, margin: Duration) -> bool {
        now.checked_add(margin)
            .is_none_or(|horizon| horizon >= self.expires_at)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Performs the actual vendor login
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<AuthToken>;
}

/// Mutable login state guarded by the handler's mutex
#[derive(Debug, Default)]
pub struct AuthSession {
    token: Option<AuthToken>,
    consecutive_failures: u32,
    locked_until: Option<Instant>,
}

/// Backoff parameters in runtime form
#[derive(Debug, Clone, Copy)]
pub struct ReloginSettings {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub expiry_margin: Duration,
    pub login_timeout: Duration,
}

impl From<&ReloginConfig> for ReloginSettings {
    fn from(config: &ReloginConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_seconds),
            max_delay: Duration::from_secs(config.max_delay_seconds),
            expiry_margin: Duration::from_secs(config.expiry_margin_seconds),
            login_timeout: Duration::from_secs(config.login_timeout_seconds),
        }
    }
}

impl ReloginSettings {
    /// `initial * 2^(failures-1)`, capped at `max_delay`
    pub fn lock_duration(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Token cache shared by all vehicles of one account
pub struct ReloginHandler {
    authenticator: Arc<dyn Authenticator>,
    session: Mutex<AuthSession>,
    settings: ReloginSettings,
    logger: StructuredLogger,
}

impl fmt::Debug for ReloginHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloginHandler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ReloginHandler {
    pub fn new(authenticator: Arc<dyn Authenticator>, config: &ReloginConfig) -> Self {
        Self {
            authenticator,
            session: Mutex::new(AuthSession::default()),
            settings: ReloginSettings::from(config),
            logger: get_logger("relogin"),
        }
    }

    /// Return a valid token, logging in when needed.
    ///
    /// Fails fast with [`BridgeError::AuthLocked`] while a lock is active.
    pub async fn acquire_token(&self) -> Result<AuthToken> {
        let mut session = self.session.lock().await;
        let now = Instant::now();

        if let Some(token) = &session.token {
            if !token.is_expired(now, self.settings.expiry_margin) {
                return Ok(token.clone());
            }
            self.logger.debug("Cached token expired");
            session.token = None;
        }

        if let Some(until) = session.locked_until {
            if now < until {
                return Err(BridgeError::auth_locked(
                    format!(
                        "Login locked for another {}s after {} failures",
                        (until - now).as_secs(),
                        session.consecutive_failures
                    ),
                    until,
                ));
            }
        }

        let login = tokio::time::timeout(self.settings.login_timeout, self.authenticator.login())
            .await
            .unwrap_or_else(|_| {
                Err(BridgeError::timeout(format!(
                    "Login did not answer within {}s",
                    self.settings.login_timeout.as_secs()
                )))
            });

        match login {
            Ok(token) => {
                if session.consecutive_failures > 0 {
                    self.logger.info(&format!(
                        "Login succeeded after {} failures",
                        session.consecutive_failures
                    ));
                } else {
                    self.logger.info("Login succeeded");
                }
                session.consecutive_failures = 0;
                session.locked_until = None;
                session.token = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                session.consecutive_failures = session.consecutive_failures.saturating_add(1);
                let lock = self.settings.lock_duration(session.consecutive_failures);
                let now = Instant::now();
                let until = now.checked_add(lock).unwrap_or(now);
                session.locked_until = Some(until);
                self.logger.warn(&format!(
                    "Login failed ({} in a row), locked for {}s: {}",
                    session.consecutive_failures,
                    lock.as_secs(),
                    e
                ));
                Err(BridgeError::auth_locked(e.to_string(), until))
            }
        }
    }

    /// Drop the cached token after the vendor rejected it
    pub async fn invalidate(&self) {
        let mut session = self.session.lock().await;
        if session.token.take().is_some() {
            self.logger.info("Cached token invalidated");
        }
    }

    pub async fn locked_until(&self) -> Option<Instant> {
        self.session.lock().await.locked_until
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.session.lock().await.consecutive_failures
    }
}
