//! Per-vehicle refresh scheduling
//!
//! [`ScheduleState`] decides when the next poll is due. It is a plain state
//! machine driven by the vehicle task with explicit `now` arguments, so it can
//! be exercised without a runtime.

use crate::config::{MAX_INTERVAL_SECONDS, RefreshConfig};
use crate::error::{BridgeError, Result};
use crate::model::{RefreshMode, VehicleActivity};
use std::time::Duration;
use tokio::time::Instant;

/// Longest refresh period accepted from a command
pub const MAX_INTERVAL: Duration = Duration::from_secs(MAX_INTERVAL_SECONDS);

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + after`, saturating to a far-future deadline instead of overflowing
fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Refresh interval per activity class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPeriods {
    pub active: Duration,
    pub inactive: Duration,
    pub charging: Duration,
}

impl RefreshPeriods {
    pub fn for_activity(&self, activity: VehicleActivity) -> Duration {
        match activity {
            VehicleActivity::Driving => self.active,
            VehicleActivity::Charging => self.charging,
            VehicleActivity::Idle => self.inactive,
        }
    }

    fn set(&mut self, activity: VehicleActivity, interval: Duration) {
        match activity {
            VehicleActivity::Driving => self.active = interval,
            VehicleActivity::Charging => self.charging = interval,
            VehicleActivity::Idle => self.inactive = interval,
        }
    }
}

/// Static scheduling parameters
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub periods: RefreshPeriods,
    pub min_interval: Duration,
    pub force_interval: Duration,
    pub force_max_refreshes: u32,
    pub force_max_duration: Duration,
    pub max_backoff: Duration,
}

impl From<&RefreshConfig> for ScheduleSettings {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            periods: RefreshPeriods {
                active: Duration::from_secs(config.active_interval_seconds),
                inactive: Duration::from_secs(config.inactive_interval_seconds),
                charging: Duration::from_secs(config.charging_interval_seconds),
            },
            min_interval: Duration::from_secs(config.min_interval_seconds),
            force_interval: Duration::from_secs(config.force_interval_seconds),
            force_max_refreshes: config.force_max_refreshes,
            force_max_duration: Duration::from_secs(config.force_max_duration_seconds),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
        }
    }
}

/// Why a refresh failed, as far as scheduling is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, timeout, vendor or publish failure
    Transient,
    /// Login failed or locked; retry once the lock clears
    Auth { locked_until: Option<Instant> },
}

/// Outcome of one refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    Success(VehicleActivity),
    Failure(FailureKind),
}

/// Mode and timing state of one vehicle
#[derive(Debug, Clone)]
pub struct ScheduleState {
    mode: RefreshMode,
    next_refresh_at: Option<Instant>,
    current_interval: Duration,
    consecutive_failures: u32,
    last_refresh_at: Option<Instant>,
    last_activity: VehicleActivity,
    force_started_at: Option<Instant>,
    force_successes: u32,
    settings: ScheduleSettings,
}

impl ScheduleState {
    /// Periodic at the idle interval with the first refresh due immediately
    pub fn new(settings: ScheduleSettings, now: Instant) -> Self {
        let interval = settings.periods.inactive;
        Self {
            mode: RefreshMode::Periodic(interval),
            next_refresh_at: Some(now),
            current_interval: interval,
            consecutive_failures: 0,
            last_refresh_at: None,
            last_activity: VehicleActivity::Idle,
            force_started_at: None,
            force_successes: 0,
            settings,
        }
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    pub fn next_refresh_at(&self) -> Option<Instant> {
        self.next_refresh_at
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_activity(&self) -> VehicleActivity {
        self.last_activity
    }

    pub fn periods(&self) -> RefreshPeriods {
        self.settings.periods
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    /// Interval a `periodic` command would select right now
    pub fn periodic_interval(&self) -> Duration {
        self.settings.periods.for_activity(self.last_activity)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_refresh_at.is_some_and(|at| at <= now)
    }

    /// Cancel the pending timer and fire now
    pub fn request_refresh_now(&mut self, now: Instant) {
        self.next_refresh_at = Some(now);
    }

    /// Enter FORCE with fresh counters and fire now
    pub fn on_charging_detected(&mut self, now: Instant) {
        self.enter_force(now);
        self.request_refresh_now(now);
    }

    fn enter_force(&mut self, now: Instant) {
        self.mode = RefreshMode::Force;
        self.force_started_at = Some(now);
        self.force_successes = 0;
        self.current_interval = self.settings.force_interval;
    }

    fn force_expired(&self, now: Instant) -> bool {
        self.force_started_at.is_some_and(|started| {
            now.saturating_duration_since(started) >= self.settings.force_max_duration
        })
    }

    /// Leave FORCE for PERIODIC at the interval of the given activity
    fn leave_force(&mut self, activity: VehicleActivity) {
        let interval = self.settings.periods.for_activity(activity);
        self.mode = RefreshMode::Periodic(interval);
        self.current_interval = interval;
        self.force_started_at = None;
        self.force_successes = 0;
    }

    /// A FORCE window past its maximum duration ends even without successes
    fn expire_force(&mut self, now: Instant) {
        if self.mode == RefreshMode::Force && self.force_expired(now) {
            self.leave_force(self.last_activity);
        }
    }

    fn backoff(&self, base: Duration) -> Duration {
        let exponent = self.consecutive_failures.min(31);
        base.checked_mul(1u32 << exponent)
            .map_or(self.settings.max_backoff, |d| d.min(self.settings.max_backoff))
    }

    /// Advance the state machine after a refresh attempt
    pub fn on_refresh_result(&mut self, result: RefreshResult, now: Instant) {
        self.last_refresh_at = Some(now);

        match result {
            RefreshResult::Success(activity) => {
                self.consecutive_failures = 0;
                self.last_activity = activity;
                match self.mode {
                    RefreshMode::Periodic(_) => {
                        let interval = self.settings.periods.for_activity(activity);
                        self.mode = RefreshMode::Periodic(interval);
                        self.current_interval = interval;
                    }
                    RefreshMode::Force => {
                        self.force_successes = self.force_successes.saturating_add(1);
                        if self.force_successes >= self.settings.force_max_refreshes
                            || self.force_expired(now)
                        {
                            self.leave_force(activity);
                        } else {
                            self.current_interval = self.settings.force_interval;
                        }
                    }
                    RefreshMode::Off => {}
                }
                self.next_refresh_at = match self.mode {
                    RefreshMode::Off => None,
                    _ => Some(deadline(now, self.current_interval)),
                };
            }
            RefreshResult::Failure(FailureKind::Transient) => {
                self.expire_force(now);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let base = match self.mode {
                    RefreshMode::Force => self.settings.force_interval,
                    RefreshMode::Periodic(interval) => interval,
                    RefreshMode::Off => self.current_interval,
                };
                self.current_interval = self.backoff(base);
                self.next_refresh_at = match self.mode {
                    RefreshMode::Off => None,
                    _ => Some(deadline(now, self.current_interval)),
                };
            }
            RefreshResult::Failure(FailureKind::Auth { locked_until }) => {
                self.expire_force(now);
                self.next_refresh_at = match self.mode {
                    RefreshMode::Off => None,
                    _ => Some(
                        locked_until
                            .unwrap_or_else(|| deadline(now, self.settings.min_interval))
                            .max(now),
                    ),
                };
            }
        }
    }

    fn validate_interval(&self, field: String, interval: Duration) -> Result<()> {
        if interval < self.settings.min_interval {
            return Err(BridgeError::validation(
                field,
                format!(
                    "Interval of {}s is below the minimum of {}s",
                    interval.as_secs(),
                    self.settings.min_interval.as_secs()
                ),
            ));
        }
        if interval > MAX_INTERVAL {
            return Err(BridgeError::validation(
                field,
                format!(
                    "Interval of {}s is above the maximum of {}s",
                    interval.as_secs(),
                    MAX_INTERVAL.as_secs()
                ),
            ));
        }
        Ok(())
    }

    /// Change the refresh mode
    pub fn set_mode(&mut self, mode: RefreshMode, now: Instant) -> Result<()> {
        match mode {
            RefreshMode::Off => {
                self.mode = RefreshMode::Off;
                self.next_refresh_at = None;
            }
            RefreshMode::Force => {
                self.enter_force(now);
                self.request_refresh_now(now);
            }
            RefreshMode::Periodic(interval) => {
                self.validate_interval("refresh/mode".to_string(), interval)?;
                self.mode = mode;
                self.current_interval = interval;
                self.force_started_at = None;
                self.force_successes = 0;
                self.next_refresh_at = Some(
                    self.last_refresh_at
                        .map_or(now, |last| deadline(last, interval).max(now)),
                );
            }
        }
        Ok(())
    }

    /// Change the interval of one activity class
    pub fn set_period(
        &mut self,
        activity: VehicleActivity,
        interval: Duration,
        now: Instant,
    ) -> Result<()> {
        self.validate_interval(format!("refresh/period/{}", activity.period_topic()), interval)?;
        self.settings.periods.set(activity, interval);

        if activity == self.last_activity {
            if let RefreshMode::Periodic(_) = self.mode {
                self.mode = RefreshMode::Periodic(interval);
                self.current_interval = interval;
                self.next_refresh_at = Some(
                    self.last_refresh_at
                        .map_or(now, |last| deadline(last, interval).max(now)),
                );
            }
        }
        Ok(())
    }
}
