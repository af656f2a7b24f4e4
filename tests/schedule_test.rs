use evbridge::config::RefreshConfig;
use evbridge::error::BridgeError;
use evbridge::model::{RefreshMode, VehicleActivity};
use evbridge::schedule::{FailureKind, RefreshResult, ScheduleSettings, ScheduleState};
use std::time::Duration;
use tokio::time::Instant;

fn settings() -> ScheduleSettings {
    ScheduleSettings::from(&RefreshConfig {
        active_interval_seconds: 30,
        inactive_interval_seconds: 3_600,
        charging_interval_seconds: 300,
        min_interval_seconds: 30,
        force_interval_seconds: 60,
        force_max_refreshes: 3,
        force_max_duration_seconds: 600,
        max_backoff_seconds: 1_800,
        request_timeout_seconds: 30,
    })
}

const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn starts_periodic_idle_and_due_now() {
    let now = Instant::now();
    let state = ScheduleState::new(settings(), now);
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(3_600)));
    assert_eq!(state.next_refresh_at(), Some(now));
    assert!(state.is_due(now));
}

#[tokio::test(start_paused = true)]
async fn success_picks_interval_from_activity() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);

    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Driving), now);
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(30)));
    assert_eq!(state.next_refresh_at(), Some(now + secs(30)));

    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Charging), now);
    assert_eq!(state.next_refresh_at(), Some(now + secs(300)));
}

#[tokio::test(start_paused = true)]
async fn charging_detected_forces_from_every_mode() {
    for initial in [
        RefreshMode::Off,
        RefreshMode::Force,
        RefreshMode::Periodic(secs(3_600)),
    ] {
        let now = Instant::now();
        let mut state = ScheduleState::new(settings(), now);
        state.set_mode(initial, now).unwrap();
        state.on_refresh_result(RefreshResult::Success(VehicleActivity::Idle), now);

        let later = now + secs(5);
        state.on_charging_detected(later);
        assert_eq!(state.mode(), RefreshMode::Force);
        assert_eq!(state.next_refresh_at(), Some(later));
    }
}

#[tokio::test(start_paused = true)]
async fn force_reverts_after_max_refreshes() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_charging_detected(now);

    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Charging), now);
    assert_eq!(state.mode(), RefreshMode::Force);
    assert_eq!(state.next_refresh_at(), Some(now + secs(60)));

    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Charging), now + secs(60));
    assert_eq!(state.mode(), RefreshMode::Force);

    let third = now + secs(120);
    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Charging), third);
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(300)));
    assert_eq!(state.next_refresh_at(), Some(third + secs(300)));
}

#[tokio::test(start_paused = true)]
async fn force_reverts_after_max_duration() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_charging_detected(now);

    let late = now + secs(601);
    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Idle), late);
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(3_600)));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_exponentially() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Driving), now);

    let mut intervals = Vec::new();
    for _ in 0..7 {
        state.on_refresh_result(RefreshResult::Failure(FailureKind::Transient), now);
        intervals.push(state.current_interval().as_secs());
    }
    assert_eq!(intervals, vec![60, 120, 240, 480, 960, 1_800, 1_800]);
    assert_eq!(state.consecutive_failures(), 7);

    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Driving), now);
    assert_eq!(state.consecutive_failures(), 0);
    assert_eq!(state.current_interval(), secs(30));
}

#[tokio::test(start_paused = true)]
async fn auth_failure_waits_for_the_lock() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);

    let locked_until = now + secs(120);
    state.on_refresh_result(
        RefreshResult::Failure(FailureKind::Auth {
            locked_until: Some(locked_until),
        }),
        now,
    );
    assert_eq!(state.next_refresh_at(), Some(locked_until));
    assert_eq!(state.consecutive_failures(), 0);

    state.on_refresh_result(
        RefreshResult::Failure(FailureKind::Auth { locked_until: None }),
        now,
    );
    assert_eq!(state.next_refresh_at(), Some(now + secs(30)));
}

#[tokio::test(start_paused = true)]
async fn periodic_below_minimum_is_rejected() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);

    let err = state
        .set_mode(RefreshMode::Periodic(secs(10)), now)
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation { .. }));
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(3_600)));

    assert!(
        state
            .set_period(VehicleActivity::Charging, secs(29), now)
            .is_err()
    );
    assert_eq!(state.periods().charging, secs(300));
}

#[tokio::test(start_paused = true)]
async fn periodic_rearms_relative_to_last_refresh() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.set_mode(RefreshMode::Off, now).unwrap();
    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Idle), now);
    assert_eq!(state.next_refresh_at(), None);

    let later = now + secs(100);
    state
        .set_mode(RefreshMode::Periodic(secs(600)), later)
        .unwrap();
    assert_eq!(state.next_refresh_at(), Some(now + secs(600)));

    let much_later = now + secs(10_000);
    state
        .set_mode(RefreshMode::Periodic(secs(600)), much_later)
        .unwrap();
    assert_eq!(state.next_refresh_at(), Some(much_later));
}

#[tokio::test(start_paused = true)]
async fn set_period_of_current_activity_rearms() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Idle), now);

    state
        .set_period(VehicleActivity::Idle, secs(900), now + secs(10))
        .unwrap();
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(900)));
    assert_eq!(state.next_refresh_at(), Some(now + secs(900)));

    state
        .set_period(VehicleActivity::Driving, secs(45), now + secs(10))
        .unwrap();
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(900)));
    assert_eq!(state.periods().active, secs(45));
}

#[tokio::test(start_paused = true)]
async fn oversized_periods_are_rejected() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Idle), now);
    let next = state.next_refresh_at();

    let err = state
        .set_period(VehicleActivity::Idle, secs(u64::MAX), now)
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation { .. }));
    assert!(
        state
            .set_mode(RefreshMode::Periodic(secs(u64::MAX)), now)
            .is_err()
    );
    assert!(
        state
            .set_period(VehicleActivity::Idle, evbridge::schedule::MAX_INTERVAL + secs(1), now)
            .is_err()
    );

    assert_eq!(state.periods().inactive, secs(3_600));
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(3_600)));
    assert_eq!(state.next_refresh_at(), next);

    state
        .set_period(VehicleActivity::Idle, evbridge::schedule::MAX_INTERVAL, now)
        .unwrap();
    assert_eq!(
        state.next_refresh_at(),
        Some(now + evbridge::schedule::MAX_INTERVAL)
    );
}

#[tokio::test(start_paused = true)]
async fn unbounded_configured_period_saturates_the_deadline() {
    let now = Instant::now();
    let mut config = RefreshConfig::default();
    config.inactive_interval_seconds = u64::MAX;
    let mut state = ScheduleState::new(ScheduleSettings::from(&config), now);

    state.on_refresh_result(RefreshResult::Success(VehicleActivity::Idle), now);
    let next = state.next_refresh_at().unwrap();
    assert!(next > now);
    assert!(!state.is_due(now + secs(86_400 * 365)));

    state.on_refresh_result(RefreshResult::Failure(FailureKind::Transient), now);
    assert!(state.next_refresh_at().unwrap() > now);
}

#[tokio::test(start_paused = true)]
async fn force_window_ends_on_failures_too() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_charging_detected(now);
    assert_eq!(state.mode(), RefreshMode::Force);

    let late = now + secs(7_200);
    state.on_refresh_result(RefreshResult::Failure(FailureKind::Transient), late);
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(3_600)));
    // Backoff now grows from the periodic interval, capped by max_backoff
    assert_eq!(state.current_interval(), secs(1_800));

    state.on_charging_detected(late);
    let later = late + secs(601);
    state.on_refresh_result(
        RefreshResult::Failure(FailureKind::Auth { locked_until: None }),
        later,
    );
    assert_eq!(state.mode(), RefreshMode::Periodic(secs(3_600)));
    assert_eq!(state.next_refresh_at(), Some(later + secs(30)));
}

#[tokio::test(start_paused = true)]
async fn failures_inside_the_force_window_keep_forcing() {
    let now = Instant::now();
    let mut state = ScheduleState::new(settings(), now);
    state.on_charging_detected(now);

    state.on_refresh_result(RefreshResult::Failure(FailureKind::Transient), now + secs(60));
    assert_eq!(state.mode(), RefreshMode::Force);
}
