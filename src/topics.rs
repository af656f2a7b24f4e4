//! Topic layout shared by publishing and inbound command routing
//!
//! Published keys are relative to the topic root:
//! `{account}/vehicles/{vin}/{category}/{attribute}`. Inbound commands use the
//! same layout with a trailing `/set`.

use crate::model::VehicleActivity;

pub const SET_SUFFIX: &str = "set";
pub const VEHICLES: &str = "vehicles";

pub const INTERNAL_LWT: &str = "internal/lwt";
pub const LWT_ONLINE: &str = "online";
pub const LWT_OFFLINE: &str = "offline";

pub const INFO: &str = "info";

pub const REFRESH: &str = "refresh";
pub const REFRESH_MODE: &str = "refresh/mode";
pub const REFRESH_PERIOD: &str = "refresh/period";
pub const REFRESH_LAST_ACTIVITY: &str = "refresh/lastActivity";
pub const REFRESH_LAST_VEHICLE_STATE: &str = "refresh/lastVehicleState";
pub const REFRESH_LAST_CHARGE_STATE: &str = "refresh/lastChargeState";
pub const REFRESH_LAST_ERROR: &str = "refresh/lastError";

// Resolved from both sources
pub const DRIVETRAIN_SOC: &str = "drivetrain/soc";
pub const DRIVETRAIN_RANGE: &str = "drivetrain/range";
pub const DRIVETRAIN_HV_BATTERY_ACTIVE: &str = "drivetrain/hvBatteryActive";

// Vehicle status only
pub const DRIVETRAIN_RUNNING: &str = "drivetrain/running";
pub const DRIVETRAIN_MILEAGE: &str = "drivetrain/mileage";
pub const DRIVETRAIN_AUXILIARY_BATTERY_VOLTAGE: &str = "drivetrain/auxiliaryBatteryVoltage";
pub const CLIMATE_INTERIOR_TEMPERATURE: &str = "climate/interiorTemperature";
pub const CLIMATE_EXTERIOR_TEMPERATURE: &str = "climate/exteriorTemperature";
pub const LOCATION_SPEED: &str = "location/speed";
pub const LOCATION_HEADING: &str = "location/heading";
pub const LOCATION_LATITUDE: &str = "location/latitude";
pub const LOCATION_LONGITUDE: &str = "location/longitude";
pub const DOORS_LOCKED: &str = "doors/locked";
pub const DOORS_BOOT: &str = "doors/boot";
pub const TYRES_FRONT_LEFT_PRESSURE: &str = "tyres/frontLeftPressure";
pub const TYRES_FRONT_RIGHT_PRESSURE: &str = "tyres/frontRightPressure";
pub const TYRES_REAR_LEFT_PRESSURE: &str = "tyres/rearLeftPressure";
pub const TYRES_REAR_RIGHT_PRESSURE: &str = "tyres/rearRightPressure";

// Charge status only
pub const DRIVETRAIN_CHARGING: &str = "drivetrain/charging";
pub const DRIVETRAIN_CURRENT: &str = "drivetrain/current";
pub const DRIVETRAIN_VOLTAGE: &str = "drivetrain/voltage";
pub const DRIVETRAIN_POWER: &str = "drivetrain/power";
pub const DRIVETRAIN_CHARGER_CONNECTED: &str = "drivetrain/chargerConnected";
pub const DRIVETRAIN_REMAINING_CHARGING_TIME: &str = "drivetrain/remainingChargingTime";
pub const DRIVETRAIN_SOC_KWH: &str = "drivetrain/soc_kwh";
pub const DRIVETRAIN_MILEAGE_OF_DAY: &str = "drivetrain/mileageOfTheDay";
pub const DRIVETRAIN_MILEAGE_SINCE_LAST_CHARGE: &str = "drivetrain/mileageSinceLastCharge";
pub const DRIVETRAIN_CHARGING_CABLE_LOCK: &str = "drivetrain/chargingCableLock";
pub const DRIVETRAIN_TOTAL_BATTERY_CAPACITY: &str = "drivetrain/totalBatteryCapacity";
pub const BMS_CHARGE_STATUS: &str = "bms/chargeStatus";

/// Replace characters the broker treats specially
pub fn sanitize(topic: &str) -> String {
    topic.replace(['+', '#', '*', '>', '$'], "_")
}

/// Key of the account, relative to the topic root
pub fn account_key(username: &str) -> String {
    sanitize(username)
}

/// Key of one vehicle, relative to the topic root
pub fn vehicle_key(username: &str, vin: &str) -> String {
    format!("{}/{}/{}", account_key(username), VEHICLES, sanitize(vin))
}

/// Topic used to change the refresh period of one activity class
pub fn refresh_period_key(activity: VehicleActivity) -> String {
    format!("{}/{}", REFRESH_PERIOD, activity.period_topic())
}

/// Subscriptions needed to receive every vehicle command of the account
pub fn command_subscriptions(root: &str, username: &str) -> Vec<String> {
    let vehicles = format!("{}/{}/{}", root, account_key(username), VEHICLES);
    vec![
        format!("{}/+/+/+/{}", vehicles, SET_SUFFIX),
        format!("{}/+/+/+/+/{}", vehicles, SET_SUFFIX),
        format!("{}/+/{}/{}", vehicles, REFRESH_MODE, SET_SUFFIX),
        format!("{}/+/{}/+/{}", vehicles, REFRESH_PERIOD, SET_SUFFIX),
    ]
}

/// Vehicle segment of an inbound topic: the third component after the root
pub fn vin_from_topic<'a>(root: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(root)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let _account = parts.next()?;
    if parts.next()? != VEHICLES {
        return None;
    }
    parts.next().filter(|vin| !vin.is_empty())
}

/// What an inbound `.../set` topic asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `refresh/mode/set`
    RefreshMode,
    /// `refresh/period/{activity}/set`
    RefreshPeriod(VehicleActivity),
    /// `refresh/period/{unknown}/set`
    UnknownRefreshPeriod(String),
    /// `{category}/{attribute}[/...]/set`
    Vehicle { category: String, attribute: String },
}

/// A parsed inbound command topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub vin: String,
    pub kind: CommandKind,
}

impl CommandTopic {
    /// Parse `{root}/{account}/vehicles/{vin}/.../set`
    pub fn parse(root: &str, topic: &str) -> Option<Self> {
        let vin = vin_from_topic(root, topic)?.to_string();
        let rest = topic.strip_prefix(root)?.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').skip(3).collect();
        let (last, path) = segments.split_last()?;
        if *last != SET_SUFFIX || path.len() < 2 {
            return None;
        }

        let kind = match path {
            [REFRESH, "mode"] => CommandKind::RefreshMode,
            [REFRESH, "period", segment] => match VehicleActivity::from_period_topic(segment) {
                Some(activity) => CommandKind::RefreshPeriod(activity),
                None => CommandKind::UnknownRefreshPeriod((*segment).to_string()),
            },
            [category, attribute @ ..] => CommandKind::Vehicle {
                category: (*category).to_string(),
                attribute: attribute.join("/"),
            },
            [] => return None,
        };

        Some(Self { vin, kind })
    }
}
