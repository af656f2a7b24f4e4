//! Vehicle identity, refresh modes and activity classes

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Immutable description of a registered vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleIdentity {
    vin: String,
    brand: Option<String>,
    model: Option<String>,
    model_year: Option<String>,
    series: Option<String>,
}

impl VehicleIdentity {
    pub fn new<S: Into<String>>(vin: S) -> Self {
        Self {
            vin: vin.into(),
            brand: None,
            model: None,
            model_year: None,
            series: None,
        }
    }

    pub fn with_brand<S: Into<String>>(mut self, brand: S) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_year<S: Into<String>>(mut self, model_year: S) -> Self {
        self.model_year = Some(model_year.into());
        self
    }

    pub fn with_series<S: Into<String>>(mut self, series: S) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn brand(&self) -> Option<&str> {
        self.brand.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn model_year(&self) -> Option<&str> {
        self.model_year.as_deref()
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    /// Metadata published once per vehicle as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "vin": self.vin,
            "brand": self.brand,
            "model": self.model,
            "modelYear": self.model_year,
            "series": self.series,
        })
    }
}

/// When a vehicle is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Poll as soon as possible until the force budget is spent
    Force,
    /// Never poll until another mode is requested
    Off,
    /// Poll on a fixed interval
    Periodic(Duration),
}

impl RefreshMode {
    /// Parse the textual mode used on the command topics.
    ///
    /// `periodic` carries no interval on the wire, so the caller supplies the
    /// interval that applies to the vehicle's current activity.
    pub fn parse(input: &str, periodic_interval: Duration) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "force" => Ok(Self::Force),
            "off" => Ok(Self::Off),
            "periodic" => Ok(Self::Periodic(periodic_interval)),
            _ => Err(BridgeError::UnknownRefreshMode {
                value: input.to_string(),
            }),
        }
    }

    /// Name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Force => "force",
            Self::Off => "off",
            Self::Periodic(_) => "periodic",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Periodic(interval) => write!(f, "periodic({}s)", interval.as_secs()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What the vehicle was doing during the last refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleActivity {
    Driving,
    Charging,
    #[default]
    Idle,
}

impl VehicleActivity {
    /// Segment of the `refresh/period/{...}` topics
    pub fn period_topic(&self) -> &'static str {
        match self {
            Self::Driving => "active",
            Self::Charging => "charging",
            Self::Idle => "inActive",
        }
    }

    /// Inverse of [`period_topic`](Self::period_topic)
    pub fn from_period_topic(segment: &str) -> Option<Self> {
        match segment {
            "active" => Some(Self::Driving),
            "charging" => Some(Self::Charging),
            "inActive" => Some(Self::Idle),
            _ => None,
        }
    }
}
