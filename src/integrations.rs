//! Built-in collaborators

pub mod charging_station;

pub use charging_station::{ChargingStation, ChargingStationIntegration};
