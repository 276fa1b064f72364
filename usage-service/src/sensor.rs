use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use usage_client::domain::{DailyAggregate, DOMAIN, UNIT_KILO_WATT_HOUR};

use crate::{
    coordinator::UpdateCoordinator,
    setup::{ConfigEntry, DEVICE_CONFIG_URL, DEVICE_MANUFACTURER, DEVICE_MODEL},
    sinks::StatisticsSink,
};
use usage_client::api::UsageApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Energy,
}

/// Only `total` is used: the values are window totals recomputed every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Total,
}

/// Static description of one sensor.
#[derive(Debug, Clone, Copy)]
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    /// Field of `DailyAggregate` the value is read from.
    pub data_key: &'static str,
}

pub const SENSORS: [SensorDescription; 5] = [
    SensorDescription {
        key: "total_kwh",
        name: "Total Usage",
        data_key: "total_kwh",
    },
    SensorDescription {
        key: "on_peak_usage",
        name: "On Peak Usage",
        data_key: "on_peak_kwh_total",
    },
    SensorDescription {
        key: "off_peak_usage",
        name: "Off Peak Usage",
        data_key: "off_peak_kwh_total",
    },
    SensorDescription {
        key: "shoulder_usage",
        name: "Shoulder Usage",
        data_key: "shoulder_kwh_total",
    },
    SensorDescription {
        key: "super_off_peak_usage",
        name: "Super Off Peak Usage",
        data_key: "super_off_peak_kwh_total",
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub configuration_url: &'static str,
}

#[derive(Debug, Clone)]
pub struct EnergySensor {
    pub key: &'static str,
    pub unique_id: String,
    pub entity_id: String,
    pub name: &'static str,
    data_key: &'static str,
}

impl EnergySensor {
    pub fn new(entry: &ConfigEntry, description: &SensorDescription) -> Self {
        Self {
            key: description.key,
            unique_id: format!("{}_{}", entry.entry_id, description.key),
            entity_id: format!("sensor.{DOMAIN}_{}", description.key),
            name: description.name,
            data_key: description.data_key,
        }
    }

    /// Value from the latest aggregate; `None` means unknown.
    pub fn native_value(&self, snapshot: Option<&DailyAggregate>) -> Option<f64> {
        snapshot.and_then(|agg| agg.get(self.data_key))
    }
}

/// Read-only view of one sensor at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    pub entity_id: String,
    pub unique_id: String,
    pub name: &'static str,
    pub state: Option<f64>,
    pub available: bool,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
    pub unit_of_measurement: &'static str,
}

/// What sensors need from the coordinator.
pub trait AggregateSource: Send + Sync {
    fn latest(&self) -> Option<DailyAggregate>;
    fn last_update_success(&self) -> bool;
    fn subscribe(&self) -> watch::Receiver<Option<DailyAggregate>>;
}

impl<A, K> AggregateSource for UpdateCoordinator<A, K>
where
    A: UsageApi + 'static,
    K: StatisticsSink + 'static,
{
    fn latest(&self) -> Option<DailyAggregate> {
        UpdateCoordinator::latest(self)
    }

    fn last_update_success(&self) -> bool {
        UpdateCoordinator::last_update_success(self)
    }

    fn subscribe(&self) -> watch::Receiver<Option<DailyAggregate>> {
        UpdateCoordinator::subscribe(self)
    }
}

/// The five sensors of one config entry, bound to its coordinator.
pub struct SensorSet {
    pub device: DeviceInfo,
    sensors: Vec<EnergySensor>,
    source: Arc<dyn AggregateSource>,
}

impl SensorSet {
    pub fn new(entry: &ConfigEntry, source: Arc<dyn AggregateSource>) -> Self {
        Self {
            device: DeviceInfo {
                identifier: entry.entry_id.clone(),
                name: entry.name.clone(),
                manufacturer: DEVICE_MANUFACTURER,
                model: DEVICE_MODEL,
                configuration_url: DEVICE_CONFIG_URL,
            },
            sensors: SENSORS.iter().map(|d| EnergySensor::new(entry, d)).collect(),
            source,
        }
    }

    pub fn sensors(&self) -> &[EnergySensor] {
        &self.sensors
    }

    pub fn aggregate(&self) -> Option<DailyAggregate> {
        self.source.latest()
    }

    fn read(&self, sensor: &EnergySensor, snapshot: Option<&DailyAggregate>) -> SensorState {
        SensorState {
            entity_id: sensor.entity_id.clone(),
            unique_id: sensor.unique_id.clone(),
            name: sensor.name,
            state: sensor.native_value(snapshot),
            available: self.source.last_update_success(),
            device_class: DeviceClass::Energy,
            state_class: StateClass::Total,
            unit_of_measurement: UNIT_KILO_WATT_HOUR,
        }
    }

    pub fn states(&self) -> Vec<SensorState> {
        let snapshot = self.source.latest();
        self.sensors
            .iter()
            .map(|s| self.read(s, snapshot.as_ref()))
            .collect()
    }

    /// State of the sensor with key `key`, e.g. `on_peak_usage`.
    pub fn state(&self, key: &str) -> Option<SensorState> {
        let snapshot = self.source.latest();
        self.sensors
            .iter()
            .find(|s| s.key == key)
            .map(|s| self.read(s, snapshot.as_ref()))
    }

    /// Log every sensor's new value each time the coordinator publishes.
    pub fn spawn_update_logger(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = this.source.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                for sensor in &this.sensors {
                    tracing::info!(
                        entity_id = %sensor.entity_id,
                        state = ?sensor.native_value(snapshot.as_ref()),
                        "sensor updated"
                    );
                }
            }
        })
    }
}
