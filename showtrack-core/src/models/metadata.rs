use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::ValidationError;

/// Conditions recorded alongside an entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Weather {
    pub temperature_f: Option<f64>,
    pub condition: Option<String>,
    pub humidity_pct: Option<f64>,
}

/// Where an entry was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// Structured metadata with an open bag for fields this version doesn't know.
///
/// Unknown keys land in `extra` and are written back unchanged, so newer
/// clients and the backend can add fields without breaking older ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    pub fn with_weather(mut self, weather: Weather) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.weather.is_none() && self.location.is_none() && self.extra.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(weather) = &self.weather {
            if let Some(humidity) = weather.humidity_pct {
                if !(0.0..=100.0).contains(&humidity) {
                    return Err(ValidationError::new(
                        "metadata.weather.humidity_pct",
                        "must be between 0 and 100",
                    ));
                }
            }
        }
        if let Some(location) = &self.location {
            if !(-90.0..=90.0).contains(&location.latitude) {
                return Err(ValidationError::new(
                    "metadata.location.latitude",
                    "must be between -90 and 90",
                ));
            }
            if !(-180.0..=180.0).contains(&location.longitude) {
                return Err(ValidationError::new(
                    "metadata.location.longitude",
                    "must be between -180 and 180",
                ));
            }
        }
        Ok(())
    }
}
