//! Data models for the relay.
//! Coordinates and stations as read from the data feed, and the keyed payloads
//! sent to the watch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::RelayError;
use crate::geodesy::{PlanarOffset, Polar};

/// Geographic location in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate, rejecting values outside
    /// latitude -90..=90 and longitude -180..=180 (NaN included).
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, RelayError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(RelayError::MalformedInput(format!(
                "latitude {} out of range",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(RelayError::MalformedInput(format!(
                "longitude {} out of range",
                longitude
            )));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Haversine distance in meters, independent of any reference frame.
    pub fn great_circle_distance_m(&self, other: &Coordinate) -> f64 {
        use geo::HaversineDistance;
        geo::Point::from(*self).haversine_distance(&geo::Point::from(*other))
    }
}

impl From<Coordinate> for geo::Point<f64> {
    fn from(c: Coordinate) -> Self {
        geo::Point::new(c.longitude, c.latitude)
    }
}

/// A bike-share docking station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub coordinate: Coordinate,
    pub bikes_available: u32,
    pub racks_total: u32,
}

/// The full set of stations from one refresh, sorted by id.
///
/// Lists are replaced wholesale; there is no incremental merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationList {
    stations: Vec<Station>,
}

#[derive(Deserialize)]
struct Feed {
    data: FeedData,
}

#[derive(Deserialize)]
struct FeedData {
    list: Vec<FeedStation>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedId {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct FeedStation {
    id: FeedId,
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    bikes: u32,
    #[serde(default)]
    spaces: u32,
}

impl StationList {
    /// Builds a list, validating id uniqueness, and sorts it by id.
    pub fn new(mut stations: Vec<Station>) -> Result<Self, RelayError> {
        let mut seen = HashSet::new();
        for station in &stations {
            if !seen.insert(station.id.as_str()) {
                return Err(RelayError::MalformedInput(format!(
                    "duplicate station id {}",
                    station.id
                )));
            }
        }
        stations.sort_by(|a, b| id_sort_key(&a.id).cmp(&id_sort_key(&b.id)));
        Ok(Self { stations })
    }

    /// Decodes the bike-share feed document
    /// `{"data": {"list": [{"id", "name", "lat", "lon", "bikes", "spaces"}]}}`.
    pub fn from_json(body: &str) -> Result<Self, RelayError> {
        let feed: Feed = serde_json::from_str(body)
            .map_err(|e| RelayError::MalformedInput(format!("station feed: {}", e)))?;

        let stations = feed
            .data
            .list
            .into_iter()
            .map(|raw| {
                let id = match raw.id {
                    FeedId::Number(n) => n.to_string(),
                    FeedId::Text(s) => s,
                };
                let coordinate = Coordinate::new(raw.lat, raw.lon).map_err(|e| {
                    RelayError::MalformedInput(format!("station {}: {}", id, e))
                })?;
                Ok(Station {
                    id,
                    name: raw.name,
                    coordinate,
                    bikes_available: raw.bikes,
                    racks_total: raw.spaces,
                })
            })
            .collect::<Result<Vec<_>, RelayError>>()?;

        Self::new(stations)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

/// Numeric ids sort numerically; anything else sorts lexically before them.
fn id_sort_key(id: &str) -> (Option<u64>, &str) {
    (id.parse::<u64>().ok(), id)
}

/// Cuts a station name to fit a NUL-terminated buffer of `max_bytes` on the watch.
///
/// Names that fit are returned unchanged. Longer names are cut on a char
/// boundary leaving room for an ellipsis and the terminator.
pub fn truncate_name(name: &str, max_bytes: usize) -> String {
    if name.len() + 1 < max_bytes {
        return name.to_string();
    }
    let mut end = max_bytes.saturating_sub(4);
    while end > 0 && !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &name[..end])
}

/// Keyed message body handed to the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// `{x, y}`: observer position on the origin grid.
    pub fn planar_position(offset: PlanarOffset) -> Self {
        Self::new().with("x", offset.x).with("y", offset.y)
    }

    /// `{distance, heading}`: observer position relative to the origin.
    pub fn polar_position(polar: Polar) -> Self {
        Self::new()
            .with("distance", polar.distance_m)
            .with("heading", polar.heading_degrees())
    }

    /// `{num_stations}`
    pub fn station_count(count: usize) -> Self {
        Self::new().with("num_stations", count as u64)
    }

    /// `{index, name, x, y, racks}`
    pub fn station_descriptor(index: usize, name: String, offset: PlanarOffset, racks: u32) -> Self {
        Self::new()
            .with("index", index as u64)
            .with("name", name)
            .with("x", offset.x)
            .with("y", offset.y)
            .with("racks", racks)
    }

    /// `{name, distance, heading, bikes, racks}`
    pub fn nearest_station(name: String, polar: Polar, bikes: u32, racks: u32) -> Self {
        Self::new()
            .with("name", name)
            .with("distance", polar.distance_m)
            .with("heading", polar.heading_degrees())
            .with("bikes", bikes)
            .with("racks", racks)
    }

    /// `{update: [start, bikes...]}`
    pub fn bike_update(start: usize, bikes: &[u32]) -> Self {
        let mut update = Vec::with_capacity(bikes.len() + 1);
        update.push(Value::from(start as u64));
        update.extend(bikes.iter().map(|&b| Value::from(b)));
        Self::new().with("update", Value::Array(update))
    }
}
