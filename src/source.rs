//! Inputs feeding the relay: the station list fetch, refresh requests and the
//! geolocation feed.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::RelayError;
use crate::models::{Coordinate, StationList};

/// Produces the complete station list. Each call replaces the whole set.
#[async_trait::async_trait]
pub trait StationSource: Send + Sync {
    async fn fetch_station_list(&self) -> Result<StationList, RelayError>;
}

/// Reads the bike-share feed document from a file.
#[derive(Debug, Clone)]
pub struct FileStationSource {
    path: PathBuf,
}

impl FileStationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl StationSource for FileStationSource {
    async fn fetch_station_list(&self) -> Result<StationList, RelayError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RelayError::Source(format!("{}: {}", self.path.display(), e)))?;
        let list = StationList::from_json(&body)?;
        log::info!("Collected data for {} stations from {}", list.len(), self.path.display());
        Ok(list)
    }
}

/// Sends a refresh request every `period`, starting one period from now.
///
/// Stops once the receiving side is gone. A tick is skipped rather than
/// queued while the previous request is still waiting.
pub fn spawn_refresh_ticker(period: Duration, requests: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match requests.try_send(()) {
                Ok(()) => log::debug!("Periodic station refresh requested"),
                Err(mpsc::error::TrySendError::Full(())) => {
                    log::debug!("Refresh already pending, skipping tick");
                }
                Err(mpsc::error::TrySendError::Closed(())) => break,
            }
        }
    })
}

/// One event from the geolocation subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    Fix(Coordinate),
    Error(String),
}

impl PositionUpdate {
    /// Parses a `lat lon` (or `lat,lon`) line. Anything unparsable becomes an
    /// `Error` event rather than a failure, like a sensor error would.
    pub fn parse_line(line: &str) -> Self {
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();

        let [lat, lon] = fields.as_slice() else {
            return PositionUpdate::Error(format!("expected `lat lon`, got {:?}", line));
        };
        match (lat.parse::<f64>(), lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => match Coordinate::new(lat, lon) {
                Ok(coord) => PositionUpdate::Fix(coord),
                Err(e) => PositionUpdate::Error(e.to_string()),
            },
            _ => PositionUpdate::Error(format!("unparsable coordinates {:?}", line)),
        }
    }
}
