//! Distance ranking of stations around the observer, and the chunked
//! bike-count updates sent alongside it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RelayError;
use crate::geodesy::{DistanceCalculator, Polar};
use crate::models::{Coordinate, Payload, Station, StationList};

/// A station annotated with its distance and bearing from the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedStation {
    /// Position of the station in the id-sorted list.
    pub index: usize,
    pub station: Station,
    pub polar: Polar,
}

/// Stations sorted by ascending distance from one reference point.
#[derive(Debug, Clone)]
pub struct Ranking {
    generation: u64,
    reference: Coordinate,
    stations: Vec<RankedStation>,
}

impl Ranking {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reference(&self) -> Coordinate {
        self.reference
    }

    /// Every station, nearest first.
    pub fn annotated(&self) -> &[RankedStation] {
        &self.stations
    }

    /// At most `count` stations, nearest first.
    pub fn nearest(&self, count: usize) -> &[RankedStation] {
        &self.stations[..count.min(self.stations.len())]
    }
}

/// Ranks stations against the observer frame held by a `DistanceCalculator`.
///
/// Every call to `rank` starts a new generation; a ranking from an older
/// generation is stale and must not be sent.
pub struct StationRanker {
    calculator: DistanceCalculator,
    generation: AtomicU64,
}

impl StationRanker {
    pub fn new(calculator: DistanceCalculator) -> Self {
        Self {
            calculator,
            generation: AtomicU64::new(0),
        }
    }

    pub fn rank(&self, list: &StationList) -> Result<Ranking, RelayError> {
        let frame = self.calculator.frame()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut stations: Vec<RankedStation> = list
            .stations()
            .iter()
            .enumerate()
            .map(|(index, station)| RankedStation {
                index,
                station: station.clone(),
                polar: crate::geodesy::polar(&frame, &station.coordinate),
            })
            .collect();
        // stable, so equally distant stations keep id order
        stations.sort_by_key(|r| r.polar.distance_m);

        log::debug!(
            "Ranking #{}: {} stations, nearest at {}m",
            generation,
            stations.len(),
            stations.first().map_or(-1, |r| r.polar.distance_m)
        );

        Ok(Ranking {
            generation,
            reference: frame.origin(),
            stations,
        })
    }

    /// True if no newer ranking has been produced since `ranking`.
    pub fn is_current(&self, ranking: &Ranking) -> bool {
        self.generation.load(Ordering::SeqCst) == ranking.generation
    }
}

/// Splits bike counts into `{update: [start, bikes...]}` messages of at most
/// `chunk_size` stations each, in list order.
pub fn bike_updates(stations: &[Station], chunk_size: usize) -> Vec<Payload> {
    stations
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(n, chunk)| {
            let bikes: Vec<u32> = chunk.iter().map(|s| s.bikes_available).collect();
            Payload::bike_update(n * chunk_size.max(1), &bikes)
        })
        .collect()
}
