use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{RelayConfig, RelayMode};
use crate::error::RelayError;
use crate::geodesy::DistanceCalculator;
use crate::models::{truncate_name, Coordinate, Payload, StationList};
use crate::queue::{DeliveryHandle, Envelope, SupersedeTag};
use crate::ranker::{bike_updates, Ranking, StationRanker};
use crate::source::{PositionUpdate, StationSource};

/// Supersede groups used for outbound batches.
const GROUP_POSITION: &str = "position";
const GROUP_COUNT: &str = "count";
const GROUP_UPDATE: &str = "update";
const GROUP_PUBLISH: &str = "publish";
const GROUP_NEAREST: &str = "nearest";

/// Turns position fixes and station lists into messages for the watch.
///
/// Two reference frames are kept: a fixed one on the configured grid origin,
/// used for planar positions and station descriptors, and one that follows
/// the observer, used for ranking. Newer inputs supersede queued messages
/// built from older ones; nothing already in flight is interrupted.
pub struct RelayService {
    config: RelayConfig,
    queue: DeliveryHandle,
    origin: DistanceCalculator,
    observer: DistanceCalculator,
    ranker: StationRanker,
    stations: RwLock<Arc<StationList>>,
    last_position: Mutex<Option<Coordinate>>,
    position_generation: AtomicU64,
    list_generation: AtomicU64,
}

impl RelayService {
    pub fn new(config: RelayConfig, queue: DeliveryHandle) -> Result<Self, RelayError> {
        config.validate()?;
        let origin = DistanceCalculator::centered_on(Coordinate::new(config.origin_lat, config.origin_lon)?);
        let observer = DistanceCalculator::new();

        log::info!("Starting relay in {:?} mode around ({}, {})", config.mode, config.origin_lat, config.origin_lon);

        Ok(Self {
            ranker: StationRanker::new(observer.clone()),
            config,
            queue,
            origin,
            observer,
            stations: RwLock::new(Arc::new(StationList::default())),
            last_position: Mutex::new(None),
            position_generation: AtomicU64::new(0),
            list_generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn queue(&self) -> &DeliveryHandle {
        &self.queue
    }

    /// Calculator centered on the latest accepted position.
    pub fn observer(&self) -> &DistanceCalculator {
        &self.observer
    }

    pub fn stations(&self) -> Arc<StationList> {
        self.stations.read().clone()
    }

    /// Applies a position fix.
    ///
    /// The fix only becomes the current position once its message is in the
    /// queue; a fix the queue refused can be applied again later.
    ///
    /// # Returns
    /// - Ok(true) if the fix moved the observer and messages were queued
    /// - Ok(false) if it repeats the previous position
    /// - Err(RelayError::MalformedInput) if the coordinate is out of range;
    ///   the previous position stays in effect
    /// - Err(RelayError::QueueClosed) if the queue is gone; nothing changes
    pub fn on_position(&self, latitude: f64, longitude: f64) -> Result<bool, RelayError> {
        let coord = Coordinate::new(latitude, longitude).map_err(|e| {
            log::warn!("Rejected position fix: {}", e);
            e
        })?;

        let previous = *self.last_position.lock();
        if previous == Some(coord) {
            log::debug!("Position unchanged, nothing to send");
            return Ok(false);
        }

        let payload = match self.config.mode {
            RelayMode::Planar => Payload::planar_position(self.origin.offset(&coord)?),
            RelayMode::Polar => Payload::polar_position(self.origin.polar(&coord)?),
        };
        let generation = self.position_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.queue.enqueue_envelope(
            Envelope::new(payload, "position")
                .high_priority()
                .superseding(SupersedeTag::new(GROUP_POSITION, generation)),
        )?;

        match previous {
            Some(previous) => log::info!(
                "Received updated coordinates, moved {:.0}m",
                previous.great_circle_distance_m(&coord)
            ),
            None => log::info!("Received first coordinates"),
        }
        *self.last_position.lock() = Some(coord);
        self.observer.install(coord);

        if self.config.mode == RelayMode::Polar {
            self.send_nearest()?;
        }
        Ok(true)
    }

    pub fn on_position_error(&self, reason: &str) {
        log::warn!("Error receiving updated coordinates: {}", reason);
    }

    pub fn on_position_update(&self, update: PositionUpdate) -> Result<bool, RelayError> {
        match update {
            PositionUpdate::Fix(coord) => self.on_position(coord.latitude(), coord.longitude()),
            PositionUpdate::Error(reason) => {
                self.on_position_error(&reason);
                Ok(false)
            }
        }
    }

    /// Applies position events until the feed closes. Rejected fixes are
    /// logged and skipped.
    pub async fn follow_positions(&self, mut updates: mpsc::Receiver<PositionUpdate>) {
        while let Some(update) = updates.recv().await {
            if let Err(e) = self.on_position_update(update) {
                log::warn!("Position update not applied: {}", e);
            }
        }
        log::info!("Position feed closed");
    }

    /// Replaces the station list and queues its messages.
    ///
    /// On the first load the station count goes out before the bike counts,
    /// and in planar mode one descriptor per station follows them. The list
    /// is only replaced once the queue has taken its messages.
    pub fn on_station_list(&self, list: StationList, first: bool) -> Result<(), RelayError> {
        let generation = self.list_generation.fetch_add(1, Ordering::SeqCst) + 1;

        log::info!("Station list #{} with {} stations (first load: {})", generation, list.len(), first);

        if first {
            self.queue.enqueue_envelope(
                Envelope::new(Payload::station_count(list.len()), "station count")
                    .superseding(SupersedeTag::new(GROUP_COUNT, generation)),
            )?;
        }

        for (n, payload) in bike_updates(list.stations(), self.config.chunk_size).into_iter().enumerate() {
            self.queue.enqueue_envelope(
                Envelope::new(payload, format!("update #{}", n))
                    .superseding(SupersedeTag::new(GROUP_UPDATE, generation)),
            )?;
        }

        if first && self.config.mode == RelayMode::Planar {
            for (index, station) in list.stations().iter().enumerate() {
                let payload = Payload::station_descriptor(
                    index,
                    truncate_name(&station.name, self.config.max_name_bytes),
                    self.origin.offset(&station.coordinate)?,
                    station.racks_total,
                );
                self.queue.enqueue_envelope(
                    Envelope::new(payload, format!("station #{}", index))
                        .superseding(SupersedeTag::new(GROUP_PUBLISH, generation)),
                )?;
            }
        }

        *self.stations.write() = Arc::new(list);

        if self.config.mode == RelayMode::Polar {
            self.send_nearest()?;
        }
        Ok(())
    }

    /// Fetches a fresh list and applies it. A failed fetch keeps the current list.
    pub async fn refresh(&self, source: &dyn StationSource, first: bool) -> Result<usize, RelayError> {
        let list = source.fetch_station_list().await.map_err(|e| {
            log::warn!("Station refresh failed: {}", e);
            e
        })?;
        let count = list.len();
        self.on_station_list(list, first)?;
        Ok(count)
    }

    /// Refreshes the station list on every request until the request feed
    /// closes. The first successful load publishes the full list; later ones
    /// only send bike counts. Failed fetches are logged and the current list
    /// stays in place.
    pub async fn follow_refresh_requests(
        &self,
        mut requests: mpsc::Receiver<()>,
        source: &dyn StationSource,
    ) {
        while requests.recv().await.is_some() {
            let first = self.stations.read().is_empty();
            match self.refresh(source, first).await {
                Ok(count) => log::debug!("Refreshed {} stations", count),
                Err(e) => log::warn!("Refresh request not served: {}", e),
            }
        }
        log::info!("Refresh request feed closed");
    }

    /// Ranks the current list around the observer.
    pub fn rank(&self) -> Result<Ranking, RelayError> {
        self.ranker.rank(&self.stations())
    }

    /// Queues the nearest stations as one message each, replacing any
    /// nearest-station messages still waiting from an older ranking.
    ///
    /// Does nothing until both a position and a non-empty list are known.
    pub fn send_nearest(&self) -> Result<usize, RelayError> {
        if self.stations.read().is_empty() {
            return Ok(0);
        }
        let ranking = match self.rank() {
            Ok(ranking) => ranking,
            Err(RelayError::UninitializedReference) => {
                log::debug!("No position yet, skipping nearest stations");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        self.enqueue_ranking(&ranking)
    }

    /// Queues the top of `ranking` unless a newer ranking exists.
    pub fn enqueue_ranking(&self, ranking: &Ranking) -> Result<usize, RelayError> {
        if !self.ranker.is_current(ranking) {
            log::debug!("Discarding stale ranking #{}", ranking.generation());
            return Ok(0);
        }

        let nearest = ranking.nearest(self.config.nearest_count);
        for (i, ranked) in nearest.iter().enumerate() {
            let payload = Payload::nearest_station(
                truncate_name(&ranked.station.name, self.config.max_name_bytes),
                ranked.polar,
                ranked.station.bikes_available,
                ranked.station.racks_total,
            );
            self.queue.enqueue_envelope(
                Envelope::new(payload, format!("nearest #{}", i))
                    .superseding(SupersedeTag::new(GROUP_NEAREST, ranking.generation())),
            )?;
        }
        Ok(nearest.len())
    }
}
