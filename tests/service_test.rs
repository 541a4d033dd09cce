mod common;

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use common::{init, settle, station_line, MockTransport, Reply};
use station_relay::config::{RelayConfig, RelayMode};
use station_relay::models::{Payload, StationList};
use station_relay::queue::{DeliveryQueue, DeliverySettings};
use station_relay::service::RelayService;
use station_relay::source::{spawn_refresh_ticker, FileStationSource, PositionUpdate, StationSource};
use station_relay::RelayError;

fn relay(transport: &Arc<MockTransport>, config: RelayConfig) -> RelayService {
    let (queue, _task) = DeliveryQueue::spawn(transport.clone(), DeliverySettings::default());
    RelayService::new(config, queue).unwrap()
}

fn polar_config() -> RelayConfig {
    RelayConfig {
        mode: RelayMode::Polar,
        ..RelayConfig::default()
    }
}

fn kind_of(payload: &Payload) -> &'static str {
    if payload.contains_key("num_stations") {
        "count"
    } else if payload.contains_key("update") {
        "update"
    } else if payload.contains_key("index") {
        "station"
    } else if payload.contains_key("bikes") {
        "nearest"
    } else {
        "position"
    }
}

struct FailingSource;

#[async_trait::async_trait]
impl StationSource for FailingSource {
    async fn fetch_station_list(&self) -> Result<StationList, RelayError> {
        Err(RelayError::Source("connection refused".to_string()))
    }
}

/// Serves the same list on every fetch and counts the fetches.
struct FixedSource {
    list: StationList,
    fetches: AtomicUsize,
}

impl FixedSource {
    fn new(list: StationList) -> Self {
        Self {
            list,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl StationSource for FixedSource {
    async fn fetch_station_list(&self) -> Result<StationList, RelayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.list.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_list_publishes_count_updates_then_stations() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());

    service.on_station_list(station_line(250), true).unwrap();
    settle().await;

    let payloads = transport.sent_payloads();
    assert_eq!(payloads.len(), 1 + 3 + 250);
    assert_eq!(payloads[0].get_i64("num_stations"), Some(250));
    assert!(payloads[1..4].iter().all(|p| kind_of(p) == "update"));

    let descriptor = &payloads[4];
    assert_eq!(descriptor.get_i64("index"), Some(0));
    assert_eq!(descriptor.get("name").unwrap(), "Station 1");
    assert_eq!(descriptor.get_i64("racks"), Some(20));
    assert!(descriptor.get_i64("x").unwrap() > 0 && descriptor.get_i64("y").unwrap() > 0);
    assert_eq!(payloads[253].get_i64("index"), Some(249));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_only_sends_bike_updates() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());

    service.on_station_list(station_line(130), false).unwrap();
    settle().await;

    let kinds: Vec<_> = transport.sent_payloads().iter().map(kind_of).collect();
    assert_eq!(kinds, vec!["update", "update"]);
}

#[tokio::test(start_paused = true)]
async fn test_position_jumps_ahead_of_station_publishing() {
    init();
    let transport = Arc::new(MockTransport::new(vec![Reply::Hold], Reply::Ack));
    let service = relay(&transport, RelayConfig::default());

    service.on_station_list(station_line(20), true).unwrap();
    settle().await;
    assert!(service.on_position(47.5, 19.06).unwrap());
    settle().await;

    let held = transport.held_tokens();
    transport.ack(held[0]);
    settle().await;

    let payloads = transport.sent_payloads();
    assert_eq!(kind_of(&payloads[0]), "count", "already in flight");
    assert_eq!(kind_of(&payloads[1]), "position");
    assert_eq!(payloads[1].get_i64("x"), Some(646));
    assert_eq!(payloads[1].get_i64("y"), Some(833));
    assert_eq!(payloads.len(), 1 + 1 + 1 + 20);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_or_malformed_position_sends_nothing() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());

    assert!(service.on_position(47.5, 19.06).unwrap());
    assert!(!service.on_position(47.5, 19.06).unwrap());
    assert!(matches!(
        service.on_position(95.0, 19.06),
        Err(RelayError::MalformedInput(_))
    ));
    // the rejected fix did not replace the last accepted one
    assert!(!service.on_position(47.5, 19.06).unwrap());
    settle().await;

    assert_eq!(transport.sent().len(), 1);
    let reference = service.observer().reference().unwrap();
    assert_eq!((reference.latitude(), reference.longitude()), (47.5, 19.06));
}

#[tokio::test(start_paused = true)]
async fn test_polar_mode_sends_nearest_stations() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, polar_config());

    service.on_station_list(station_line(25), true).unwrap();
    service.on_position(47.4925, 19.0514).unwrap();
    settle().await;

    let payloads = transport.sent_payloads();
    let position = payloads.iter().find(|p| kind_of(p) == "position").unwrap();
    assert_eq!(position.get_i64("distance"), Some(0));

    let nearest: Vec<&Payload> = payloads.iter().filter(|p| kind_of(p) == "nearest").collect();
    assert_eq!(nearest.len(), 10);
    assert_eq!(nearest[0].get("name").unwrap(), "Station 1");
    let distances: Vec<i64> = nearest.iter().map(|p| p.get_i64("distance").unwrap()).collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert!(nearest
        .iter()
        .all(|p| (0..360).contains(&p.get_i64("heading").unwrap())));
    // stations lie to the north-east
    assert_eq!(nearest[0].get_i64("heading"), Some(56));
}

#[tokio::test(start_paused = true)]
async fn test_polar_mode_waits_for_position_before_ranking() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, polar_config());

    service.on_station_list(station_line(5), true).unwrap();
    assert_eq!(service.send_nearest().unwrap(), 0);
    settle().await;

    let kinds: Vec<_> = transport.sent_payloads().iter().map(kind_of).collect();
    assert_eq!(kinds, vec!["count", "update"]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_position_supersedes_queued_ranking() {
    init();
    let transport = Arc::new(MockTransport::new(vec![Reply::Hold], Reply::Ack));
    let service = relay(&transport, polar_config());

    service.on_station_list(station_line(25), true).unwrap();
    settle().await;
    service.on_position(47.4925, 19.0514).unwrap();
    service.on_position(47.52, 19.08).unwrap();
    settle().await;

    let held = transport.held_tokens();
    transport.ack(held[0]);
    settle().await;

    let payloads = transport.sent_payloads();
    let positions: Vec<_> = payloads.iter().filter(|p| kind_of(p) == "position").collect();
    assert_eq!(positions.len(), 1, "older position was superseded");

    let nearest: Vec<_> = payloads.iter().filter(|p| kind_of(p) == "nearest").collect();
    assert_eq!(nearest.len(), 10, "only the newest ranking went out");
    // station 25 sits at (47.5175, 19.0764), closest to the second fix
    assert_eq!(nearest[0].get("name").unwrap(), "Station 25");

    assert_eq!(service.queue().stats().superseded, 11);
}

#[tokio::test(start_paused = true)]
async fn test_stale_ranking_is_not_enqueued() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, polar_config());

    service.on_station_list(station_line(5), false).unwrap();
    service.on_position(47.4925, 19.0514).unwrap();
    settle().await;
    let before = transport.sent().len();

    let stale = service.rank().unwrap();
    let _newer = service.rank().unwrap();
    assert_eq!(service.enqueue_ranking(&stale).unwrap(), 0);
    settle().await;
    assert_eq!(transport.sent().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_from_file_and_failed_refresh_keeps_list() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"data": {{"list": [
            {{"id": 2, "name": "Kálvin tér", "lat": 47.4898, "lon": 19.0617, "bikes": 4, "spaces": 18}},
            {{"id": 1, "name": "Astoria", "lat": 47.4937, "lon": 19.0604, "bikes": 9, "spaces": 21}}
        ]}}}}"#
    )
    .unwrap();

    let count = service
        .refresh(&FileStationSource::new(file.path()), true)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(service.stations().stations()[0].name, "Astoria");

    let result = service.refresh(&FailingSource, false).await;
    assert!(matches!(result, Err(RelayError::Source(_))));
    assert_eq!(service.stations().len(), 2);

    let missing = service
        .refresh(&FileStationSource::new("/nonexistent/stations.json"), false)
        .await;
    assert!(matches!(missing, Err(RelayError::Source(_))));
    assert_eq!(service.stations().len(), 2);

    settle().await;
    // count, one update chunk, two descriptors
    assert_eq!(transport.sent().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_follow_positions_applies_feed() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());

    let (tx, rx) = mpsc::channel(8);
    for line in ["47.5 19.06", "garbage", "47.5,19.06", "-91 0", "47.51 19.07"] {
        tx.send(PositionUpdate::parse_line(line)).await.unwrap();
    }
    tx.send(PositionUpdate::Error("gps lost".to_string())).await.unwrap();
    drop(tx);

    service.follow_positions(rx).await;
    sleep(Duration::from_millis(10)).await;

    // one message for the first fix, one for the move; repeats and errors send nothing
    assert_eq!(transport.sent().len(), 2);
}

#[test]
fn test_position_line_parsing() {
    assert!(matches!(PositionUpdate::parse_line("47.5 19.06"), PositionUpdate::Fix(_)));
    assert!(matches!(PositionUpdate::parse_line(" 47.5, 19.06 "), PositionUpdate::Fix(_)));
    assert!(matches!(PositionUpdate::parse_line("47.5"), PositionUpdate::Error(_)));
    assert!(matches!(PositionUpdate::parse_line("a b"), PositionUpdate::Error(_)));
    assert!(matches!(PositionUpdate::parse_line("47.5 200"), PositionUpdate::Error(_)));
}

#[test]
fn test_service_rejects_invalid_config() {
    let config = RelayConfig {
        chunk_size: 0,
        ..RelayConfig::default()
    };
    let transport = Arc::new(MockTransport::acking());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (queue, _task) = DeliveryQueue::spawn(transport, DeliverySettings::default());
        assert!(matches!(
            RelayService::new(config, queue),
            Err(RelayError::Config(_))
        ));
    });
}

#[tokio::test(start_paused = true)]
async fn test_refresh_requests_send_updates_and_replace_pending_chunks() {
    init();
    let transport = Arc::new(MockTransport::new(vec![Reply::Hold], Reply::Ack));
    let service = relay(&transport, RelayConfig::default());

    // the station count occupies the link while the rest waits
    service.on_station_list(station_line(5), true).unwrap();
    settle().await;

    let source = FixedSource::new(station_line(130));
    let (tx, rx) = mpsc::channel(2);
    tx.send(()).await.unwrap();
    tx.send(()).await.unwrap();
    drop(tx);
    service.follow_refresh_requests(rx, &source).await;
    settle().await;

    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(service.stations().len(), 130);
    // one chunk from the first load, two from the first refresh
    assert_eq!(service.queue().stats().superseded, 3);

    let held = transport.held_tokens();
    transport.ack(held[0]);
    settle().await;

    let payloads = transport.sent_payloads();
    let kinds: Vec<_> = payloads.iter().map(kind_of).collect();
    let mut expected = vec!["count"];
    expected.extend(["station"; 5]);
    expected.extend(["update"; 2]);
    assert_eq!(kinds, expected);

    let starts: Vec<i64> = payloads[6..]
        .iter()
        .map(|p| p.get("update").unwrap().as_array().unwrap()[0].as_i64().unwrap())
        .collect();
    assert_eq!(starts, vec![0, 120]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_request_without_list_publishes_everything() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());
    let source = FixedSource::new(station_line(3));

    let (tx, rx) = mpsc::channel(1);
    tx.send(()).await.unwrap();
    drop(tx);
    service.follow_refresh_requests(rx, &source).await;
    settle().await;

    let kinds: Vec<_> = transport.sent_payloads().iter().map(kind_of).collect();
    assert_eq!(kinds, vec!["count", "update", "station", "station", "station"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_request_keeps_following() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let service = relay(&transport, RelayConfig::default());
    service.on_station_list(station_line(4), true).unwrap();

    let (tx, rx) = mpsc::channel(2);
    tx.send(()).await.unwrap();
    tx.send(()).await.unwrap();
    drop(tx);
    service.follow_refresh_requests(rx, &FailingSource).await;

    assert_eq!(service.stations().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_ticker_requests_periodically() {
    init();
    let (tx, mut rx) = mpsc::channel(1);
    let ticker = spawn_refresh_ticker(Duration::from_millis(100), tx);

    sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "no request before the first period");

    sleep(Duration::from_millis(60)).await;
    assert!(rx.try_recv().is_ok());
    sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_ok());

    // an unserved request is not stacked up
    sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());

    drop(rx);
    sleep(Duration::from_millis(200)).await;
    assert!(ticker.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_closed_queue_leaves_position_and_list_untouched() {
    init();
    let transport = Arc::new(MockTransport::acking());
    let (queue, task) = DeliveryQueue::spawn(transport.clone(), DeliverySettings::default());
    let service = RelayService::new(RelayConfig::default(), queue).unwrap();
    task.abort();
    let _ = task.await;

    assert_eq!(service.on_position(47.5, 19.06), Err(RelayError::QueueClosed));
    assert!(service.observer().reference().is_none());

    assert_eq!(
        service.on_station_list(station_line(3), true),
        Err(RelayError::QueueClosed)
    );
    assert!(service.stations().is_empty());

    // the refused fix is not remembered as the last position
    assert_eq!(service.on_position(47.5, 19.06), Err(RelayError::QueueClosed));
    assert!(transport.sent().is_empty());
}
