//! Main entry point for the station relay.
//! Loads configuration, publishes a station list over a simulated watch link,
//! then relays position fixes and refresh requests read from stdin until EOF.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use station_relay::config::RelayConfig;
use station_relay::queue::DeliveryQueue;
use station_relay::service::RelayService;
use station_relay::source::{spawn_refresh_ticker, FileStationSource, PositionUpdate};
use station_relay::transport::SimulatedLink;

/// Main entry point for the station relay.
///
/// # Usage
/// `station-relay <stations.json>`, then one `lat lon` fix per line on stdin.
/// A `refresh` line re-reads the station list, as a watch request would.
///
/// # Environment Variables
/// See `config` for the RELAY_* variables. Log level is set via RUST_LOG.
///
/// Everything runs on one thread; the queue, the position feed and the
/// simulated link only interleave at await points.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: station-relay <stations.json>");
        std::process::exit(2);
    };

    let config = RelayConfig::from_env_or_default();
    log::info!("Starting station relay with configuration: {:?}", config);
    let refresh_interval = config.refresh_interval();

    let (queue, queue_task) =
        DeliveryQueue::spawn(Arc::new(SimulatedLink::default()), config.delivery_settings());
    let service = RelayService::new(config, queue)?;

    let source = FileStationSource::new(path);
    service.refresh(&source, true).await?;

    let (refresh_tx, refresh_rx) = mpsc::channel(1);
    if let Some(period) = refresh_interval {
        log::info!("Refreshing station list every {:?}", period);
        spawn_refresh_ticker(period, refresh_tx.clone());
    }

    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("refresh") {
                if refresh_tx.try_send(()).is_err() {
                    log::debug!("Refresh already pending");
                }
                continue;
            }
            if tx.send(PositionUpdate::parse_line(line)).await.is_err() {
                break;
            }
        }
    });

    // the position feed decides the lifetime; pending refreshes end with it
    {
        let positions = service.follow_positions(rx);
        tokio::pin!(positions);
        tokio::select! {
            _ = &mut positions => {}
            _ = service.follow_refresh_requests(refresh_rx, &source) => positions.await,
        }
    }
    reader.await?;

    // dropping the service releases the last queue handle, so the queue drains and exits
    drop(service);
    queue_task.await?;
    log::info!("Relay finished");
    Ok(())
}
