//! Stream adapters: each one owns a broker subscription, normalises every
//! message and hands it to its consumer over a blocking channel.

use crate::error::GatewayError;
use crate::normalize::{transform_last_price, transform_order_book, transform_position_data};
use crate::{BrokerGateway, WireStream};
use core_types::{LastPriceTick, OrderBook, PositionSnapshot};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the hand-off channel between an adapter and its consumer.
/// A single slot keeps the adapter from running ahead of the consumer.
pub const HANDOFF_CAPACITY: usize = 1;

/// A running adapter: the normalised events and the task producing them.
/// The task finishes after shutdown, a stream error, stream closure, or when
/// `events` is dropped.
pub struct StreamAdapter<T> {
    pub events: mpsc::Receiver<T>,
    pub task: JoinHandle<()>,
}

/// Resolves once shutdown has been signalled, or once every sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub async fn spawn_order_book_adapter(
    gateway: Arc<dyn BrokerGateway>,
    instrument_ids: &[String],
    depth: i32,
    shutdown: watch::Receiver<bool>,
) -> Result<StreamAdapter<OrderBook>, GatewayError> {
    let stream = gateway.subscribe_order_books(instrument_ids, depth).await?;
    Ok(spawn_adapter("order-book", stream, transform_order_book, shutdown))
}

pub async fn spawn_last_price_adapter(
    gateway: Arc<dyn BrokerGateway>,
    instrument_ids: &[String],
    shutdown: watch::Receiver<bool>,
) -> Result<StreamAdapter<LastPriceTick>, GatewayError> {
    let stream = gateway.subscribe_last_prices(instrument_ids).await?;
    Ok(spawn_adapter("last-price", stream, transform_last_price, shutdown))
}

pub async fn spawn_position_adapter(
    gateway: Arc<dyn BrokerGateway>,
    account_id: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<StreamAdapter<PositionSnapshot>, GatewayError> {
    let stream = gateway.subscribe_positions(account_id).await?;
    Ok(spawn_adapter("positions", stream, transform_position_data, shutdown))
}

fn spawn_adapter<W, T>(
    name: &'static str,
    mut stream: WireStream<W>,
    normalize: fn(W) -> T,
    mut shutdown: watch::Receiver<bool>,
) -> StreamAdapter<T>
where
    W: Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);

    let task = tokio::spawn(async move {
        tracing::info!(stream = name, "Stream adapter started.");
        loop {
            let wire = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                item = stream.next() => match item {
                    Some(Ok(wire)) => wire,
                    Some(Err(e)) => {
                        tracing::error!(stream = name, error = %e, "Stream read failed.");
                        break;
                    }
                    None => {
                        tracing::debug!(stream = name, "Stream closed by the broker.");
                        break;
                    }
                },
            };

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                sent = tx.send(normalize(wire)) => {
                    if sent.is_err() {
                        tracing::debug!(stream = name, "Consumer dropped. Closing subscription.");
                        break;
                    }
                }
            }
        }
        // Dropping the stream cancels the subscription on the broker side.
        drop(stream);
        tracing::info!(stream = name, "Stream adapter stopped.");
    });

    StreamAdapter { events: rx, task }
}
