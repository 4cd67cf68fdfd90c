//! Quote Feed Infrastructure
//!
//! Socket client for the tick feed.
//!
//! - `messages`: wire types for commands and tick pushes
//! - `codec`: text-frame encode/decode
//! - `heartbeat`: keep-alive scheduling and liveness
//! - `reconnect`: backoff between attempts
//! - `connection`: the self-healing connection itself

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use connection::{
    ConnectionSnapshot, ConnectionState, FeedClientError, FeedConnection, FeedConnectionConfig,
    FeedEvent,
};

use crate::application::services::TickRouter;
use crate::domain::subscription::SubscriptionRegistry;

/// A running feed: its connection, registry and background tasks.
#[derive(Debug)]
pub struct FeedRuntime {
    /// The connection.
    pub connection: Arc<FeedConnection>,
    /// Registry replayed by the connection and read by the router.
    pub registry: Arc<SubscriptionRegistry>,
    /// Connection task.
    pub connection_task: JoinHandle<Result<(), FeedClientError>>,
    /// Router task.
    pub router_task: JoinHandle<()>,
}

/// Start a connection and its tick router.
#[must_use]
pub fn spawn_feed(
    config: FeedConnectionConfig,
    event_capacity: usize,
    cancel: &CancellationToken,
) -> FeedRuntime {
    let feed = config.feed;
    let registry = Arc::new(SubscriptionRegistry::new());
    let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));

    let connection = Arc::new(FeedConnection::new(
        config,
        Arc::clone(&registry),
        event_tx,
        cancel.clone(),
    ));

    let router = TickRouter::new(feed, Arc::clone(&registry));
    let router_task = tokio::spawn(router.run(event_rx, cancel.clone()));
    let connection_task = tokio::spawn(Arc::clone(&connection).run());

    FeedRuntime {
        connection,
        registry,
        connection_task,
        router_task,
    }
}
