use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use transitedge_metadata::{ConnectionOptions, RouteFeedConfig};
use transitedge_middleware::{Frame, Transport};

use crate::connection::{ConnectionConfig, ConnectionHandle};
use crate::error::EmitError;
use crate::route::snapshot::RouteSnapshot;

/// Inbound event carrying a route snapshot
pub const ROUTE_EVENT: &str = "route";

/// Outbound request for a fresh snapshot
pub const GET_ROUTE_EVENT: &str = "get_route";

const FEED_NAME: &str = "route";

/// Route feed connector: latest snapshot plus connection status
pub struct RouteFeed {
    connection: ConnectionHandle,
    snapshot: watch::Receiver<Option<RouteSnapshot>>,
}

impl RouteFeed {
    /// Connect to `endpoint`, request a snapshot on every connect and poll on
    /// `config.poll_interval()` while connected
    pub fn activate(
        endpoint: &str,
        options: ConnectionOptions,
        config: &RouteFeedConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(None);

        let connection_config = ConnectionConfig::new(FEED_NAME, endpoint)
            .options(options)
            .on(ROUTE_EVENT, move |payload| {
                let snapshot = RouteSnapshot::new(payload);
                debug!(
                    trip_id = ?snapshot.trip_id(),
                    baseline_eta = ?snapshot.baseline_eta(),
                    optimized_eta = ?snapshot.optimized_eta(),
                    "Route update received"
                );
                snapshot_tx.send_replace(Some(snapshot));
            })
            .emit_on_connect(Frame::bare(GET_ROUTE_EVENT))
            .refresh_every(config.poll_interval(), Frame::bare(GET_ROUTE_EVENT));

        Self {
            connection: ConnectionHandle::activate(connection_config, transport),
            snapshot,
        }
    }

    /// Latest snapshot; kept across disconnects
    pub fn route_data(&self) -> Option<RouteSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot replacement
    pub fn watch(&self) -> watch::Receiver<Option<RouteSnapshot>> {
        self.snapshot.clone()
    }

    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Ask for a snapshot now instead of waiting for the next poll
    pub fn refresh(&self) -> Result<(), EmitError> {
        self.connection.emit(Frame::bare(GET_ROUTE_EVENT))
    }

    pub async fn deactivate(&mut self) {
        self.connection.deactivate().await;
    }
}
