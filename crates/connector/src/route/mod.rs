//! Route feed
//!
//! Holds the latest route snapshot and keeps it fresh by polling.

pub mod feed;
pub mod snapshot;

pub use feed::{RouteFeed, GET_ROUTE_EVENT, ROUTE_EVENT};
pub use snapshot::{percent_saved, RouteSnapshot};
