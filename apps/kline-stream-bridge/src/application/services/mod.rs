//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TickRouter`: aggregates one feed's ticks into bars and fans them out
//! - `BackfillService`: history with the single-backfill gate and no-data signal
//! - `ChartFeed`: consumer façade for resolve, search, subscribe and history

mod backfill;
mod chart_feed;
mod tick_router;

pub use backfill::{BackfillService, HistoryResult};
pub use chart_feed::{ChartFeed, FeedChannel, FeedError};
pub use tick_router::{RouteOutcome, TickRouter};
