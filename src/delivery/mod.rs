//! Live push of new messages to connected recipients.
mod router;

pub use router::{DeliveryOutcome, DeliveryRouter, DeliveryStats, DeliveryStatsSnapshot};
