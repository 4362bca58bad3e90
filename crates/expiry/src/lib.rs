//! Expiration scanner: marks overdue events expired in bounded batches and
//! queues an "event expired" notification for each owner.

pub mod expirer;
pub mod scanner;

pub use expirer::{EventExpirer, PgEventExpirer};
pub use scanner::{ExpirationScanner, ExpiryConfig};
