//! blockchain Backend

/// Key-value storage and database errors
pub mod db;

pub mod executor;

/// Account access for the pool
pub mod info;

/// In-memory Backend
pub mod mem;

pub mod time;
pub use time::now_millis;
