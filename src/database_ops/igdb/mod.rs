pub mod client;
pub mod covers;
pub mod dedupe;
pub mod ingest;
pub mod matcher;
pub mod repair;

/// Provider name IGDB mirrors are stored under.
pub const IGDB_PROVIDER: &str = "igdb";
