//! Background maintenance jobs for the game library: installer moderation and housekeeping,
//! plus IGDB catalog mirroring, matching, deduplication and cover art.

pub mod database_ops;
pub mod normalization;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}
