pub mod action_log;
pub mod igdb;
pub mod installers;
pub mod job_runner;
pub mod media;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod store;
