//! Durable storage implementations

pub mod database;

pub use database::SqliteRecordStore;
