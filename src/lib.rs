//! Bronze-layer extractor for the Surfline forecast API.
//!
//! Fetches one entity (wind, swells, tides, ...) over a date range in
//! fixed-stride windows, lands the raw payloads, and writes one
//! consolidated Parquet table per entity plus an ingestion log.

pub mod config;
pub mod consolidate;
pub mod entities;
pub mod extract;
pub mod flatten;
pub mod ingest;
pub mod ingestion_log;
pub mod landing;
pub mod logging;
pub mod model;
pub mod parquet_io;
pub mod pipeline;
pub mod repair;
pub mod table;
pub mod transform;
pub mod verify;
pub mod windows;
