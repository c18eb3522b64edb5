//! seqacquire - street-level imagery sequence discovery and download.
//!
//! Discovers every sequence a user has uploaded to a Mapillary-style Graph
//! API, grouped by capture date, and downloads sequences with their capture
//! metadata re-embedded as GPS/EXIF tags.

pub mod cli;
pub mod client;
pub mod config;
pub mod crawler;
pub mod exif;
pub mod logging;
pub mod models;
pub mod services;
pub mod writer;
