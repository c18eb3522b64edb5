//! Service layer for seqacquire business logic.
//!
//! This module contains domain logic separated from UI concerns.

pub mod batch;
pub mod download;

pub use batch::{parse_sequence_list, read_sequence_file, run_batch, BatchResult};
pub use download::{
    DownloadConfig, DownloadEvent, FailureKind, ItemFailure, RunSummary, SequenceDownloader,
};
