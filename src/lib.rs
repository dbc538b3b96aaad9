//! # docflow
//!
//! Document analysis pipeline. Documents are uploaded, queued for analysis,
//! analyzed by independent worker processes, and reviewed before the result
//! is committed into their metadata.
//!
//! There is no in-memory queue: the document store is the queue, and its
//! conditional write is the only synchronization between the API side and
//! any number of workers.

pub mod analyzer;
pub mod clock;
pub mod config;
pub mod content;
pub mod db;
pub mod engine;
pub mod error;
pub mod llm;
pub mod model;
pub mod service;
pub mod store;
pub mod telemetry;
