//! Analysis engine: claiming, attempt execution, and the worker loop.

pub mod attempt;
pub mod claimer;
pub mod worker;

pub use attempt::{AttemptResult, AttemptRunner};
pub use claimer::Claimer;
pub use worker::{Shutdown, Tick, Worker, WorkerPool, worker_prefix};
