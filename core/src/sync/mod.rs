//! The replication pipeline: batches out, patches in.

mod consumer;
mod producer;
mod strategy;

pub use consumer::{ApplyReport, PatchConsumer};
pub use producer::PatchProducer;
pub use strategy::{apply_with_strategy, ConflictStrategy, StrategyOutcome};
