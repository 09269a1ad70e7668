//! # Daily relay pipeline
//!
//! Windowed ingestion of PM2.5 readings and durable relay of daily averages.
//!
//! ## Flow
//!
//! 1. `collector` subscribes to the readings topic for one collection window
//! 2. `cleaner` drops outliers and averages clean readings per UTC day
//! 3. `relay` publishes one persistent message per day to the durable queue
//! 4. `drain` reads the queue back within a time budget for downstream use
//!
//! `engine` runs steps 1-3 as a state machine and owns the retry policy for
//! empty windows. Aggregates are keyed by day, so republishing a day is
//! harmless: `drain::merge_by_day` keeps the last value per day.
//!
//! ## Module Organization
//!
//! - `types` - Reading, DailyAggregate, RelayMessage
//! - `window` - CollectionWindow and its close report
//! - `clock` - time source for the drain loop

pub mod cleaner;
pub mod clock;
pub mod collector;
pub mod config;
pub mod drain;
pub mod engine;
pub mod error;
pub mod relay;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use cleaner::{clean_and_aggregate, CleanedBatch};
pub use clock::{Clock, ManualClock, TokioClock};
pub use collector::StreamCollector;
pub use config::PipelineConfig;
pub use drain::{merge_by_day, DrainConsumer, DrainReport, DrainSettings, DrainStop};
pub use engine::{CycleResult, PipelineRunner, RunState, RunSummary};
pub use error::PipelineError;
pub use relay::publish_aggregates;
pub use types::{DailyAggregate, Reading, ReadingRejection, RelayMessage};
pub use window::{CloseReason, CollectionWindow, WindowReport};
