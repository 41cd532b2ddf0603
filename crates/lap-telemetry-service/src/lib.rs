//! Service layer over the lap telemetry store: lap lifecycle, the two
//! ingestion channels, read-side queries, and the retention sweep.

pub mod config;
pub mod ingest;
pub mod query;
pub mod registry;
pub mod sweeper;

pub use config::{RetentionConfig, StorageConfig, TelemetryConfig};
pub use ingest::{IngestGateway, RegisterReceipt};
pub use query::QueryService;
pub use registry::LapRegistry;
pub use sweeper::{RetentionSweeper, SweepReport, SweeperHandle};
