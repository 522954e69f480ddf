pub mod batch;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod http;
pub mod mqtt;
pub mod pipeline;
pub mod rate_limiter;
pub mod validate;

pub use config::IngestConfig;
pub use context::AuthenticatedDevice;
pub use error::IngestError;
pub use http::{IngestState, ingest_telemetry};
pub use mqtt::{MqttIngestConfig, run_mqtt_subscriber};
pub use pipeline::IngestPipeline;
