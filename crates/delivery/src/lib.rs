//! The delivery worker: executes notification jobs against their channel's
//! transport with bounded retries and a dead-letter queue for permanent
//! failures.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod payload;
pub mod scheduler;
pub mod worker;

pub use config::{DeliveryConfig, backoff_for_attempt};
pub use dispatch::{DispatchClients, dispatch};
pub use error::DeliveryError;
pub use scheduler::run_retry_scheduler;
pub use worker::run_delivery_worker;
