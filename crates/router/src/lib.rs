//! The notification router: translates alert lifecycle events into
//! delivery jobs by matching them against enabled routing rules.

pub mod config;
pub mod error;
pub mod route;
pub mod worker;

pub use config::RouterConfig;
pub use error::RouterError;
pub use route::route_event;
pub use worker::run_router;
