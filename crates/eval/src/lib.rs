//! The evaluation engine: the per-tenant, fixed-period tick loop that
//! derives device status, opens/closes heartbeat and threshold alerts, and
//! advances due escalations.

pub mod config;
pub mod error;
pub mod escalation;
pub mod rules;
pub mod status;
pub mod tick;

pub use config::EvalConfig;
pub use error::EvalError;
pub use escalation::{Escalated, advance_due_escalations, resolve_oncall_email};
pub use rules::RuleOutcome;
pub use status::derive_status;
pub use tick::{Evaluator, run_loop};
