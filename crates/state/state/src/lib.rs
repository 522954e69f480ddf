pub mod error;
pub mod relational;
pub mod testing;
pub mod timeseries;
pub mod types;

pub use error::StateError;
pub use relational::{AlertUpsertFields, RelationalStore};
pub use timeseries::TimeSeriesStore;
pub use types::{
    CloseOutcome, DeviceRollup, JobClaimOutcome, JobInsertOutcome, OpenOrUpdateOutcome,
    WindowSampleCounts,
};
