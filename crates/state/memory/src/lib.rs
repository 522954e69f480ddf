mod relational;
mod timeseries;

pub use relational::MemoryRelationalStore;
pub use timeseries::MemoryTimeSeriesStore;
