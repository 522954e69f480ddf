use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("state error: {0}")]
    State(#[from] pulsegrid_state::StateError),

    #[error("bus error: {0}")]
    Bus(#[from] pulsegrid_bus::BusError),

    #[error("envelope rejected: {0:?}")]
    Rejected(pulsegrid_core::RejectionReason),
}
