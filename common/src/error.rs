use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("missing sensor data: {0}")]
    MissingSensorData(String),

    #[error("{0} snapshot is stale or has not been fetched yet")]
    StaleSnapshot(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
