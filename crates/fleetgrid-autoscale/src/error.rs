use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AutoscaleError {
    #[error("invalid autoscaling policy: {0}")]
    InvalidPolicy(String),

    #[error("no autoscaling loop for service {0}")]
    UnknownService(String),
}
